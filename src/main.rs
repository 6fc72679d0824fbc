use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use pipewright::config::Config;
use pipewright::core::{Step, TaskRegistry};
use pipewright::log::LogOptions;
use pipewright::orchestration::{
    DependencyResolver, ErrorSink, RunResult, Scheduler, WatchBinding, Watcher,
};
use pipewright::pipeline::{register_pipeline, Collaborators};
use pipewright::{pwlog, pwlog_debug, pwlog_error, Result};

/// pipewright - task runner for style-guide asset pipelines
#[derive(Parser, Debug)]
#[command(name = "pipewright")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    PIPEWRIGHT_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Configuration file (default: ./pipewright.toml if present)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Only log warnings and errors
    #[arg(short = 'q', long, global = true, conflicts_with = "debug")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run tasks and their prerequisites
    Run {
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Run the named tasks one after another instead of together
        #[arg(long)]
        sequence: bool,

        /// Print the run result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List registered tasks in declaration order
    List,

    /// Show the execution groups for tasks without running them
    Plan {
        #[arg(required = true)]
        tasks: Vec<String>,

        /// Print Graphviz DOT instead of groups
        #[arg(long)]
        dot: bool,
    },

    /// Re-run a task whenever matching files change
    Watch {
        task: String,

        /// Glob to watch (repeatable; default: styles.watch)
        #[arg(short = 'p', long = "pattern")]
        patterns: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            pwlog_error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the invocation succeeded.
fn run(cli: Cli) -> Result<bool> {
    // Flags first so config loading can log at debug level.
    pipewright::log::init(&LogOptions {
        debug: cli.debug,
        quiet: cli.quiet,
        ..Default::default()
    });

    let config = Config::load(cli.config.as_deref())?;
    let log_file = config.log_file()?;
    if config.log_level().is_some() || log_file.is_some() {
        pipewright::log::init(&LogOptions {
            debug: cli.debug,
            quiet: cli.quiet,
            level: config.log_level(),
            file: log_file,
        });
    }

    let registry = build_registry(&config)?;

    match cli.command {
        Some(Command::List) => {
            list(&registry);
            Ok(true)
        }
        Some(Command::Plan { tasks, dot }) => {
            let plan = DependencyResolver::new(&registry).resolve(&tasks)?;
            if dot {
                println!("{}", plan.to_dot());
            } else {
                print!("{}", plan);
            }
            Ok(true)
        }
        Some(Command::Run {
            tasks,
            sequence,
            json,
        }) => block_on(registry, &config, move |scheduler| async move {
            let result = if sequence {
                let steps: Vec<Step> = tasks.iter().map(|t| Step::from(t.as_str())).collect();
                scheduler.run_sequence(&steps).await?
            } else {
                scheduler.run_tasks(&tasks).await?
            };
            finish(&result, json)
        }),
        Some(Command::Watch { task, patterns }) => {
            let patterns = if patterns.is_empty() {
                vec![config.pattern(&config.styles.watch)]
            } else {
                patterns
            };
            let debounce = config.debounce();
            block_on(registry, &config, move |scheduler| async move {
                let binding = WatchBinding::new(&patterns, &[task]);
                let handle = Watcher::spawn(scheduler, binding, debounce)?;
                // Ends once Ctrl-C shuts the scheduler down.
                handle.wait().await?;
                Ok(true)
            })
        }
        None => {
            let task = config.default_task.clone();
            block_on(registry, &config, move |scheduler| async move {
                let result = scheduler.run_tasks(&[task]).await?;
                finish(&result, false)
            })
        }
    }
}

fn build_registry(config: &Config) -> Result<Arc<TaskRegistry>> {
    let mut registry = TaskRegistry::new();
    register_pipeline(&mut registry, config, Collaborators::from_config(config)?)?;
    registry.freeze()
}

/// Run `f` on a fresh runtime with a scheduler that shuts down on Ctrl-C.
fn block_on<F, Fut>(registry: Arc<TaskRegistry>, config: &Config, f: F) -> Result<bool>
where
    F: FnOnce(Scheduler) -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let rt = tokio::runtime::Runtime::new()?;
    let sink = ErrorSink::from_config(&config.notify);
    let scheduler = Scheduler::new(registry).with_sink(sink);

    rt.block_on(async {
        let signal_scheduler = scheduler.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                pwlog!("Interrupted, stopping");
                signal_scheduler.shutdown();
            }
        });
        f(scheduler).await
    })
}

fn finish(result: &RunResult, json: bool) -> Result<bool> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    }
    pwlog_debug!("Run result: {}", result.summary());
    if !result.is_success() {
        pwlog_error!("Did not complete: {}", result.unsuccessful().join(", "));
    }
    Ok(result.is_success())
}

fn list(registry: &TaskRegistry) {
    let width = registry.names().iter().map(|n| n.len()).max().unwrap_or(0);
    for task in registry.tasks() {
        let mut line = format!("{:width$}", task.name, width = width);
        if let Some(description) = &task.description {
            line.push_str("  ");
            line.push_str(description);
        }
        if !task.prerequisites.is_empty() {
            line.push_str(&format!("  [needs: {}]", task.prerequisites.join(", ")));
        }
        println!("{}", line.trim_end());
    }
}
