//! Watch bindings: file changes re-run tasks.
//!
//! A [`Watcher`] listens on the literal base directory of every pattern of
//! its binding. Matching create/modify/remove events become triggers on a
//! channel of capacity one, so while a run is in flight at most one more run
//! is queued and further triggers are dropped. Runs of one binding never
//! overlap.
//!
//! After each run settles, the binding's callbacks run in order until one
//! returns [`ControlFlow::Break`].

use futures::future::BoxFuture;
use glob::{MatchOptions, Pattern};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::future::Future;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::orchestration::resolver::DependencyResolver;
use crate::orchestration::scheduler::{RunResult, Scheduler};
use crate::util::{expand_braces, glob_base};
use crate::{pwlog, pwlog_debug, pwlog_error, pwlog_warn};

/// Runs after every settled run of a binding.
pub type SettledCallback =
    Arc<dyn Fn(Arc<RunResult>) -> BoxFuture<'static, ControlFlow<()>> + Send + Sync>;

/// Wrap a closure returning a future into a [`SettledCallback`].
pub fn on_settled<F, Fut>(f: F) -> SettledCallback
where
    F: Fn(Arc<RunResult>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    Arc::new(move |result: Arc<RunResult>| -> BoxFuture<'static, ControlFlow<()>> {
        Box::pin(f(result))
    })
}

/// Glob patterns bound to the tasks they re-run.
#[derive(Clone)]
pub struct WatchBinding {
    patterns: Vec<String>,
    tasks: Vec<String>,
    callbacks: Vec<SettledCallback>,
}

impl WatchBinding {
    pub fn new<P: AsRef<str>, T: AsRef<str>>(patterns: &[P], tasks: &[T]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            tasks: tasks.iter().map(|t| t.as_ref().to_string()).collect(),
            callbacks: Vec::new(),
        }
    }

    /// Append a settled callback.
    pub fn on_settled<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<RunResult>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        self.callbacks.push(on_settled(f));
        self
    }

    pub fn with_callback(mut self, callback: SettledCallback) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn tasks(&self) -> &[String] {
        &self.tasks
    }

    /// Run callbacks in order, stopping at the first `Break`.
    async fn settle(&self, result: Arc<RunResult>) {
        for callback in &self.callbacks {
            if callback(Arc::clone(&result)).await.is_break() {
                pwlog_debug!("Settled callbacks short-circuited");
                break;
            }
        }
    }
}

/// One watched pattern: the directory to listen on and the globs a changed
/// path must match.
#[derive(Debug, Clone)]
struct WatchPattern {
    base: PathBuf,
    globs: Vec<Pattern>,
}

/// Compiled patterns of a binding.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    patterns: Vec<WatchPattern>,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl PathMatcher {
    /// Compile patterns, anchoring relative ones at the working directory.
    ///
    /// Existing base directories are canonicalized so that they agree with
    /// the paths reported by the OS.
    pub fn new<P: AsRef<str>>(patterns: &[P]) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let mut compiled = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let base = glob_base(pattern);
            let rest = Path::new(pattern)
                .strip_prefix(&base)
                .unwrap_or(Path::new(pattern))
                .to_string_lossy()
                .into_owned();

            let anchored = if base.is_absolute() { base } else { cwd.join(base) };
            let base = anchored.canonicalize().unwrap_or(anchored);

            let full = format!("{}/{}", Pattern::escape(&base.to_string_lossy()), rest);
            let globs = expand_braces(&full)
                .iter()
                .map(|p| Pattern::new(p))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            compiled.push(WatchPattern { base, globs });
        }

        Ok(Self { patterns: compiled })
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.patterns.iter().any(|p| {
            path.starts_with(&p.base)
                && p.globs.iter().any(|g| g.matches_path_with(path, MATCH_OPTIONS))
        })
    }

    /// Distinct directories to listen on.
    pub fn bases(&self) -> Vec<&Path> {
        let mut bases: Vec<&Path> = Vec::new();
        for pattern in &self.patterns {
            if !bases.iter().any(|b| pattern.base.starts_with(b)) {
                bases.retain(|b| !b.starts_with(&pattern.base));
                bases.push(&pattern.base);
            }
        }
        bases
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Starts watch loops.
pub struct Watcher;

impl Watcher {
    /// Start watching `binding` on the runtime.
    ///
    /// Target tasks are resolved up front so a bad binding fails here
    /// rather than on the first change. `debounce` is a quiet window after
    /// the first trigger of a burst; zero disables it.
    pub fn spawn(
        scheduler: Scheduler,
        binding: WatchBinding,
        debounce: Duration,
    ) -> Result<WatchHandle> {
        DependencyResolver::new(scheduler.registry()).resolve(binding.tasks())?;
        let matcher = PathMatcher::new(binding.patterns())?;

        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);
        let cancel = scheduler.cancellation().child_token();

        let event_tx = trigger_tx.clone();
        let event_matcher = matcher.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !is_change(&event.kind) {
                        return;
                    }
                    if let Some(path) = event.paths.iter().find(|p| event_matcher.matches(p)) {
                        pwlog_debug!("Changed: {}", path.display());
                        // A full channel means a run is already queued.
                        let _ = event_tx.try_send(());
                    }
                }
                Err(e) => pwlog_warn!("Watch error: {}", e),
            },
            notify::Config::default(),
        )?;

        for base in matcher.bases() {
            if base.exists() {
                watcher.watch(base, RecursiveMode::Recursive)?;
            } else {
                pwlog_warn!("Not watching {}: directory does not exist", base.display());
            }
        }

        pwlog!(
            "Watching {} for [{}]",
            binding.patterns().join(", "),
            binding.tasks().join(", ")
        );

        let task = tokio::spawn(listen(
            scheduler,
            binding,
            debounce,
            trigger_rx,
            cancel.clone(),
            watcher,
        ));

        Ok(WatchHandle {
            trigger: trigger_tx,
            cancel,
            task: Some(task),
        })
    }
}

async fn listen(
    scheduler: Scheduler,
    binding: WatchBinding,
    debounce: Duration,
    mut triggers: mpsc::Receiver<()>,
    cancel: CancellationToken,
    // Dropped when the loop ends, which stops OS notifications.
    _watcher: RecommendedWatcher,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            trigger = triggers.recv() => {
                if trigger.is_none() {
                    break;
                }
            }
        }

        if !debounce.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(debounce) => {}
            }
        }
        // Triggers from the quiet window belong to this run.
        while triggers.try_recv().is_ok() {}

        // An in-flight run always settles, even if cancellation arrives.
        let result = match scheduler.run_tasks(binding.tasks()).await {
            Ok(result) => Arc::new(result),
            Err(e) => {
                pwlog_error!("Watch run failed to start: {}", e);
                continue;
            }
        };
        pwlog_debug!("Watch run settled: {}", result.summary());
        binding.settle(result).await;
    }
    pwlog_debug!("Watcher for [{}] stopped", binding.tasks().join(", "));
}

/// Handle to a running watch loop; dropping it stops the loop.
pub struct WatchHandle {
    trigger: mpsc::Sender<()>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Inject a change by hand.
    ///
    /// Returns false when the trigger was coalesced into an already queued
    /// run, or the loop has stopped.
    pub fn trigger(&self) -> bool {
        self.trigger.try_send(()).is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Token that stops this loop.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop listening and wait for the loop to end.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait until the loop ends, e.g. after the scheduler shuts down.
    pub async fn wait(mut self) -> Result<()> {
        self.join().await
    }

    async fn join(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| Error::TaskJoin(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
