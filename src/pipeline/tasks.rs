//! The style-guide build as a task table.
//!
//! | task | needs | does |
//! |---|---|---|
//! | `default` | | nothing |
//! | `sass` | | sass → autoprefixer → minifier into `dest/css` |
//! | `clean-img` | | remove `dest/img` |
//! | `imgmin` | `clean-img` | optimise images into `dest/img` |
//! | `clean-doc` | | remove the doc directory |
//! | `remove-doc-scss` | | remove stylesheets left in the doc directory |
//! | `img-to-doc` | | copy optimised images into `doc/static` |
//! | `styleguide:generate` | | run the style-guide generator |
//! | `styleguide:applystyles` | | compile entry stylesheets into the doc directory |
//! | `build-doc` | | the doc tasks, in sequence |
//! | `serve` | | proxy, rebuild styles on change, reload browsers |

use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::core::registry::TaskRegistry;
use crate::core::task::{Step, Task};
use crate::error::{ActionError, ActionResult, Result};
use crate::orchestration::watch::{WatchBinding, Watcher};
use crate::orchestration::TaskContext;
use crate::pipeline::files::{self, glob_base, is_partial, relative_to_base, write_output};
use crate::pipeline::reload::{describe, BrowserSync, LiveReload, NoopReload};
use crate::pipeline::tools::{Placeholders, ToolCommand};
use crate::{pwlog, pwlog_debug, pwlog_warn};

/// Files transformed concurrently within one task.
const FILE_CONCURRENCY: usize = 4;

/// Side-effecting services the pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub reload: Arc<dyn LiveReload>,
}

impl Collaborators {
    /// browser-sync as configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            reload: Arc::new(BrowserSync::from_config(config)?),
        })
    }

    /// No live reload.
    pub fn headless() -> Self {
        Self {
            reload: Arc::new(NoopReload::new()),
        }
    }
}

/// Configured tool commands.
struct Toolbox {
    sass: ToolCommand,
    autoprefix: ToolCommand,
    minify: ToolCommand,
    images: BTreeMap<String, ToolCommand>,
    styleguide: ToolCommand,
}

impl Toolbox {
    fn from_config(config: &Config) -> Result<Self> {
        let tools = &config.tools;
        let root = &config.root;
        let images = tools
            .images
            .iter()
            .map(|(ext, argv)| {
                Ok((
                    ext.to_lowercase(),
                    ToolCommand::from_argv(argv)?.current_dir(root.clone()),
                ))
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            sass: ToolCommand::from_argv(&tools.sass)?.current_dir(root.clone()),
            autoprefix: ToolCommand::from_argv(&tools.autoprefix)?
                .current_dir(root.clone())
                .with_env("BROWSERSLIST", config.browsers.join(", ")),
            minify: ToolCommand::from_argv(&tools.minify)?.current_dir(root.clone()),
            images,
            styleguide: ToolCommand::from_argv(&tools.styleguide)?.current_dir(root.clone()),
        })
    }
}

/// Everything an action closure needs, shared between invocations.
struct Pipeline {
    config: Config,
    tools: Toolbox,
    reload: Arc<dyn LiveReload>,
}

/// Register the pipeline's tasks.
///
/// # Errors
/// Tool vectors without a program, or a task name already taken.
pub fn register_pipeline(
    registry: &mut TaskRegistry,
    config: &Config,
    collaborators: Collaborators,
) -> Result<()> {
    let pipeline = Arc::new(Pipeline {
        config: config.clone(),
        tools: Toolbox::from_config(config)?,
        reload: collaborators.reload,
    });

    registry.register(Task::new("default").with_description("Does nothing"))?;

    registry.register(
        bind(&pipeline, "sass", |p, _ctx| async move { p.sass().await })
            .with_description("Compile, prefix and minify stylesheets"),
    )?;

    registry.register(
        bind(&pipeline, "clean-img", |p, _ctx| async move {
            files::remove(&p.config.img_dest()).await?;
            Ok(())
        })
        .with_description("Remove optimised images"),
    )?;

    registry.register(
        bind(&pipeline, "imgmin", |p, _ctx| async move { p.imgmin().await })
            .with_prerequisite("clean-img")
            .with_description("Optimise images"),
    )?;

    registry.register(
        bind(&pipeline, "clean-doc", |p, _ctx| async move {
            files::remove(&p.config.doc_dir()).await?;
            Ok(())
        })
        .with_description("Remove the style guide"),
    )?;

    registry.register(
        bind(&pipeline, "remove-doc-scss", |p, _ctx| async move {
            let removed = files::remove_matching(&p.config.doc_scss()).await?;
            pwlog_debug!("Removed {} stylesheet(s) from the style guide", removed);
            Ok(())
        })
        .with_description("Remove stylesheets left in the style guide"),
    )?;

    registry.register(
        bind(&pipeline, "img-to-doc", |p, _ctx| async move {
            files::copy_matching(&p.config.img_move(), &p.config.doc_static()).await?;
            Ok(())
        })
        .with_description("Copy optimised images into the style guide"),
    )?;

    registry.register(
        bind(&pipeline, "styleguide:generate", |p, _ctx| async move {
            p.generate_styleguide().await
        })
        .with_description("Generate the style guide"),
    )?;

    registry.register(
        bind(&pipeline, "styleguide:applystyles", |p, _ctx| async move {
            p.apply_styles().await
        })
        .with_description("Compile entry stylesheets into the style guide"),
    )?;

    registry.register(
        Task::sequence(
            "build-doc",
            vec![
                Step::from("clean-doc"),
                Step::from(vec![
                    "styleguide:generate",
                    "styleguide:applystyles",
                    "img-to-doc",
                ]),
                Step::from("remove-doc-scss"),
            ],
        )
        .with_description("Build the style guide"),
    )?;

    registry.register(
        bind(&pipeline, "serve", |p, ctx| async move { p.serve(ctx).await })
            .with_description("Proxy the app, rebuild styles on change, reload browsers"),
    )?;

    Ok(())
}

/// A task whose action borrows the shared pipeline.
fn bind<F, Fut>(pipeline: &Arc<Pipeline>, name: &str, f: F) -> Task
where
    F: Fn(Arc<Pipeline>, TaskContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ActionResult> + Send + 'static,
{
    let pipeline = Arc::clone(pipeline);
    Task::new(name).with_action(move |ctx| f(Arc::clone(&pipeline), ctx))
}

impl Pipeline {
    async fn sass(&self) -> ActionResult {
        let pattern = self.config.pattern(&self.config.styles.watch);
        let base = glob_base(&pattern);
        let sources: Vec<PathBuf> = files::expand_async(vec![pattern])
            .await?
            .into_iter()
            .filter(|f| !is_partial(f))
            .collect();

        let dest = self.config.css_dest();
        for chunk in sources.chunks(FILE_CONCURRENCY) {
            try_join_all(chunk.iter().map(|source| self.build_stylesheet(source, &base, &dest)))
                .await?;
        }
        pwlog!("Compiled {} stylesheet(s) into {}", sources.len(), dest.display());
        Ok(())
    }

    async fn build_stylesheet(&self, source: &Path, base: &Path, dest: &Path) -> ActionResult {
        let css = self.compile_stylesheet(source).await?;
        let relative = relative_to_base(source, base).with_extension("css");
        write_output(dest, &relative, &css).await?;
        Ok(())
    }

    /// sass → autoprefixer → minifier.
    async fn compile_stylesheet(&self, source: &Path) -> std::result::Result<Vec<u8>, ActionError> {
        let vars = Placeholders::new().with_path("file", source);
        let css = self.tools.sass.run(&vars, None).await?;
        let css = self.tools.autoprefix.run(&vars, Some(&css)).await?;
        let css = self.tools.minify.run(&vars, Some(&css)).await?;
        Ok(css)
    }

    async fn imgmin(&self) -> ActionResult {
        let pattern = self.config.pattern(&self.config.styles.img_src);
        let base = glob_base(&pattern);
        let images = files::expand_async(vec![pattern]).await?;

        let dest = self.config.img_dest();
        for chunk in images.chunks(FILE_CONCURRENCY) {
            try_join_all(chunk.iter().map(|image| self.optimise_image(image, &base, &dest)))
                .await?;
        }
        pwlog!("Optimised {} image(s) into {}", images.len(), dest.display());
        Ok(())
    }

    /// Run the optimiser for the image's extension; unknown types are
    /// copied unchanged.
    async fn optimise_image(&self, image: &Path, base: &Path, dest: &Path) -> ActionResult {
        let bytes = tokio::fs::read(image).await?;
        let ext = image
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let optimised = match self.tools.images.get(&ext) {
            Some(tool) => {
                let vars = Placeholders::new().with_path("file", image);
                tool.run(&vars, Some(&bytes)).await?
            }
            None => bytes,
        };
        write_output(dest, &relative_to_base(image, base), &optimised).await?;
        Ok(())
    }

    async fn generate_styleguide(&self) -> ActionResult {
        let pattern = self.config.pattern(&self.config.styles.watch);
        let doc = self.config.doc_dir();
        tokio::fs::create_dir_all(&doc).await?;

        let vars = Placeholders::new()
            .with_path("src", &glob_base(&pattern))
            .with_path("dest", &doc)
            .with("title", self.config.tools.styleguide_title.clone());
        self.tools.styleguide.run(&vars, None).await?;
        Ok(())
    }

    async fn apply_styles(&self) -> ActionResult {
        let pattern = self.config.pattern(&self.config.styles.src);
        let base = glob_base(&pattern);
        let doc = self.config.doc_dir();

        for source in files::expand_async(vec![pattern]).await? {
            if is_partial(&source) {
                continue;
            }
            let vars = Placeholders::new().with_path("file", &source);
            let css = self.tools.sass.run(&vars, None).await?;
            let relative = relative_to_base(&source, &base).with_extension("css");
            write_output(&doc, &relative, &css).await?;
        }
        Ok(())
    }

    /// Proxy the app and rebuild styles on change until cancelled.
    async fn serve(&self, ctx: TaskContext) -> ActionResult {
        self.reload.start(&self.config.proxy).await?;

        let reload = Arc::clone(&self.reload);
        let binding = WatchBinding::new(
            &[self.config.pattern(&self.config.styles.watch)],
            &["sass"],
        )
        .on_settled(move |_result| {
            let reload = Arc::clone(&reload);
            async move {
                if let Err(e) = reload.reload().await {
                    pwlog_warn!("{}", describe(&e));
                }
                ControlFlow::Continue(())
            }
        });

        let handle = match Watcher::spawn(ctx.scheduler().clone(), binding, self.config.debounce()) {
            Ok(handle) => handle,
            Err(e) => {
                self.reload.stop().await;
                return Err(e.into());
            }
        };
        ctx.cancellation().cancelled().await;

        pwlog!("Stopping 'serve'");
        let stopped = handle.shutdown().await;
        self.reload.stop().await;
        stopped?;
        Ok(())
    }
}
