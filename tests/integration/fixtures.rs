//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Recording task start/end order
//! - Building registries from ad-hoc tasks
//! - A scratch project whose tools are shell stand-ins

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use pipewright::config::Config;
use pipewright::core::{Task, TaskRegistry};
use pipewright::error::ActionError;
use pipewright::orchestration::{ErrorSink, MemoryNotifier, Scheduler, SchedulerEvent};

/// Shared log of `start:<task>` / `end:<task>` entries.
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: String) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Index of `entry`; panics if it was never recorded.
    pub fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("'{}' not recorded in {:?}", entry, self.entries()))
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    /// Whether `a` ended before `b` started.
    pub fn before(&self, a: &str, b: &str) -> bool {
        self.position(&format!("end:{}", a)) < self.position(&format!("start:{}", b))
    }
}

/// A task that records its start and end around a sleep.
pub fn recording_task(recorder: &Recorder, name: &str, prerequisites: &[&str], delay_ms: u64) -> Task {
    let recorder = recorder.clone();
    let task_name = name.to_string();
    Task::new(name)
        .with_prerequisites(prerequisites)
        .with_action(move |_ctx| {
            let recorder = recorder.clone();
            let name = task_name.clone();
            async move {
                recorder.record(format!("start:{}", name));
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                recorder.record(format!("end:{}", name));
                Ok(())
            }
        })
}

/// A task whose action always fails with `message`.
pub fn failing_task(name: &str, prerequisites: &[&str], message: &str) -> Task {
    let message = message.to_string();
    Task::new(name)
        .with_prerequisites(prerequisites)
        .with_action(move |_ctx| {
            let message = message.clone();
            async move { Err(ActionError::failure(message)) }
        })
}

pub fn registry_of(tasks: Vec<Task>) -> Arc<TaskRegistry> {
    let mut registry = TaskRegistry::new();
    for task in tasks {
        registry.register(task).expect("Failed to register task");
    }
    registry.freeze().expect("Failed to freeze registry")
}

/// A scheduler wired to an in-memory notifier and an event channel.
pub struct SchedulerHarness {
    pub scheduler: Scheduler,
    pub events: mpsc::Receiver<SchedulerEvent>,
    pub notifier: Arc<MemoryNotifier>,
}

impl SchedulerHarness {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self::with_registry(registry_of(tasks))
    }

    pub fn with_registry(registry: Arc<TaskRegistry>) -> Self {
        let (tx, events) = mpsc::channel(1024);
        let notifier = Arc::new(MemoryNotifier::new());
        let scheduler = Scheduler::new(registry)
            .with_sink(ErrorSink::new("Compile Error", notifier.clone()))
            .with_events(tx);
        Self {
            scheduler,
            events,
            notifier,
        }
    }

    /// Events emitted so far.
    pub fn drain_events(&mut self) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// A scratch project laid out like a Django app with a `frontend` folder.
///
/// Tools are shell stand-ins:
/// - sass prints the source with a `/* sass */` banner
/// - autoprefix appends the exported `BROWSERSLIST`
/// - minify strips newlines
/// - png images are replaced by `optimised`
/// - the style-guide generator writes `index.html` and a stray `kss.scss`
pub struct TestSite {
    /// Keeps the directory alive.
    pub temp_dir: TempDir,
    pub root: PathBuf,
    pub config: Config,
}

impl TestSite {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir
            .path()
            .canonicalize()
            .expect("Failed to canonicalize temp directory");

        let mut config = Config::default();
        config.root = root.clone();
        config.debounce_ms = 20;
        config.browsers = argv(&["last 3 versions"]);
        config.notify.desktop = false;
        config.tools.sass = argv(&["sh", "-c", "printf '/* sass */\\n'; cat \"$0\"", "{file}"]);
        config.tools.autoprefix = argv(&["sh", "-c", "cat; printf '\\n/* %s */' \"$BROWSERSLIST\""]);
        config.tools.minify = argv(&["tr", "-d", "\\n"]);
        let mut images = BTreeMap::new();
        images.insert("png".to_string(), argv(&["sh", "-c", "cat >/dev/null; printf optimised"]));
        config.tools.images = images;
        config.tools.styleguide = argv(&[
            "sh",
            "-c",
            "mkdir -p \"$0\" && printf '<h1>%s</h1>' \"$1\" > \"$0/index.html\" && printf 'x' > \"$0/kss.scss\"",
            "{dest}",
            "{title}",
        ]);
        config.validate().expect("Test config should be valid");

        Self {
            temp_dir,
            root,
            config,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.path(relative);
        std::fs::create_dir_all(path.parent().unwrap()).expect("Failed to create directories");
        std::fs::write(&path, contents).expect("Failed to write file");
        path
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path(relative))
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", relative, e))
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    /// Typical sources: one entry stylesheet, one partial, two images, and
    /// an entry stylesheet for the style guide.
    pub fn with_sources(self) -> Self {
        self.write("shop/frontend/css/main.scss", "a { color: red; }\n");
        self.write("shop/frontend/css/_vars.scss", "$red: red;\n");
        self.write("shop/frontend/img/logo.png", "raw-png");
        self.write("shop/frontend/img/icons/cart.ico", "raw-ico");
        self.write("static/scss/site.scss", "body { margin: 0; }\n");
        self
    }
}

/// Wait until `check` holds, polling for up to two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

