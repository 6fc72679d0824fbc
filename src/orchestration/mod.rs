//! Orchestration: turning requested task names into settled runs.
//!
//! The resolver expands requests into execution plans, the scheduler runs
//! them behind per-group barriers, the sink turns action failures into
//! notifications, and watchers re-run tasks when files change.

pub mod resolver;
pub mod scheduler;
pub mod sink;
pub mod watch;

pub use resolver::DependencyResolver;
pub use scheduler::{RunResult, Scheduler, SchedulerEvent, TaskContext};
pub use sink::{DesktopNotifier, ErrorSink, LogNotifier, MemoryNotifier, Notification, Notifier};
pub use watch::{on_settled, PathMatcher, SettledCallback, WatchBinding, WatchHandle, Watcher};
