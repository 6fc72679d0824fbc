//! Core domain models: task definitions, the registry that owns them, and
//! the execution plan derived per invocation.

pub mod plan;
pub mod registry;
pub mod task;

pub use plan::ExecutionPlan;
pub use registry::TaskRegistry;
pub use task::{action, Action, BoxActionFuture, Step, Task, TaskReport, TaskStatus};
