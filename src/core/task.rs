//! Task data model.
//!
//! A task is a named unit of work with an optional async action and an
//! ordered list of prerequisite task names. Actions are closures that build a
//! fresh future on every invocation, so a task can run again on the next
//! watch trigger without hidden shared state.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ActionError, ActionResult};
use crate::orchestration::TaskContext;

/// Future returned by an action invocation.
pub type BoxActionFuture = BoxFuture<'static, ActionResult>;

/// Shared, re-invocable unit of work.
pub type Action = Arc<dyn Fn(TaskContext) -> BoxActionFuture + Send + Sync>;

/// Wrap a closure returning a future into an [`Action`].
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    Arc::new(move |ctx: TaskContext| -> BoxActionFuture { Box::pin(f(ctx)) })
}

/// One element of a sequential composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    /// A single task (with its prerequisites).
    Task(String),
    /// Tasks that may run concurrently within this step.
    Parallel(Vec<String>),
}

impl Step {
    /// Task names requested by this step.
    pub fn names(&self) -> &[String] {
        match self {
            Step::Task(name) => std::slice::from_ref(name),
            Step::Parallel(names) => names,
        }
    }
}

impl From<&str> for Step {
    fn from(name: &str) -> Self {
        Step::Task(name.to_string())
    }
}

impl From<Vec<&str>> for Step {
    fn from(names: Vec<&str>) -> Self {
        Step::Parallel(names.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Task(name) => write!(f, "{}", name),
            Step::Parallel(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

/// A named task definition.
#[derive(Clone)]
pub struct Task {
    /// Unique name used on the command line and in prerequisite lists.
    pub name: String,
    /// One-line summary shown by `pipewright list`.
    pub description: Option<String>,
    /// Tasks that must succeed before this one starts, in declaration order.
    pub prerequisites: Vec<String>,
    /// Work to perform; `None` is a no-op that succeeds immediately.
    pub action: Option<Action>,
    /// Steps run by the action when this task is a sequence.
    pub sequence: Vec<Step>,
}

impl Task {
    /// Create a no-op task.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            prerequisites: Vec::new(),
            action: None,
            sequence: Vec::new(),
        }
    }

    /// Create a task that runs `steps` strictly one after another.
    ///
    /// The task fails when any task of the sequence fails or is skipped.
    pub fn sequence(name: &str, steps: Vec<Step>) -> Self {
        let shared = Arc::new(steps.clone());
        let run = action(move |ctx: TaskContext| {
            let steps = Arc::clone(&shared);
            async move {
                let result = ctx.run_sequence(&steps).await?;
                if result.is_success() {
                    Ok(())
                } else {
                    Err(ActionError::Incomplete(result.unsuccessful()))
                }
            }
        });

        Self {
            sequence: steps,
            action: Some(run),
            ..Self::new(name)
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_prerequisite(mut self, name: &str) -> Self {
        self.prerequisites.push(name.to_string());
        self
    }

    pub fn with_prerequisites(mut self, names: &[&str]) -> Self {
        self.prerequisites
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn with_action<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        self.action = Some(action(f));
        self
    }

    /// Every task name this task refers to: prerequisites, then sequence steps.
    pub fn references(&self) -> impl Iterator<Item = &String> {
        self.prerequisites
            .iter()
            .chain(self.sequence.iter().flat_map(|s| s.names().iter()))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("prerequisites", &self.prerequisites)
            .field("sequence", &self.sequence)
            .field("action", &self.action.as_ref().map(|_| "<action>"))
            .finish()
    }
}

/// Task status within one run.
///
/// `pending → running → succeeded | failed`, or `pending → skipped` when a
/// prerequisite did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    Skipped {
        /// Why the task never started.
        reason: String,
    },
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed { .. } | TaskStatus::Skipped { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskStatus::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TaskStatus::Skipped { .. })
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed { error } => write!(f, "failed: {}", error),
            TaskStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// Outcome of one task within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub name: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Wall time between start and settlement.
    pub duration: Option<Duration>,
}

impl TaskReport {
    pub fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: TaskStatus::Pending,
            started_at: None,
            finished_at: None,
            duration: None,
        }
    }

    /// Transition to running and record the start time.
    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record the terminal status of a started task.
    pub fn settle(&mut self, status: TaskStatus, duration: Duration) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.duration = Some(duration);
    }

    /// Transition a pending task straight to skipped.
    pub fn skip(&mut self, reason: &str) {
        self.status = TaskStatus::Skipped {
            reason: reason.to_string(),
        };
        self.finished_at = Some(Utc::now());
    }
}
