//! Scheduler: runs execution plans and sequences.
//!
//! A plan runs group by group. Every runnable task of a group is spawned
//! onto a `JoinSet` and the scheduler waits for all of them before moving
//! to the next group, so group `n + 1` never observes an unsettled task of
//! group `n`.
//!
//! A task whose prerequisite did not succeed is skipped without running.
//! Failures never abort sibling tasks: the group still runs to settlement
//! and unrelated tasks in later groups still run.
//!
//! A sequence task runs its steps through [`TaskContext::run_sequence`];
//! the reports of those steps join the enclosing run's result and only
//! the outermost call emits `RunFinished`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::core::plan::ExecutionPlan;
use crate::core::registry::TaskRegistry;
use crate::core::task::{BoxActionFuture, Step, TaskReport, TaskStatus};
use crate::error::{ActionError, Result};
use crate::orchestration::resolver::DependencyResolver;
use crate::orchestration::sink::ErrorSink;
use crate::util::{format_duration, panic_message};
use crate::{pwlog, pwlog_debug, pwlog_error, pwlog_warn};

/// Handed to every action invocation.
#[derive(Clone)]
pub struct TaskContext {
    name: String,
    cancel: CancellationToken,
    scheduler: Scheduler,
    nested: Arc<Mutex<Vec<TaskReport>>>,
}

impl TaskContext {
    /// Name of the task being run.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Child of the scheduler's root token; cancelled on shutdown.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The scheduler running this task, for watchers.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run `steps` as part of the invocation running this task.
    ///
    /// Unlike [`Scheduler::run_sequence`] no `RunFinished` event is sent.
    /// The reports of the nested tasks are merged into the enclosing
    /// run's result once this task settles.
    pub async fn run_sequence(&self, steps: &[Step]) -> Result<RunResult> {
        let result = self.scheduler.sequence(steps).await?;
        self.nested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(result.reports.iter().cloned());
        Ok(result)
    }
}

/// Events emitted by the scheduler for task lifecycle changes.
///
/// These allow callers (the CLI's JSON output, tests) to follow a run
/// without polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    TaskStarted {
        name: String,
    },
    TaskSucceeded {
        name: String,
        duration: Duration,
    },
    TaskFailed {
        name: String,
        error: String,
    },
    TaskSkipped {
        name: String,
        reason: String,
    },
    /// A run (plan or sequence) settled.
    RunFinished {
        success: bool,
        duration: Duration,
    },
}

/// Outcome of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// One report per task, in the order tasks settled.
    pub reports: Vec<TaskReport>,
    /// Wall time of the whole invocation.
    pub duration: Duration,
}

impl RunResult {
    /// True iff no task failed or was skipped.
    pub fn is_success(&self) -> bool {
        self.reports.iter().all(|r| r.status.is_success())
    }

    pub fn report(&self, name: &str) -> Option<&TaskReport> {
        self.reports.iter().find(|r| r.name == name)
    }

    pub fn status(&self, name: &str) -> Option<&TaskStatus> {
        self.report(name).map(|r| &r.status)
    }

    pub fn succeeded(&self) -> usize {
        self.count(TaskStatus::is_success)
    }

    pub fn failed(&self) -> usize {
        self.count(TaskStatus::is_failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TaskStatus::is_skipped)
    }

    fn count(&self, predicate: impl Fn(&TaskStatus) -> bool) -> usize {
        self.reports.iter().filter(|r| predicate(&r.status)).count()
    }

    /// Names of tasks that failed or were skipped.
    pub fn unsuccessful(&self) -> Vec<String> {
        self.reports
            .iter()
            .filter(|r| !r.status.is_success())
            .map(|r| r.name.clone())
            .collect()
    }

    /// One-line summary, e.g. `3 succeeded, 1 failed, 1 skipped in 1.2 s`.
    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed, {} skipped in {}",
            self.succeeded(),
            self.failed(),
            self.skipped(),
            format_duration(self.duration)
        )
    }
}

/// Reports of one invocation, shared across the steps of a sequence so a
/// task settles at most once.
#[derive(Default)]
struct RunState {
    reports: Vec<TaskReport>,
    index: HashMap<String, usize>,
}

impl RunState {
    fn status(&self, name: &str) -> Option<&TaskStatus> {
        self.index.get(name).map(|&i| &self.reports[i].status)
    }

    fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Record a report settled by a nested run; the first report wins.
    fn absorb(&mut self, report: TaskReport) {
        if !self.contains(&report.name) {
            self.index.insert(report.name.clone(), self.reports.len());
            self.reports.push(report);
        }
    }

    fn entry(&mut self, name: &str) -> &mut TaskReport {
        let i = match self.index.get(name) {
            Some(&i) => i,
            None => {
                self.reports.push(TaskReport::pending(name));
                self.index.insert(name.to_string(), self.reports.len() - 1);
                self.reports.len() - 1
            }
        };
        &mut self.reports[i]
    }

    fn into_result(self, duration: Duration) -> RunResult {
        RunResult {
            reports: self.reports,
            duration,
        }
    }
}

/// Executes plans against a frozen registry.
///
/// Cloning is cheap; clones share the registry, sink, event channel and
/// cancellation root.
///
/// # Example
///
/// ```ignore
/// let scheduler = Scheduler::new(registry.freeze()?).with_events(tx);
/// let result = scheduler.run_tasks(&["imgmin"]).await?;
/// assert!(result.is_success());
/// ```
#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<TaskRegistry>,
    sink: Option<ErrorSink>,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self {
            registry,
            sink: None,
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Route every action's failures through `sink`.
    pub fn with_sink(mut self, sink: ErrorSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Emit lifecycle events on `tx`. Sends never block; events are dropped
    /// when the channel is full or closed.
    pub fn with_events(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Root token; watchers and actions hang child tokens off it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cancel the root token. Tasks not yet started are skipped; running
    /// actions observe their child token.
    pub fn shutdown(&self) {
        pwlog_debug!("Scheduler shutdown requested");
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve `names` and run the resulting plan.
    ///
    /// # Errors
    /// Resolution errors only; task failures are reported in the result.
    pub async fn run_tasks<S: AsRef<str>>(&self, names: &[S]) -> Result<RunResult> {
        let plan = DependencyResolver::new(&self.registry).resolve(names)?;
        Ok(self.run(&plan).await)
    }

    /// Run a plan to settlement.
    pub async fn run(&self, plan: &ExecutionPlan) -> RunResult {
        let started = Instant::now();
        let mut state = RunState::default();
        self.execute(plan, &mut state).await;
        self.finish(state, started)
    }

    /// Run steps strictly one after another.
    ///
    /// Every step is resolved before the first one starts. Each task runs
    /// at most once per call, even when several steps need it. Once a step
    /// ends with a failed or skipped task, the tasks of the remaining steps
    /// are skipped.
    pub async fn run_sequence(&self, steps: &[Step]) -> Result<RunResult> {
        let result = self.sequence(steps).await?;
        self.announce(&result);
        Ok(result)
    }

    /// [`Self::run_sequence`] without the `RunFinished` event.
    async fn sequence(&self, steps: &[Step]) -> Result<RunResult> {
        let plans = DependencyResolver::new(&self.registry).resolve_sequence(steps)?;
        let started = Instant::now();
        let mut state = RunState::default();
        self.sequence_steps(steps, &plans, &mut state).await;
        Ok(state.into_result(started.elapsed()))
    }

    async fn sequence_steps(&self, steps: &[Step], plans: &[ExecutionPlan], state: &mut RunState) {
        let mut halted: Option<String> = None;

        for (step, plan) in steps.iter().zip(plans) {
            if let Some(failed_step) = &halted {
                let reason = format!("sequence step '{}' did not complete", failed_step);
                for name in plan.task_names() {
                    if !state.contains(name) {
                        self.skip(state, name, &reason);
                    }
                }
                continue;
            }

            pwlog_debug!("Sequence step {}", step);
            self.execute(plan, state).await;

            let complete = plan
                .task_names()
                .all(|name| state.status(name).is_some_and(TaskStatus::is_success));
            if !complete {
                halted = Some(step.to_string());
            }
        }
    }

    async fn execute(&self, plan: &ExecutionPlan, state: &mut RunState) {
        for group in plan.groups() {
            let mut set = JoinSet::new();
            let mut running: HashMap<tokio::task::Id, Running> = HashMap::new();

            for name in group {
                if state.contains(name) {
                    // Settled by an earlier step of the same sequence.
                    continue;
                }

                let Some(task) = self.registry.get(name) else {
                    self.settle(
                        state,
                        name,
                        Err(ActionError::failure("task is not registered")),
                        Duration::ZERO,
                    );
                    continue;
                };

                if let Some(reason) = blocked_by(&task.prerequisites, state) {
                    self.skip(state, name, &reason);
                    continue;
                }

                if self.cancel.is_cancelled() {
                    self.skip(state, name, "run cancelled");
                    continue;
                }

                state.entry(name).start();
                pwlog!("Starting '{}'...", name);
                self.emit(SchedulerEvent::TaskStarted { name: name.clone() });

                let nested = Arc::new(Mutex::new(Vec::new()));
                let ctx = TaskContext {
                    name: name.clone(),
                    cancel: self.cancel.child_token(),
                    scheduler: self.clone(),
                    nested: Arc::clone(&nested),
                };
                let future: BoxActionFuture = match &task.action {
                    Some(action) => match &self.sink {
                        Some(sink) => sink.wrap(name, Arc::clone(action))(ctx),
                        None => action(ctx),
                    },
                    None => Box::pin(async { Ok(()) }),
                };

                let handle = set.spawn(future);
                running.insert(
                    handle.id(),
                    Running {
                        name: name.clone(),
                        started: Instant::now(),
                        nested,
                    },
                );
            }

            // Barrier: the next group starts only after every task here settled.
            while let Some(joined) = set.join_next_with_id().await {
                let (id, outcome) = match joined {
                    Ok((id, result)) => (id, result),
                    Err(err) => {
                        let id = err.id();
                        let error = if err.is_panic() {
                            ActionError::Panicked(panic_message(&*err.into_panic()))
                        } else {
                            ActionError::Cancelled
                        };
                        (id, Err(error))
                    }
                };
                if let Some(task) = running.remove(&id) {
                    let nested = std::mem::take(
                        &mut *task.nested.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
                    );
                    for report in nested {
                        state.absorb(report);
                    }
                    self.settle(state, &task.name, outcome, task.started.elapsed());
                }
            }
        }
    }

    fn settle(
        &self,
        state: &mut RunState,
        name: &str,
        outcome: std::result::Result<(), ActionError>,
        duration: Duration,
    ) {
        match outcome {
            Ok(()) => {
                pwlog!("Finished '{}' after {}", name, format_duration(duration));
                state.entry(name).settle(TaskStatus::Succeeded, duration);
                self.emit(SchedulerEvent::TaskSucceeded {
                    name: name.to_string(),
                    duration,
                });
            }
            Err(err) => {
                let error = err.to_string();
                pwlog_error!("'{}' errored after {}", name, format_duration(duration));
                pwlog_error!("{}", error);
                state.entry(name).settle(
                    TaskStatus::Failed {
                        error: error.clone(),
                    },
                    duration,
                );
                self.emit(SchedulerEvent::TaskFailed {
                    name: name.to_string(),
                    error,
                });
            }
        }
    }

    fn skip(&self, state: &mut RunState, name: &str, reason: &str) {
        pwlog_warn!("Skipping '{}': {}", name, reason);
        state.entry(name).skip(reason);
        self.emit(SchedulerEvent::TaskSkipped {
            name: name.to_string(),
            reason: reason.to_string(),
        });
    }

    fn finish(&self, state: RunState, started: Instant) -> RunResult {
        let result = state.into_result(started.elapsed());
        self.announce(&result);
        result
    }

    fn announce(&self, result: &RunResult) {
        pwlog_debug!("Run finished: {}", result.summary());
        self.emit(SchedulerEvent::RunFinished {
            success: result.is_success(),
            duration: result.duration,
        });
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.try_send(event);
        }
    }
}

/// A spawned action awaiting settlement.
struct Running {
    name: String,
    started: Instant,
    /// Reports of tasks the action ran through [`TaskContext::run_sequence`].
    nested: Arc<Mutex<Vec<TaskReport>>>,
}

/// Reason to skip a task, naming the first prerequisite (in declaration
/// order) that did not succeed.
fn blocked_by(prerequisites: &[String], state: &RunState) -> Option<String> {
    prerequisites.iter().find_map(|prereq| match state.status(prereq) {
        Some(TaskStatus::Succeeded) => None,
        Some(TaskStatus::Skipped { .. }) => {
            Some(format!("prerequisite '{}' was skipped", prereq))
        }
        Some(_) => Some(format!("prerequisite '{}' failed", prereq)),
        None => Some(format!("prerequisite '{}' did not run", prereq)),
    })
}
