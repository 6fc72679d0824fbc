//! Error-notification sink.
//!
//! Wraps task actions so that every failure, including a panic, is turned
//! into a notification on a side channel and then handed back to the
//! scheduler, which records the task as failed. Delivering a notification
//! can never fail the task group: notifier errors are logged and dropped.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::process::Command;

use crate::config::NotifyConfig;
use crate::core::task::{action, Action};
use crate::error::{ActionError, Error, Result};
use crate::util::panic_message;
use crate::{pwlog_debug, pwlog_error, pwlog_warn};

/// A failure report for a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    /// Task whose action failed.
    pub task: String,
    pub message: String,
}

/// Delivery channel for notifications.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>>;
}

/// Writes notifications to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
        log_notification(notification);
        Box::pin(async { Ok(()) })
    }
}

fn log_notification(notification: &Notification) {
    pwlog_error!(
        "{}: '{}' {}",
        notification.title,
        notification.task,
        notification.message
    );
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DesktopBackend {
    NotifySend(PathBuf),
    AppleScript(PathBuf),
}

/// Desktop notifications through `notify-send` or `osascript`.
///
/// Falls back to the log when neither program is on `PATH`. Every
/// notification is logged as well.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    backend: Option<DesktopBackend>,
}

impl DesktopNotifier {
    /// Locate a notification program on `PATH`.
    pub fn detect() -> Self {
        let backend = which::which("notify-send")
            .map(DesktopBackend::NotifySend)
            .or_else(|_| which::which("osascript").map(DesktopBackend::AppleScript))
            .ok();
        match &backend {
            Some(b) => pwlog_debug!("Desktop notifications via {:?}", b),
            None => pwlog_debug!("No desktop notifier found, logging only"),
        }
        Self { backend }
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    fn command(&self, notification: &Notification) -> Option<Command> {
        let body = format!("'{}' {}", notification.task, notification.message);
        match self.backend.as_ref()? {
            DesktopBackend::NotifySend(program) => {
                let mut cmd = Command::new(program);
                cmd.arg(&notification.title).arg(body);
                Some(cmd)
            }
            DesktopBackend::AppleScript(program) => {
                let mut cmd = Command::new(program);
                cmd.arg("-e").arg(format!(
                    "display notification {:?} with title {:?}",
                    body, notification.title
                ));
                Some(cmd)
            }
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            log_notification(notification);
            let Some(mut cmd) = self.command(notification) else {
                return Ok(());
            };
            let status = cmd.status().await?;
            if !status.success() {
                return Err(Error::Io(std::io::Error::other(format!(
                    "desktop notifier exited with {}",
                    status
                ))));
            }
            Ok(())
        })
    }
}

/// Keeps notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far, oldest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.sent.lock().map(|n| n.clone()).unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Box::pin(async { Ok(()) })
    }
}

/// Wraps actions so failures are notified before they reach the scheduler.
#[derive(Clone)]
pub struct ErrorSink {
    title: String,
    notifier: Arc<dyn Notifier>,
}

impl ErrorSink {
    pub fn new(title: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            title: title.into(),
            notifier,
        }
    }

    /// Desktop notifier when enabled, log notifier otherwise.
    pub fn from_config(config: &NotifyConfig) -> Self {
        let notifier: Arc<dyn Notifier> = if config.desktop {
            Arc::new(DesktopNotifier::detect())
        } else {
            Arc::new(LogNotifier)
        };
        Self::new(config.title.clone(), notifier)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Wrap `inner`; the result still fails on error, after notifying.
    ///
    /// Panics raised while building or polling the action's future become
    /// [`ActionError::Panicked`]. Cancellation is not notified, nor is an
    /// incomplete sequence whose failed tasks were notified on their own.
    pub fn wrap(&self, task: &str, inner: Action) -> Action {
        let sink = self.clone();
        let task: Arc<str> = Arc::from(task);
        action(move |ctx| {
            let sink = sink.clone();
            let task = Arc::clone(&task);
            let inner = Arc::clone(&inner);
            async move {
                let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| inner(ctx))) {
                    Ok(future) => match AssertUnwindSafe(future).catch_unwind().await {
                        Ok(result) => result,
                        Err(payload) => Err(ActionError::Panicked(panic_message(&*payload))),
                    },
                    Err(payload) => Err(ActionError::Panicked(panic_message(&*payload))),
                };

                if let Err(error) = &outcome {
                    if !matches!(error, ActionError::Cancelled | ActionError::Incomplete(_)) {
                        sink.report(&task, error).await;
                    }
                }
                outcome
            }
        })
    }

    /// Deliver a notification for `error`; never fails.
    pub async fn report(&self, task: &str, error: &ActionError) {
        let notification = Notification {
            title: self.title.clone(),
            task: task.to_string(),
            message: error.to_string(),
        };
        if let Err(e) = self.notifier.notify(&notification).await {
            pwlog_warn!("Could not deliver notification for '{}': {}", task, e);
        }
    }
}
