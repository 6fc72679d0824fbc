//! Live-reload collaborator.
//!
//! `serve` starts a proxy in front of the application server and asks it to
//! refresh connected browsers after every settled rebuild.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::process::Child;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{ActionError, ActionResult, Result};
use crate::pipeline::tools::{Placeholders, ToolCommand};
use crate::{pwlog, pwlog_debug};

pub trait LiveReload: Send + Sync {
    /// Start proxying `proxy` (host:port).
    fn start<'a>(&'a self, proxy: &'a str) -> BoxFuture<'a, ActionResult>;
    /// Refresh connected viewers.
    fn reload(&self) -> BoxFuture<'_, ActionResult>;
    /// Stop the proxy; a no-op if it never started.
    fn stop(&self) -> BoxFuture<'_, ()>;
}

/// browser-sync driven through its command line.
pub struct BrowserSync {
    start: ToolCommand,
    reload: ToolCommand,
    server: Mutex<Option<Child>>,
}

impl BrowserSync {
    pub fn new(start: ToolCommand, reload: ToolCommand) -> Self {
        Self {
            start,
            reload,
            server: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let root = config.root.clone();
        Ok(Self::new(
            ToolCommand::from_argv(&config.tools.browsersync)?.current_dir(root.clone()),
            ToolCommand::from_argv(&config.tools.reload)?.current_dir(root),
        ))
    }

    pub async fn is_running(&self) -> bool {
        self.server.lock().await.is_some()
    }
}

impl LiveReload for BrowserSync {
    fn start<'a>(&'a self, proxy: &'a str) -> BoxFuture<'a, ActionResult> {
        Box::pin(async move {
            let mut server = self.server.lock().await;
            if server.is_some() {
                return Ok(());
            }
            let child = self.start.spawn(&Placeholders::new().with("proxy", proxy))?;
            pwlog!("Proxying {} through {}", proxy, self.start.tool_name());
            *server = Some(child);
            Ok(())
        })
    }

    fn reload(&self) -> BoxFuture<'_, ActionResult> {
        Box::pin(async move {
            pwlog_debug!("Reloading browsers");
            self.reload.run(&Placeholders::new(), None).await?;
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut child) = self.server.lock().await.take() {
                if let Err(e) = child.kill().await {
                    pwlog_debug!("Proxy already gone: {}", e);
                }
            }
        })
    }
}

/// Live reload for headless runs; counts reload requests.
#[derive(Debug, Default)]
pub struct NoopReload {
    reloads: AtomicUsize,
    active: AtomicBool,
}

impl NoopReload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Started and not stopped since.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl LiveReload for NoopReload {
    fn start<'a>(&'a self, proxy: &'a str) -> BoxFuture<'a, ActionResult> {
        pwlog_debug!("Live reload disabled, not proxying {}", proxy);
        self.active.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn reload(&self) -> BoxFuture<'_, ActionResult> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        self.active.store(false, Ordering::SeqCst);
        Box::pin(async {})
    }
}

/// Collapse a reload failure into a plain message for logging.
pub fn describe(error: &ActionError) -> String {
    format!("live reload failed: {}", error)
}
