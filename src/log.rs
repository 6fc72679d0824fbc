//! Levelled logging for pipewright.
//!
//! Log levels:
//! - ERROR: task failures and fatal configuration problems
//! - WARN: recoverable conditions (notifier unavailable, watch errors)
//! - INFO: task lifecycle lines (`Starting 'sass'...`, `Finished 'sass' after 1.2 s`)
//! - DEBUG: plan layout, spawned tool commands, watch triggers
//! - TRACE: raw watcher events
//!
//! Lines go to stderr prefixed with a `[HH:MM:SS]` timestamp, and are
//! appended to a log file when one is configured. Debug mode can be enabled
//! with `--debug` or `PIPEWRIGHT_DEBUG=1`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Environment variable that forces debug output.
pub const DEBUG_ENV: &str = "PIPEWRIGHT_DEBUG";

/// Log levels for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Options applied once at startup.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Force debug level (from `--debug`).
    pub debug: bool,
    /// Only warnings and errors (from `--quiet`).
    pub quiet: bool,
    /// Level from configuration, used when neither flag is set.
    pub level: Option<LogLevel>,
    /// Also append every line to this file.
    pub file: Option<PathBuf>,
}

/// Initialize logging.
pub fn init(options: &LogOptions) {
    let env_debug = std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);

    let level = if options.debug || env_debug {
        LogLevel::Debug
    } else if options.quiet {
        LogLevel::Warn
    } else {
        options.level.unwrap_or(LogLevel::Info)
    };
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    if let Some(path) = &options.file {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        // Truncate on startup so each invocation gets a fresh file.
        let _ = std::fs::write(path, "");
        LOG_PATH.set(path.clone()).ok();
    }
}

/// Get the current log level.
pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

fn format_line(level: LogLevel, msg: &str) -> String {
    let timestamp = chrono::Local::now().format("%H:%M:%S");
    match level {
        LogLevel::Info => format!("[{}] {}", timestamp, msg),
        _ => format!("[{}] {}: {}", timestamp, level.as_str(), msg),
    }
}

/// Log a message at the specified level.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }

    let line = format_line(level, msg);

    let _ = writeln!(std::io::stderr().lock(), "{}", line);

    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Log a message at INFO level.
pub fn log(msg: &str) {
    log_at(LogLevel::Info, msg);
}

/// Log a message at ERROR level.
pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

/// Log a message at WARN level.
pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

/// Log a message at DEBUG level.
pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

/// Log a message at TRACE level.
pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! pwlog {
    ($($arg:tt)*) => {
        $crate::log::log(&format!($($arg)*))
    };
}

/// Log macro for ERROR level.
#[macro_export]
macro_rules! pwlog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

/// Log macro for WARN level.
#[macro_export]
macro_rules! pwlog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Log macro for DEBUG level.
#[macro_export]
macro_rules! pwlog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

/// Log macro for TRACE level.
#[macro_export]
macro_rules! pwlog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}
