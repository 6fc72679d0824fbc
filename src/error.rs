use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration-time and infrastructure errors.
///
/// Graph errors (`DuplicateTask`, `UnknownTask`, `CyclicDependency`) are
/// fatal: a malformed task graph never runs partially.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Task '{name}' is not registered{}", required_by_suffix(.required_by))]
    UnknownTask {
        name: String,
        required_by: Option<String>,
    },

    #[error("Cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

fn required_by_suffix(required_by: &Option<String>) -> String {
    match required_by {
        Some(parent) => format!(" (required by '{}')", parent),
        None => String::new(),
    }
}

impl Error {
    /// Shorthand for an unknown task requested directly by a caller.
    pub fn unknown(name: &str) -> Self {
        Error::UnknownTask {
            name: name.to_string(),
            required_by: None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where a transform failure was reported in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file.display())?;
        if let Some(line) = self.line {
            write!(f, ":{}", line)?;
            if let Some(column) = self.column {
                write!(f, ":{}", column)?;
            }
        }
        Ok(())
    }
}

/// Failure reported by an external transform tool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{tool}: {message}{}", location_suffix(.location))]
pub struct TransformError {
    /// Program that failed (e.g. `sass`).
    pub tool: String,
    pub message: String,
    pub location: Option<SourceLocation>,
}

fn location_suffix(location: &Option<SourceLocation>) -> String {
    match location {
        Some(location) => format!(" ({})", location),
        None => String::new(),
    }
}

impl TransformError {
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// Run-time failure of a single task action.
///
/// These never abort the run: they end the task in `failed` and skip its
/// dependents.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("{0}")]
    Failure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Setup(#[from] Error),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("cancelled")]
    Cancelled,

    /// Tasks of a nested sequence did not succeed; each carries its own
    /// error in the run's result.
    #[error("sequence did not complete: {}", .0.join(", "))]
    Incomplete(Vec<String>),
}

impl ActionError {
    pub fn failure(msg: impl Into<String>) -> Self {
        ActionError::Failure(msg.into())
    }
}

pub type ActionResult = std::result::Result<(), ActionError>;
