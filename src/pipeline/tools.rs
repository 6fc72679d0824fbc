//! External transform programs.
//!
//! A [`ToolCommand`] is an argument vector from configuration with
//! `{placeholder}` slots. Running it pipes optional input to stdin and
//! collects stdout; a non-zero exit becomes a [`TransformError`] carrying
//! the tool's first error line and, when the tool printed one, the source
//! location.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

use crate::error::{Error, Result, SourceLocation, TransformError};
use crate::{pwlog_debug, pwlog_trace};

/// `path line:col` (sass) or `path:line:col` (postcss, cleancss).
static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)(?:^|\s)(?P<file>[^\s:]*\.[^\s:]+)(?::|\s+)(?P<line>\d+):(?P<col>\d+)")
        .unwrap()
});

/// Values substituted into `{name}` slots.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: Vec<(String, String)>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.push((name.to_string(), value.into()));
        self
    }

    pub fn with_path(self, name: &str, path: &Path) -> Self {
        self.with(name, path.to_string_lossy())
    }

    fn apply(&self, arg: &str) -> String {
        self.values.iter().fold(arg.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{}}}", name), value)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
}

impl ToolCommand {
    /// Build from a configured argument vector; the first element is the
    /// program.
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .filter(|(program, _)| !program.trim().is_empty())
            .ok_or_else(|| Error::Validation("tool command needs a program".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            envs: Vec::new(),
            cwd: None,
        })
    }

    pub fn with_env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Short name used in error messages, e.g. `sass` for `/usr/bin/sass`.
    pub fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }

    /// Arguments with placeholders substituted.
    pub fn render(&self, vars: &Placeholders) -> Vec<String> {
        self.args.iter().map(|a| vars.apply(a)).collect()
    }

    fn command(&self, vars: &Placeholders) -> Command {
        let mut cmd = Command::new(vars.apply(&self.program));
        cmd.args(self.render(vars));
        cmd.envs(self.envs.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run to completion, feeding `input` on stdin, and return stdout.
    pub async fn run(
        &self,
        vars: &Placeholders,
        input: Option<&[u8]>,
    ) -> std::result::Result<Vec<u8>, TransformError> {
        let tool = self.tool_name();
        let mut cmd = self.command(vars);
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        pwlog_trace!("Running {} {:?}", self.program, self.render(vars));
        let mut child = cmd
            .spawn()
            .map_err(|e| TransformError::new(&tool, format!("failed to launch: {}", e)))?;

        let stdin = child.stdin.take();
        let input = input.map(<[u8]>::to_vec);
        let feed = async move {
            if let (Some(mut stdin), Some(bytes)) = (stdin, input) {
                // A tool may exit without reading all of its input; its exit
                // status is what counts.
                if let Err(e) = stdin.write_all(&bytes).await {
                    pwlog_debug!("stdin write failed: {}", e);
                }
            }
        };
        let (_, output) = tokio::join!(feed, child.wait_with_output());
        let output =
            output.map_err(|e| TransformError::new(&tool, format!("failed to wait: {}", e)))?;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        pwlog_debug!("{} stderr:\n{}", tool, stderr);
        let message = first_error_line(&stderr)
            .unwrap_or_else(|| format!("exited with {}", output.status));
        let mut error = TransformError::new(tool, message);
        if let Some(location) = parse_location(&stderr) {
            error = error.with_location(location);
        }
        Err(error)
    }

    /// Start a long-lived process with inherited output; it is killed when
    /// the returned child is dropped.
    pub fn spawn(&self, vars: &Placeholders) -> std::result::Result<Child, TransformError> {
        let mut cmd = self.command(vars);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd.spawn().map_err(|e| {
            TransformError::new(self.tool_name(), format!("failed to launch: {}", e))
        })
    }
}

fn first_error_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.strip_prefix("Error: ").unwrap_or(l).to_string())
}

/// Source location mentioned in a tool's error output.
pub fn parse_location(stderr: &str) -> Option<SourceLocation> {
    let caps = LOCATION_RE.captures(stderr)?;
    Some(SourceLocation {
        file: PathBuf::from(&caps["file"]),
        line: caps["line"].parse().ok(),
        column: caps["col"].parse().ok(),
    })
}
