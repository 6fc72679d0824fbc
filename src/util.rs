//! Shared utility functions.

use std::any::Any;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tokio::task::spawn_blocking;

use crate::{Error, Result};

/// Run blocking filesystem work (glob walks, tree removal) off the runtime.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Expand `{a,b}` alternatives, which the glob crate does not understand.
///
/// Nested groups are expanded left to right. An unclosed `{` is kept
/// literally.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0;
    let mut close = None;
    let mut splits = Vec::new();
    for (i, c) in pattern[open..].char_indices() {
        let i = open + i;
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(i),
            _ => {}
        }
    }

    let Some(close) = close else {
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    bounds
        .windows(2)
        .flat_map(|w| {
            let alternative = &pattern[w[0] + 1..w[1]];
            expand_braces(&format!("{}{}{}", prefix, alternative, suffix))
        })
        .collect()
}

/// Literal directory prefix of a glob, like gulp's base.
///
/// `app/**/frontend/*.scss` has base `app`; a pattern without wildcards has
/// its parent directory as base. An empty base is `.`.
pub fn glob_base(pattern: &str) -> PathBuf {
    let components: Vec<Component> = Path::new(pattern).components().collect();
    let magic = components
        .iter()
        .position(|c| is_magic(&c.as_os_str().to_string_lossy()));
    let literal = match magic {
        Some(i) => &components[..i],
        None => &components[..components.len().saturating_sub(1)],
    };
    let base: PathBuf = literal.iter().collect();
    if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    }
}

fn is_magic(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

/// Human duration in the style of `Finished 'sass' after 1.2 s`.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{} ms", millis)
    } else {
        format!("{:.1} s", duration.as_secs_f64())
    }
}

/// Message carried by a panic payload, if it is a string.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
