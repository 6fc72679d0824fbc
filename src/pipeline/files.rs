//! File collaborator: glob expansion and output placement.
//!
//! Outputs keep their path relative to the glob base of the pattern that
//! found them, so `app/frontend/css/main.scss` found by
//! `**/frontend/**/*.scss` lands at `<dest>/app/frontend/css/main.css`.

use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::pwlog_debug;
use crate::util::{blocking, expand_braces};

pub use crate::util::glob_base;

/// Files matching any pattern, sorted and de-duplicated.
///
/// Brace alternatives (`*.{scss,sass}`) are expanded first. Directories
/// are left out.
pub fn expand<P: AsRef<str>>(patterns: &[P]) -> Result<Vec<PathBuf>> {
    let mut found = BTreeSet::new();
    for pattern in patterns {
        for alternative in expand_braces(pattern.as_ref()) {
            for entry in glob::glob(&alternative)? {
                let path = entry.map_err(|e| Error::Io(e.into()))?;
                if path.is_file() {
                    found.insert(path);
                }
            }
        }
    }
    Ok(found.into_iter().collect())
}

/// [`expand`] off the async runtime.
pub async fn expand_async(patterns: Vec<String>) -> Result<Vec<PathBuf>> {
    blocking(move || expand(&patterns)).await
}

/// Drop leading `.` components so `./a` and `a` compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Path of `file` below `base`, or just its file name when it lies outside.
pub fn relative_to_base(file: &Path, base: &Path) -> PathBuf {
    let file = normalize(file);
    let base = normalize(base);
    match file.strip_prefix(&base) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => file.file_name().map(PathBuf::from).unwrap_or(file.clone()),
    }
}

/// Stylesheet partials (`_name.scss`) are only ever imported.
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('_'))
}

/// Write `bytes` to `dest/relative`, creating parent directories.
pub async fn write_output(dest: &Path, relative: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    let target = dest.join(relative);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, bytes).await?;
    pwlog_debug!("Wrote {}", target.display());
    Ok(target)
}

/// Copy every file matching `pattern` into `dest`, keeping paths relative
/// to the pattern's base. Returns the number of files copied.
pub async fn copy_matching(pattern: &str, dest: &Path) -> Result<usize> {
    let base = glob_base(pattern);
    let files = expand_async(vec![pattern.to_string()]).await?;
    for file in &files {
        let target = dest.join(relative_to_base(file, &base));
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(file, &target).await?;
    }
    pwlog_debug!("Copied {} file(s) to {}", files.len(), dest.display());
    Ok(files.len())
}

/// Remove a file or directory tree. A missing path is not an error.
pub async fn remove(path: &Path) -> io::Result<()> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await?;
    } else {
        tokio::fs::remove_file(path).await?;
    }
    pwlog_debug!("Removed {}", path.display());
    Ok(())
}

/// Remove every file matching `pattern`. Returns the number removed.
pub async fn remove_matching(pattern: &str) -> Result<usize> {
    let files = expand_async(vec![pattern.to_string()]).await?;
    for file in &files {
        remove(file).await?;
    }
    Ok(files.len())
}
