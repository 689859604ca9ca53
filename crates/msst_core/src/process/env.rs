//! Worker search path augmentation.

use std::env::{self, JoinPathsError};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

/// Directories of the interpreter's environment the worker may need on
/// `PATH`: `<env>/Scripts`, `<env>/bin` and `<env>` itself.
///
/// A bare interpreter name such as `python` has no environment directory.
pub fn interpreter_search_dirs(interpreter: &Path) -> Vec<PathBuf> {
    match interpreter.parent() {
        Some(env_dir) if !env_dir.as_os_str().is_empty() => vec![
            env_dir.join("Scripts"),
            env_dir.join("bin"),
            env_dir.to_path_buf(),
        ],
        _ => Vec::new(),
    }
}

/// Prepend the interpreter's environment directories to `current`, skipping
/// segments already present.
pub fn augment_search_path(
    interpreter: &Path,
    current: Option<&OsStr>,
) -> Result<OsString, JoinPathsError> {
    let existing: Vec<PathBuf> = current.map(|p| env::split_paths(p).collect()).unwrap_or_default();

    let mut segments: Vec<PathBuf> = Vec::with_capacity(existing.len() + 3);
    for dir in interpreter_search_dirs(interpreter) {
        if !existing.contains(&dir) && !segments.contains(&dir) {
            segments.push(dir);
        }
    }
    segments.extend(existing);

    env::join_paths(segments)
}
