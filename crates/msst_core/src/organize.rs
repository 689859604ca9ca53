//! Post-stage output reorganization.
//!
//! Workers write every stem into their output directory. Instrumental and
//! aspiration variants are moved into an `instrumental` subdirectory so the
//! next stage only sees the stems it should process.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Subdirectory receiving reorganized files.
pub const INSTRUMENTAL_DIR: &str = "instrumental";

/// Lowercase file name fragments that mark a file for reorganization.
pub const INSTRUMENTAL_MARKERS: [&str; 2] = ["_instrumental", "_aspiration"];

/// Result of one reorganization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reorganized {
    pub dir: PathBuf,
    pub moved: usize,
    pub elapsed: Duration,
}

/// Whether a file name carries one of the markers, ignoring case.
pub fn has_instrumental_marker(name: &str) -> bool {
    let lower = name.to_lowercase();
    INSTRUMENTAL_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Move marked files directly inside `output_dir` into its
/// [`INSTRUMENTAL_DIR`] subdirectory.
///
/// A missing directory moves nothing and creates nothing.
pub fn reorganize(output_dir: &Path) -> io::Result<Reorganized> {
    let start = Instant::now();

    if !output_dir.is_dir() {
        tracing::debug!(
            "Nothing to reorganize, {} does not exist",
            output_dir.display()
        );
        return Ok(Reorganized {
            dir: output_dir.to_path_buf(),
            moved: 0,
            elapsed: start.elapsed(),
        });
    }

    let dest_dir = output_dir.join(INSTRUMENTAL_DIR);
    fs::create_dir_all(&dest_dir)?;

    let mut moved = 0;
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if !has_instrumental_marker(&name.to_string_lossy()) {
            continue;
        }

        fs::rename(entry.path(), dest_dir.join(&name))?;
        moved += 1;
    }

    let elapsed = start.elapsed();
    tracing::info!(
        "Organized {} instrumental file(s) in {} ({:.2}s)",
        moved,
        output_dir.display(),
        elapsed.as_secs_f64()
    );

    Ok(Reorganized {
        dir: output_dir.to_path_buf(),
        moved,
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::write(path, b"audio").unwrap();
    }

    #[test]
    fn moves_only_marked_files() {
        let dir = tempdir().unwrap();
        let out = dir.path();
        touch(&out.join("song_vocals.wav"));
        touch(&out.join("song_instrumental.wav"));
        touch(&out.join("Song_Aspiration.flac"));
        fs::create_dir(out.join("nested_instrumental")).unwrap();

        let result = reorganize(out).unwrap();

        assert_eq!(result.moved, 2);
        assert!(out.join("song_vocals.wav").exists());
        assert!(out.join(INSTRUMENTAL_DIR).join("song_instrumental.wav").exists());
        assert!(out.join(INSTRUMENTAL_DIR).join("Song_Aspiration.flac").exists());
        assert!(out.join("nested_instrumental").is_dir());
    }

    #[test]
    fn second_pass_moves_nothing() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("a_instrumental.wav"));
        touch(&dir.path().join("b_other.wav"));

        assert_eq!(reorganize(dir.path()).unwrap().moved, 1);
        assert_eq!(reorganize(dir.path()).unwrap().moved, 0);
        assert!(dir.path().join("b_other.wav").exists());
    }

    #[test]
    fn missing_dir_is_not_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("separation_results");

        let result = reorganize(&missing).unwrap();
        assert_eq!(result.moved, 0);
        assert!(!missing.exists());
    }

    #[test]
    fn empty_dir_moves_nothing() {
        let dir = tempdir().unwrap();
        assert_eq!(reorganize(dir.path()).unwrap().moved, 0);
        assert!(dir.path().join(INSTRUMENTAL_DIR).is_dir());
    }

    #[test]
    fn marker_match_ignores_case() {
        assert!(has_instrumental_marker("X_INSTRUMENTAL.wav"));
        assert!(!has_instrumental_marker("instrumental.wav"));
    }
}
