//! Archival of working directories into a timestamped tree.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Local;
use thiserror::Error;
use walkdir::WalkDir;

use crate::config::Settings;

/// Format of the per-run timestamp used for collision renames.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Working directories archived by default, in processing order.
///
/// `denoise_results` belongs to an older stage layout and is kept so that
/// existing workspaces are still cleaned up.
pub const DEFAULT_WORKING_DIRS: [&str; 5] = [
    "separation_results",
    "karaoke_results",
    "deverb_results",
    "denoise_results",
    "other_results",
];

/// An archival failure. Processing stops at the first one; files already
/// moved stay where they are.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Path the failure refers to.
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. } => path,
        }
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// What happens to a source directory once its files are moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Emptied in place; the directory itself stays.
    Input,
    /// Removed entirely.
    Working,
}

/// One directory to archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSource {
    pub path: PathBuf,
    /// Subtree name under the archive root.
    pub name: String,
    pub kind: SourceKind,
}

impl ArchiveSource {
    pub fn input(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), SourceKind::Input)
    }

    pub fn working(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), SourceKind::Working)
    }

    fn new(path: PathBuf, kind: SourceKind) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| match kind {
                SourceKind::Input => "input".to_string(),
                SourceKind::Working => "results".to_string(),
            });
        Self { path, name, kind }
    }
}

/// Default sources: every working directory under `work_root`, then the
/// input directory.
pub fn default_sources(work_root: &Path, input_dir: &Path) -> Vec<ArchiveSource> {
    DEFAULT_WORKING_DIRS
        .iter()
        .map(|dir| ArchiveSource::working(work_root.join(dir)))
        .chain(std::iter::once(ArchiveSource::input(input_dir)))
        .collect()
}

/// Progress reported while archiving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEvent {
    RootCreated(PathBuf),
    DestinationCreated(PathBuf),
    SourceMissing(PathBuf),
    /// A destination name was taken; reported before the move.
    Renamed { original: PathBuf, renamed: PathBuf },
    Moved { from: PathBuf, to: PathBuf },
    InputCleared(PathBuf),
    SourceRemoved(PathBuf),
}

impl fmt::Display for ArchiveEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootCreated(p) => write!(f, "Created archive folder: {}", p.display()),
            Self::DestinationCreated(p) => write!(f, "Created destination folder: {}", p.display()),
            Self::SourceMissing(p) => write!(f, "Skipping missing folder: {}", p.display()),
            Self::Renamed { original, renamed } => write!(
                f,
                "{} already exists, saving as {}",
                original.display(),
                renamed.display()
            ),
            Self::Moved { from, to } => write!(f, "Moved {} -> {}", from.display(), to.display()),
            Self::InputCleared(p) => write!(f, "Cleared input folder: {}", p.display()),
            Self::SourceRemoved(p) => write!(f, "Archived and removed: {}", p.display()),
        }
    }
}

/// Summary of one archival run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub timestamp: String,
    pub files_moved: usize,
    pub renamed: usize,
    pub sources: Vec<PathBuf>,
    pub duration: Duration,
}

/// Moves working directories into the archive root.
#[derive(Debug, Clone)]
pub struct Archiver {
    root: PathBuf,
    sources: Vec<ArchiveSource>,
}

impl Archiver {
    pub fn new(root: impl Into<PathBuf>, sources: Vec<ArchiveSource>) -> Self {
        Self {
            root: root.into(),
            sources,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let paths = &settings.paths;
        Self::new(
            paths.archive_dir(),
            default_sources(&paths.work_root(), &paths.input_dir()),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sources(&self) -> &[ArchiveSource] {
        &self.sources
    }

    /// Archive every existing source, stamping collisions with the current
    /// local time.
    pub fn run(&self, on_event: &mut dyn FnMut(&ArchiveEvent)) -> ArchiveResult<ArchiveReport> {
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.run_with_timestamp(&timestamp, on_event)
    }

    /// Archive every existing source using `timestamp` for all collision
    /// renames of this run.
    pub fn run_with_timestamp(
        &self,
        timestamp: &str,
        on_event: &mut dyn FnMut(&ArchiveEvent),
    ) -> ArchiveResult<ArchiveReport> {
        let start = Instant::now();
        let mut report = ArchiveReport {
            timestamp: timestamp.to_string(),
            ..ArchiveReport::default()
        };

        tracing::info!("Archiving into {}", self.root.display());
        if !self.root.exists() {
            fs::create_dir_all(&self.root)
                .map_err(|e| ArchiveError::io("create archive folder", &self.root, e))?;
            on_event(&ArchiveEvent::RootCreated(self.root.clone()));
        }

        for source in &self.sources {
            if !source.path.is_dir() {
                tracing::debug!("Archive source {} absent", source.path.display());
                on_event(&ArchiveEvent::SourceMissing(source.path.clone()));
                continue;
            }
            self.archive_source(source, timestamp, &mut report, on_event)?;
            report.sources.push(source.path.clone());
        }

        report.duration = start.elapsed();
        tracing::info!(
            "Archive finished: {} file(s) moved, {} renamed, {} folder(s)",
            report.files_moved,
            report.renamed,
            report.sources.len()
        );
        Ok(report)
    }

    fn archive_source(
        &self,
        source: &ArchiveSource,
        timestamp: &str,
        report: &mut ArchiveReport,
        on_event: &mut dyn FnMut(&ArchiveEvent),
    ) -> ArchiveResult<()> {
        let dest_root = self.root.join(&source.name);
        if !dest_root.exists() {
            fs::create_dir_all(&dest_root)
                .map_err(|e| ArchiveError::io("create destination folder", &dest_root, e))?;
            on_event(&ArchiveEvent::DestinationCreated(dest_root.clone()));
        }

        // Collect before moving so the walk is not affected by the moves.
        let entries: Vec<walkdir::DirEntry> = WalkDir::new(&source.path)
            .min_depth(1)
            .into_iter()
            .collect::<Result<_, _>>()
            .map_err(|e| {
                let path = e.path().unwrap_or(&source.path).to_path_buf();
                ArchiveError::io("read", &path, io::Error::from(e))
            })?;

        for entry in entries {
            let relative = entry
                .path()
                .strip_prefix(&source.path)
                .unwrap_or(entry.path());
            let target = dest_root.join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)
                    .map_err(|e| ArchiveError::io("create destination folder", &target, e))?;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| ArchiveError::io("create destination folder", parent, e))?;
            }

            let final_target = if target.exists() {
                let renamed = collision_free_name(&target, timestamp);
                on_event(&ArchiveEvent::Renamed {
                    original: target.clone(),
                    renamed: renamed.clone(),
                });
                report.renamed += 1;
                renamed
            } else {
                target
            };

            move_file(entry.path(), &final_target)
                .map_err(|e| ArchiveError::io("move", entry.path(), e))?;
            report.files_moved += 1;
            on_event(&ArchiveEvent::Moved {
                from: entry.path().to_path_buf(),
                to: final_target,
            });
        }

        match source.kind {
            SourceKind::Input => {
                clear_dir(&source.path)
                    .map_err(|e| ArchiveError::io("clear", &source.path, e))?;
                on_event(&ArchiveEvent::InputCleared(source.path.clone()));
            }
            SourceKind::Working => {
                fs::remove_dir_all(&source.path)
                    .map_err(|e| ArchiveError::io("remove", &source.path, e))?;
                on_event(&ArchiveEvent::SourceRemoved(source.path.clone()));
            }
        }
        Ok(())
    }
}

/// `<stem>_<timestamp><.ext>` next to `target`, with a counter appended if
/// that name is taken too.
fn collision_free_name(target: &Path, timestamp: &str) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = target
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = target.parent().unwrap_or_else(|| Path::new(""));

    let candidate = parent.join(format!("{}_{}{}", stem, timestamp, ext));
    if !candidate.exists() {
        return candidate;
    }

    (1..)
        .map(|n| parent.join(format!("{}_{}_{}{}", stem, timestamp, n, ext)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Rename, falling back to copy and remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!(
                "rename {} failed ({}), copying instead",
                from.display(),
                rename_err
            );
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Remove everything inside `dir`, keeping `dir`.
fn clear_dir(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TS: &str = "20240102_030405";

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn archiver(root: &Path) -> Archiver {
        Archiver::new(
            root.join("archive"),
            default_sources(root, &root.join("input")),
        )
    }

    #[test]
    fn moves_and_applies_directory_policy() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("input/song.wav"), "in");
        write(&root.join("input/sub/other.wav"), "in2");
        write(&root.join("separation_results/song_vocals.wav"), "v");
        write(&root.join("separation_results/instrumental/song_instrumental.wav"), "i");

        let mut events = Vec::new();
        let report = archiver(root)
            .run_with_timestamp(TS, &mut |e| events.push(e.clone()))
            .unwrap();

        assert_eq!(report.files_moved, 4);
        assert_eq!(report.renamed, 0);
        assert!(root.join("input").is_dir());
        assert_eq!(fs::read_dir(root.join("input")).unwrap().count(), 0);
        assert!(!root.join("separation_results").exists());

        let archive = root.join("archive");
        assert!(archive.join("input/song.wav").exists());
        assert!(archive.join("input/sub/other.wav").exists());
        assert!(archive
            .join("separation_results/instrumental/song_instrumental.wav")
            .exists());

        assert!(matches!(events[0], ArchiveEvent::RootCreated(_)));
        assert!(events.iter().any(|e| matches!(e, ArchiveEvent::InputCleared(_))));
        assert!(events.iter().any(|e| matches!(e, ArchiveEvent::SourceMissing(_))));
    }

    #[test]
    fn collision_renames_with_run_timestamp() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("archive/other_results/take.wav"), "old");
        write(&root.join("other_results/take.wav"), "new");

        let mut events = Vec::new();
        let report = archiver(root)
            .run_with_timestamp(TS, &mut |e| events.push(e.clone()))
            .unwrap();

        let dest = root.join("archive/other_results");
        let renamed = dest.join(format!("take_{}.wav", TS));
        assert_eq!(report.renamed, 1);
        assert_eq!(fs::read_to_string(dest.join("take.wav")).unwrap(), "old");
        assert_eq!(fs::read_to_string(&renamed).unwrap(), "new");

        let rename_idx = events
            .iter()
            .position(|e| matches!(e, ArchiveEvent::Renamed { .. }))
            .unwrap();
        let move_idx = events
            .iter()
            .position(|e| matches!(e, ArchiveEvent::Moved { .. }))
            .unwrap();
        assert!(rename_idx < move_idx);
    }

    #[test]
    fn repeated_collision_gets_counter() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("archive/input/a.wav"), "1");
        write(&root.join(format!("archive/input/a_{}.wav", TS)), "2");
        write(&root.join("input/a.wav"), "3");

        archiver(root).run_with_timestamp(TS, &mut |_| {}).unwrap();

        let third = root.join(format!("archive/input/a_{}_1.wav", TS));
        assert_eq!(fs::read_to_string(third).unwrap(), "3");
    }

    #[test]
    fn collision_name_without_extension() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("README");
        assert_eq!(
            collision_free_name(&target, TS),
            dir.path().join(format!("README_{}", TS))
        );
        let dotted = dir.path().join("mix.final.flac");
        assert_eq!(
            collision_free_name(&dotted, TS),
            dir.path().join(format!("mix.final_{}.flac", TS))
        );
    }

    #[test]
    fn processes_sources_in_fixed_order() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        for name in ["other_results", "karaoke_results", "separation_results"] {
            write(&root.join(name).join("f.wav"), name);
        }

        let report = archiver(root).run_with_timestamp(TS, &mut |_| {}).unwrap();
        let names: Vec<_> = report
            .sources
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["separation_results", "karaoke_results", "other_results"]);
    }

    #[cfg(unix)]
    #[test]
    fn io_failure_halts_and_names_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let root = dir.path();
        write(&root.join("separation_results/a.wav"), "a");
        write(&root.join("karaoke_results/b.wav"), "b");
        // A read-only destination makes the karaoke move fail.
        let blocked = root.join("archive/karaoke_results");
        fs::create_dir_all(&blocked).unwrap();
        fs::set_permissions(&blocked, fs::Permissions::from_mode(0o555)).unwrap();

        let result = archiver(root).run_with_timestamp(TS, &mut |_| {});
        fs::set_permissions(&blocked, fs::Permissions::from_mode(0o755)).unwrap();

        // Running as root ignores permissions; nothing to assert then.
        if let Err(err) = result {
            assert!(err.path().ends_with("karaoke_results/b.wav"));
            assert!(root.join("archive/separation_results/a.wav").exists());
            assert!(root.join("karaoke_results/b.wav").exists());
        }
    }
}
