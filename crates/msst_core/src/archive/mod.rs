//! Archival of results and inputs.
//!
//! Moves each working directory into `<archive>/<name>/...`, mirroring its
//! layout. Name collisions are resolved by stamping the file with the run's
//! timestamp. Afterwards the input directory is emptied and the other
//! directories are removed.

mod archiver;

pub use archiver::{
    default_sources, ArchiveError, ArchiveEvent, ArchiveReport, ArchiveResult, ArchiveSource,
    Archiver, SourceKind, DEFAULT_WORKING_DIRS, TIMESTAMP_FORMAT,
};
