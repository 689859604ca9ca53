//! Error types for the orchestrator.
//!
//! Stage-level problems do not surface here: misconfigured models become
//! skipped stages, worker exit codes are recorded in the summary, and a
//! worker that cannot be spawned ends the run with a failed outcome.
//! These errors are for runs that cannot start, and for the session's
//! subsystem operations.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::models::{PresetError, RegistryError};

/// Top-level orchestrator error with run context.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input validation failed before any worker was started.
    #[error("Run '{run_name}' failed validation: {message}")]
    ValidationFailed { run_name: String, message: String },

    /// Another run or an archival is in progress.
    #[error("Cannot start {requested}: {active} is in progress")]
    Busy {
        requested: &'static str,
        active: &'static str,
    },

    /// The run thread panicked.
    #[error("Run '{run_name}' worker thread panicked")]
    WorkerPanicked { run_name: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Preset(#[from] PresetError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl PipelineError {
    /// Create a validation failed error.
    pub fn validation_failed(run_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            run_name: run_name.into(),
            message: message.into(),
        }
    }

    pub fn busy(requested: &'static str, active: &'static str) -> Self {
        Self::Busy { requested, active }
    }
}

/// Result type for orchestrator operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_run() {
        let err = PipelineError::validation_failed("run_20240101_000000", "Input folder is empty");
        let msg = err.to_string();
        assert!(msg.contains("run_20240101_000000"));
        assert!(msg.contains("Input folder is empty"));
    }

    #[test]
    fn busy_error_names_both_operations() {
        let msg = PipelineError::busy("archive", "a pipeline run").to_string();
        assert_eq!(msg, "Cannot start archive: a pipeline run is in progress");
    }
}
