//! Process supervision errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Worker output pipe unavailable: {0}")]
    Pipe(&'static str),

    #[error("Failed waiting for worker (pid {pid}): {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    pub fn spawn(program: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }
}

pub type ProcessResult<T> = Result<T, ProcessError>;
