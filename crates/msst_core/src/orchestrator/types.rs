//! Core types for pipeline runs.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::models::StageKind;
use crate::process::OutputLine;
use crate::stages::SkippedStage;

/// Event callback type for observing a run.
pub type EventCallback = Box<dyn Fn(&RunEvent) + Send + Sync>;

/// Something that happened during a run, in order.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Validation passed and the first stage is about to start.
    RunStarted { total_files: usize, stages: usize },
    StageStarted {
        index: usize,
        total: usize,
        kind: StageKind,
        command: String,
    },
    Line { kind: StageKind, line: OutputLine },
    StageFinished {
        kind: StageKind,
        exit_code: Option<i32>,
        error_lines: usize,
        elapsed: Duration,
    },
    StageSkipped {
        kind: StageKind,
        model: String,
        reason: String,
    },
    Reorganized {
        kind: StageKind,
        dir: PathBuf,
        moved: usize,
        elapsed: Duration,
    },
    /// Cancellation stopped the run during or before `kind`.
    Cancelled { kind: Option<StageKind> },
}

/// A stage whose worker ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedStage {
    pub kind: StageKind,
    pub label: String,
    pub output_dir: PathBuf,
    pub exit_code: Option<i32>,
    pub error_lines: usize,
    pub reorganized: usize,
    pub elapsed: Duration,
}

/// How a run ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    #[default]
    Completed,
    Cancelled,
    Failed { stage: String, message: String },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
            RunOutcome::Failed { stage, message } => write!(f, "failed at {}: {}", stage, message),
        }
    }
}

/// Totals for one run, handed to the caller at the end.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_name: String,
    /// Files under the input directory, counted recursively before the
    /// first stage.
    pub total_files: usize,
    pub completed: Vec<CompletedStage>,
    #[serde(skip)]
    pub skipped: Vec<SkippedStage>,
    pub error_lines: usize,
    pub duration: Duration,
    pub outcome: RunOutcome,
    pub log_path: Option<PathBuf>,
}

impl RunSummary {
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            ..Self::default()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == RunOutcome::Cancelled
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// `(label, output_dir)` of each completed stage.
    pub fn completed_dirs(&self) -> Vec<(&str, &PathBuf)> {
        self.completed
            .iter()
            .map(|stage| (stage.label.as_str(), &stage.output_dir))
            .collect()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}: {}", self.run_name, self.outcome)?;
        writeln!(f, "  Total files: {}", self.total_files)?;
        for stage in &self.completed {
            writeln!(
                f,
                "  {} -> {} ({:.1}s)",
                stage.label,
                stage.output_dir.display(),
                stage.elapsed.as_secs_f64()
            )?;
        }
        for skip in &self.skipped {
            writeln!(f, "  {} skipped: {}", skip.kind.label(), skip.reason)?;
        }
        writeln!(f, "  Error lines: {}", self.error_lines)?;
        write!(f, "  Total time: {:.1}s", self.duration.as_secs_f64())
    }
}
