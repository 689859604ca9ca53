//! Worker output line classification.

use serde::Serialize;

use crate::models::{LineKind, Severity};

/// Suffix tqdm-style progress bars print after the iteration rate.
pub const PROGRESS_MARKER: &str = "it/s]";

/// Classification of one worker line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineClass {
    pub kind: LineKind,
    pub severity: Severity,
}

impl LineClass {
    pub fn is_progress(&self) -> bool {
        self.kind == LineKind::Progress
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Classify a raw worker line.
///
/// Progress when the line starts with `\r` or carries the iteration-rate
/// marker. Severity matches `error`, then `warning`, anywhere in the line,
/// ignoring case.
pub fn classify(line: &str) -> LineClass {
    let kind = if line.starts_with('\r') || line.contains(PROGRESS_MARKER) {
        LineKind::Progress
    } else {
        LineKind::Discrete
    };

    let lower = line.to_lowercase();
    let severity = if lower.contains("error") {
        Severity::Error
    } else if lower.contains("warning") {
        Severity::Warning
    } else {
        Severity::Normal
    };

    LineClass { kind, severity }
}
