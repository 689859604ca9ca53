//! Core enums used throughout the orchestrator.

use serde::{Deserialize, Serialize};

/// One category of external audio processing.
///
/// Variants are declared in pipeline order; [`StageKind::ORDER`] is the
/// order the chain builder folds over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Vocal/instrumental separation.
    Vocal,
    /// Karaoke (lead vs. harmony) separation.
    Karaoke,
    /// Reverb removal.
    Reverb,
    /// Denoise, restoration, aspiration and other models.
    Other,
}

impl StageKind {
    /// All stage kinds, in execution order.
    pub const ORDER: [StageKind; 4] = [
        StageKind::Vocal,
        StageKind::Karaoke,
        StageKind::Reverb,
        StageKind::Other,
    ];

    /// Fixed output directory name, relative to the work root.
    pub fn output_dir_name(&self) -> &'static str {
        match self {
            StageKind::Vocal => "separation_results",
            StageKind::Karaoke => "karaoke_results",
            StageKind::Reverb => "deverb_results",
            StageKind::Other => "other_results",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Vocal => "Vocal Model",
            StageKind::Karaoke => "Karaoke Model",
            StageKind::Reverb => "Reverb Model",
            StageKind::Other => "Other Model",
        }
    }

    /// Key of this category's model map in the registry document.
    pub fn category_key(&self) -> &'static str {
        match self {
            StageKind::Vocal => "vocal_models",
            StageKind::Karaoke => "kara_models",
            StageKind::Reverb => "reverb_models",
            StageKind::Other => "other_models",
        }
    }

    /// Parse a user-facing name (`vocal`, `kara`, `vocal_models`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        StageKind::ORDER.into_iter().find(|kind| {
            lower == kind.to_string()
                || lower == kind.category_key()
                || (*kind == StageKind::Karaoke && lower == "kara")
        })
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Vocal => write!(f, "vocal"),
            StageKind::Karaoke => write!(f, "karaoke"),
            StageKind::Reverb => write!(f, "reverb"),
            StageKind::Other => write!(f, "other"),
        }
    }
}

/// Whether a worker line redraws the previous line or is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// Transient progress update (overwrite the last displayed line).
    Progress,
    /// Discrete log line (append).
    Discrete,
}

/// Severity derived from a worker line's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Normal,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Normal => write!(f, "normal"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_matches_declaration() {
        let mut sorted = StageKind::ORDER;
        sorted.sort();
        assert_eq!(sorted, StageKind::ORDER);
    }

    #[test]
    fn output_dirs_are_distinct() {
        let mut dirs: Vec<_> = StageKind::ORDER.iter().map(|k| k.output_dir_name()).collect();
        dirs.dedup();
        assert_eq!(dirs.len(), 4);
    }

    #[test]
    fn from_name_accepts_aliases() {
        assert_eq!(StageKind::from_name("vocal"), Some(StageKind::Vocal));
        assert_eq!(StageKind::from_name("Kara"), Some(StageKind::Karaoke));
        assert_eq!(StageKind::from_name("reverb_models"), Some(StageKind::Reverb));
        assert_eq!(StageKind::from_name("drums"), None);
    }

    #[test]
    fn stage_kind_serializes_lowercase() {
        let json = serde_json::to_string(&StageKind::Karaoke).unwrap();
        assert_eq!(json, "\"karaoke\"");
    }
}
