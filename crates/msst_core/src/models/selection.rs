//! Per-run model selection and inference flags.

use serde::{Deserialize, Serialize};

use super::enums::StageKind;

/// Selected model identifier per stage category. `None` disables the stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub vocal: Option<String>,
    pub karaoke: Option<String>,
    pub reverb: Option<String>,
    pub other: Option<String>,
}

impl ModelSelection {
    /// Selection with nothing enabled.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: StageKind) -> Option<&str> {
        match kind {
            StageKind::Vocal => self.vocal.as_deref(),
            StageKind::Karaoke => self.karaoke.as_deref(),
            StageKind::Reverb => self.reverb.as_deref(),
            StageKind::Other => self.other.as_deref(),
        }
    }

    /// Set or clear a stage's model. Disabled sentinels (`None`, empty) clear it.
    pub fn set(&mut self, kind: StageKind, model: Option<String>) {
        let model = model.filter(|m| !is_disabled_id(m));
        match kind {
            StageKind::Vocal => self.vocal = model,
            StageKind::Karaoke => self.karaoke = model,
            StageKind::Reverb => self.reverb = model,
            StageKind::Other => self.other = model,
        }
    }

    /// Builder-style [`ModelSelection::set`].
    pub fn with(mut self, kind: StageKind, model: impl Into<String>) -> Self {
        self.set(kind, Some(model.into()));
        self
    }

    /// Number of categories with a model selected.
    pub fn enabled_count(&self) -> usize {
        StageKind::ORDER
            .iter()
            .filter(|kind| self.get(**kind).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled_count() == 0
    }
}

/// Flags applied to every stage of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceFlags {
    /// Use the fast config variant of each model.
    pub fast: bool,
    /// Pass `--force_cpu` to the worker.
    pub force_cpu: bool,
    /// Pass `--use_tta` (test-time augmentation) to the worker.
    pub use_tta: bool,
}

impl Default for InferenceFlags {
    fn default() -> Self {
        Self {
            fast: true,
            force_cpu: false,
            use_tta: false,
        }
    }
}

/// Whether a model identifier means "stage disabled".
pub fn is_disabled_id(id: &str) -> bool {
    let id = id.trim();
    id.is_empty() || id.eq_ignore_ascii_case("none")
}
