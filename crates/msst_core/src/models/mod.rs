//! Data models: stage kinds, line classification enums, the model registry
//! and presets.

mod enums;
mod preset;
mod registry;
mod selection;

pub use enums::{LineKind, Severity, StageKind};
pub use preset::{Preset, PresetError, PresetStore};
pub use registry::{ModelRegistry, RegistryError, ResolvedModel, UNKNOWN_MODEL_TYPE};
pub use selection::{is_disabled_id, InferenceFlags, ModelSelection};
