//! Named presets: a saved model selection plus inference flags.
//!
//! One JSON file per preset. A disabled category is written as `false`;
//! `false`, `null`, `"None"` and an empty string are all read as disabled.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::selection::{is_disabled_id, InferenceFlags, ModelSelection};

const PRESET_EXTENSION: &str = "json";

/// Errors from preset storage.
#[derive(Error, Debug)]
pub enum PresetError {
    #[error("Preset I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid preset file {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid preset name: '{0}'")]
    InvalidName(String),

    #[error("Preset not found: {0}")]
    NotFound(String),
}

/// A saved selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default, with = "disabled_as_false")]
    pub vocal_model_name: Option<String>,
    #[serde(default, with = "disabled_as_false")]
    pub kara_model_name: Option<String>,
    #[serde(default, with = "disabled_as_false")]
    pub reverb_model_name: Option<String>,
    #[serde(default, with = "disabled_as_false")]
    pub other_model_name: Option<String>,
    #[serde(default = "default_true")]
    pub if_fast: bool,
    #[serde(default)]
    pub force_cpu: bool,
    #[serde(default)]
    pub use_tta: bool,
    #[serde(default)]
    pub preset_name: String,
}

fn default_true() -> bool {
    true
}

impl Preset {
    pub fn new(name: impl Into<String>, selection: &ModelSelection, flags: InferenceFlags) -> Self {
        Self {
            vocal_model_name: selection.vocal.clone(),
            kara_model_name: selection.karaoke.clone(),
            reverb_model_name: selection.reverb.clone(),
            other_model_name: selection.other.clone(),
            if_fast: flags.fast,
            force_cpu: flags.force_cpu,
            use_tta: flags.use_tta,
            preset_name: name.into(),
        }
    }

    pub fn selection(&self) -> ModelSelection {
        ModelSelection {
            vocal: self.vocal_model_name.clone(),
            karaoke: self.kara_model_name.clone(),
            reverb: self.reverb_model_name.clone(),
            other: self.other_model_name.clone(),
        }
    }

    pub fn flags(&self) -> InferenceFlags {
        InferenceFlags {
            fast: self.if_fast,
            force_cpu: self.force_cpu,
            use_tta: self.use_tta,
        }
    }
}

mod disabled_as_false {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Flag(bool),
        Name(String),
    }

    pub fn serialize<S: Serializer>(
        value: &Option<String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(model) => serializer.serialize_str(model),
            None => serializer.serialize_bool(false),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        match Option::<Raw>::deserialize(deserializer)? {
            None | Some(Raw::Flag(false)) => Ok(None),
            Some(Raw::Flag(true)) => Err(serde::de::Error::custom(
                "expected a model name or false, found true",
            )),
            Some(Raw::Name(name)) if is_disabled_id(&name) => Ok(None),
            Some(Raw::Name(name)) => Ok(Some(name)),
        }
    }
}

/// Folder of preset files.
#[derive(Debug, Clone)]
pub struct PresetStore {
    dir: PathBuf,
}

impl PresetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing a preset name.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, PresetError> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}.{}", name.trim(), PRESET_EXTENSION)))
    }

    /// Preset names, sorted. A missing folder has no presets.
    pub fn list(&self) -> Result<Vec<String>, PresetError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|source| PresetError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(PRESET_EXTENSION)
            })
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn load(&self, name: &str) -> Result<Preset, PresetError> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(PresetError::NotFound(name.to_string()));
        }

        let content = fs::read_to_string(&path).map_err(|source| PresetError::Io {
            path: path.clone(),
            source,
        })?;
        let mut preset: Preset =
            serde_json::from_str(&content).map_err(|source| PresetError::Json { path, source })?;
        if preset.preset_name.is_empty() {
            preset.preset_name = name.trim().to_string();
        }
        Ok(preset)
    }

    /// Write a preset under its `preset_name`, creating the folder if needed.
    pub fn save(&self, preset: &Preset) -> Result<PathBuf, PresetError> {
        let path = self.path_for(&preset.preset_name)?;

        fs::create_dir_all(&self.dir).map_err(|source| PresetError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let content = serde_json::to_string_pretty(preset).map_err(|source| PresetError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, content).map_err(|source| PresetError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!("Saved preset '{}' to {}", preset.preset_name, path.display());
        Ok(path)
    }

    pub fn delete(&self, name: &str) -> Result<(), PresetError> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(PresetError::NotFound(name.to_string()));
        }
        fs::remove_file(&path).map_err(|source| PresetError::Io { path, source })?;
        tracing::info!("Deleted preset '{}'", name);
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), PresetError> {
    let trimmed = name.trim();
    let bad = trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\', ':', '*', '?', '"', '<', '>', '|']);
    if bad {
        return Err(PresetError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StageKind;
    use tempfile::tempdir;

    fn sample() -> Preset {
        let selection = ModelSelection::none()
            .with(StageKind::Vocal, "MelBandRoformer_kim.ckpt")
            .with(StageKind::Reverb, "deverb_bs_roformer_8_256dim_8depth.ckpt");
        Preset::new(
            "vocals_and_deverb",
            &selection,
            InferenceFlags {
                fast: false,
                force_cpu: true,
                use_tta: false,
            },
        )
    }

    #[test]
    fn disabled_categories_written_as_false() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["kara_model_name"], serde_json::Value::Bool(false));
        assert_eq!(json["vocal_model_name"], "MelBandRoformer_kim.ckpt");
    }

    #[test]
    fn reads_every_disabled_form() {
        let preset: Preset = serde_json::from_str(
            r#"{
                "vocal_model_name": "None",
                "kara_model_name": false,
                "reverb_model_name": null,
                "preset_name": "empty"
            }"#,
        )
        .unwrap();
        assert!(preset.selection().is_empty());
        assert!(preset.if_fast);
        assert!(!preset.use_tta);
    }

    #[test]
    fn rejects_true_as_model() {
        let result: Result<Preset, _> = serde_json::from_str(r#"{"vocal_model_name": true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn save_load_list_delete() {
        let dir = tempdir().unwrap();
        let store = PresetStore::new(dir.path().join("presets"));
        assert!(store.list().unwrap().is_empty());

        let preset = sample();
        store.save(&preset).unwrap();
        let mut other = sample();
        other.preset_name = "a_first".to_string();
        store.save(&other).unwrap();

        assert_eq!(store.list().unwrap(), vec!["a_first", "vocals_and_deverb"]);

        let loaded = store.load("vocals_and_deverb").unwrap();
        assert_eq!(loaded, preset);
        assert_eq!(loaded.selection().enabled_count(), 2);
        assert!(loaded.flags().force_cpu);

        store.delete("a_first").unwrap();
        assert_eq!(store.list().unwrap(), vec!["vocals_and_deverb"]);
        assert!(matches!(store.delete("a_first"), Err(PresetError::NotFound(_))));
    }

    #[test]
    fn load_fills_missing_name_from_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("legacy.json"), r#"{"if_fast": false}"#).unwrap();

        let preset = PresetStore::new(dir.path()).load("legacy").unwrap();
        assert_eq!(preset.preset_name, "legacy");
        assert!(!preset.if_fast);
    }

    #[test]
    fn rejects_path_like_names() {
        let store = PresetStore::new("presets");
        assert!(matches!(store.path_for(""), Err(PresetError::InvalidName(_))));
        assert!(matches!(store.path_for("../x"), Err(PresetError::InvalidName(_))));
        assert!(store.path_for("night mix").is_ok());
    }
}
