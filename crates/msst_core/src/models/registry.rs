//! Model registry: which models exist per category, and how to invoke them.
//!
//! Stored as a JSON document (`model_config.json`). A missing file is replaced
//! by the built-in catalogue on first load. Entries keep the order of the
//! document, so listings follow it and a save does not reshuffle the file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::enums::StageKind;
use super::selection::is_disabled_id;

/// Model type tag the registry uses for "not known".
pub const UNKNOWN_MODEL_TYPE: &str = "unknown";

/// Errors from registry loading, saving and resolution.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to access registry {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid registry document {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown model category: {0}")]
    UnknownCategory(String),

    #[error("No {mode} config path registered for model '{model}'")]
    MissingConfigPath { model: String, mode: &'static str },

    #[error("Unknown model type for model '{model}'")]
    UnknownModelType { model: String },

    #[error("Model '{model}' is not registered under {category}")]
    UnknownModel { model: String, category: &'static str },
}

/// Everything needed to build a worker command for one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub model_id: String,
    pub model_type: String,
    pub config_path: PathBuf,
}

/// The registry document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRegistry {
    #[serde(default)]
    pub vocal_models: IndexMap<String, String>,
    #[serde(default)]
    pub kara_models: IndexMap<String, String>,
    #[serde(default)]
    pub reverb_models: IndexMap<String, String>,
    #[serde(default)]
    pub other_models: IndexMap<String, String>,
    /// Model id to `[normal, fast]` config file paths.
    #[serde(default)]
    pub config_paths: IndexMap<String, [String; 2]>,
    /// Model id to worker model-type tag.
    #[serde(default)]
    pub model_types: IndexMap<String, String>,
    /// Interpreter used to launch the worker script.
    #[serde(default = "default_inference_env")]
    pub inference_env: String,
}

fn default_inference_env() -> String {
    if cfg!(windows) {
        r".\env\python.exe".to_string()
    } else {
        "env/bin/python".to_string()
    }
}

impl ModelRegistry {
    /// An empty registry using the default interpreter.
    pub fn empty() -> Self {
        Self {
            vocal_models: IndexMap::new(),
            kara_models: IndexMap::new(),
            reverb_models: IndexMap::new(),
            other_models: IndexMap::new(),
            config_paths: IndexMap::new(),
            model_types: IndexMap::new(),
            inference_env: default_inference_env(),
        }
    }

    /// Load the registry from `path`, writing the built-in catalogue if the
    /// file does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, RegistryError> {
        if path.exists() {
            return Self::load(path);
        }

        let registry = Self::default();
        registry.save(path)?;
        tracing::info!("Created default model registry at {}", path.display());
        Ok(registry)
    }

    /// Load the registry from `path`.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let registry: Self = serde_json::from_str(&content).map_err(|source| RegistryError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            "Loaded model registry from {} ({} models)",
            path.display(),
            registry.model_types.len()
        );
        Ok(registry)
    }

    /// Write the registry to `path` as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(|source| RegistryError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, content).map_err(io_err)
    }

    /// Interpreter path as configured.
    pub fn interpreter(&self) -> PathBuf {
        PathBuf::from(&self.inference_env)
    }

    /// Model map for a category.
    pub fn models(&self, kind: StageKind) -> &IndexMap<String, String> {
        match kind {
            StageKind::Vocal => &self.vocal_models,
            StageKind::Karaoke => &self.kara_models,
            StageKind::Reverb => &self.reverb_models,
            StageKind::Other => &self.other_models,
        }
    }

    fn models_mut(&mut self, kind: StageKind) -> &mut IndexMap<String, String> {
        match kind {
            StageKind::Vocal => &mut self.vocal_models,
            StageKind::Karaoke => &mut self.kara_models,
            StageKind::Reverb => &mut self.reverb_models,
            StageKind::Other => &mut self.other_models,
        }
    }

    /// Selectable models of a category, skipping the `None` placeholder
    /// entries older registry files carry.
    pub fn selectable(&self, kind: StageKind) -> impl Iterator<Item = (&str, &str)> {
        self.models(kind)
            .iter()
            .filter(|(id, _)| !is_disabled_id(id))
            .map(|(id, desc)| (id.as_str(), desc.as_str()))
    }

    /// Model map for a category given by name (`vocal`, `kara_models`, ...).
    pub fn models_by_name(
        &self,
        category: &str,
    ) -> Result<&IndexMap<String, String>, RegistryError> {
        let kind = StageKind::from_name(category)
            .ok_or_else(|| RegistryError::UnknownCategory(category.to_string()))?;
        Ok(self.models(kind))
    }

    /// Config path for a model in the requested mode, if registered and non-empty.
    pub fn config_path(&self, model: &str, fast: bool) -> Option<&str> {
        self.config_paths
            .get(model)
            .map(|paths| if fast { paths[1].as_str() } else { paths[0].as_str() })
            .filter(|path| !path.trim().is_empty())
    }

    /// Model type tag, `unknown` when not registered.
    pub fn model_type(&self, model: &str) -> &str {
        self.model_types
            .get(model)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_MODEL_TYPE)
    }

    /// Resolve a model for command construction.
    ///
    /// Needs a non-empty config path for the requested mode and a known
    /// model type.
    pub fn resolve(&self, model: &str, fast: bool) -> Result<ResolvedModel, RegistryError> {
        let config_path = self
            .config_path(model, fast)
            .ok_or_else(|| RegistryError::MissingConfigPath {
                model: model.to_string(),
                mode: if fast { "fast" } else { "normal" },
            })?;

        let model_type = self.model_type(model);
        if model_type.trim().is_empty() || model_type == UNKNOWN_MODEL_TYPE {
            return Err(RegistryError::UnknownModelType {
                model: model.to_string(),
            });
        }

        Ok(ResolvedModel {
            model_id: model.to_string(),
            model_type: model_type.to_string(),
            config_path: PathBuf::from(config_path),
        })
    }

    /// Add or replace a model entry in a category.
    pub fn upsert_model(
        &mut self,
        kind: StageKind,
        model: impl Into<String>,
        description: impl Into<String>,
        config_paths: [String; 2],
        model_type: impl Into<String>,
    ) {
        let model = model.into();
        self.models_mut(kind).insert(model.clone(), description.into());
        self.config_paths.insert(model.clone(), config_paths);
        self.model_types.insert(model, model_type.into());
    }

    /// Remove a model from a category along with its config path and type.
    pub fn remove_model(&mut self, kind: StageKind, model: &str) -> Result<(), RegistryError> {
        if self.models_mut(kind).shift_remove(model).is_none() {
            return Err(RegistryError::UnknownModel {
                model: model.to_string(),
                category: kind.category_key(),
            });
        }
        self.config_paths.shift_remove(model);
        self.model_types.shift_remove(model);
        Ok(())
    }
}

impl Default for ModelRegistry {
    /// The built-in catalogue.
    fn default() -> Self {
        let mut registry = Self::empty();
        for (kind, model, description, normal, fast, model_type) in DEFAULT_CATALOGUE {
            registry.upsert_model(
                *kind,
                *model,
                *description,
                [normal.to_string(), fast.to_string()],
                *model_type,
            );
        }
        registry
    }
}

type CatalogueEntry = (
    StageKind,
    &'static str,
    &'static str,
    &'static str,
    &'static str,
    &'static str,
);

const DEFAULT_CATALOGUE: &[CatalogueEntry] = &[
    (
        StageKind::Vocal,
        "MelBandRoformer_kim.ckpt",
        "[Recommended] Slightly better SDR than the other two and halves the time",
        "configs/config_vocals_mel_band_roformer_kim.yaml",
        "configs/config_vocals_mel_band_roformer_kim-fast.yaml",
        "mel_band_roformer",
    ),
    (
        StageKind::Vocal,
        "model_bs_roformer_ep_317_sdr_12.9755.ckpt",
        "Slightly higher SDR, may introduce noise at very high frequencies",
        "configs/model_bs_roformer_ep_317_sdr_12.9755.yaml",
        "configs/model_bs_roformer_ep_317_sdr_12.9755-fast.yaml",
        "bs_roformer",
    ),
    (
        StageKind::Vocal,
        "model_bs_roformer_ep_368_sdr_12.9628.ckpt",
        "Without the potential high-frequency noise issue",
        "configs/model_bs_roformer_ep_368_sdr_12.9628.yaml",
        "configs/model_bs_roformer_ep_368_sdr_12.9628-fast.yaml",
        "bs_roformer",
    ),
    (
        StageKind::Karaoke,
        "mel_band_roformer_karaoke_aufr33_viperx_sdr_10.1956.ckpt",
        "[Aggressive] Performs much better than existing UVR models",
        "configs/config_mel_band_roformer_karaoke.yaml",
        "configs/config_mel_band_roformer_karaoke-fast.yaml",
        "mel_band_roformer",
    ),
    (
        StageKind::Reverb,
        "dereverb_mel_band_roformer_anvuew_sdr_19.1729.ckpt",
        "[Recommended] Currently the highest SDR score",
        "configs/dereverb_mel_band_roformer_anvuew.yaml",
        "configs/dereverb_mel_band_roformer_anvuew-fast.yaml",
        "mel_band_roformer",
    ),
    (
        StageKind::Reverb,
        "dereverb_mel_band_roformer_less_aggressive_anvuew_sdr_18.8050.ckpt",
        "Less aggressive than the recommended model",
        "configs/dereverb_mel_band_roformer_anvuew.yaml",
        "configs/dereverb_mel_band_roformer_anvuew-fast.yaml",
        "mel_band_roformer",
    ),
    (
        StageKind::Reverb,
        "deverb_bs_roformer_8_384dim_10depth.ckpt",
        "Trained with more data, more conservative in harmony separation",
        "configs/deverb_bs_roformer_8_384dim_10depth.yaml",
        "configs/deverb_bs_roformer_8_384dim_10depth-fast.yaml",
        "bs_roformer",
    ),
    (
        StageKind::Reverb,
        "deverb_bs_roformer_8_256dim_8depth.ckpt",
        "Old bs model",
        "configs/deverb_bs_roformer_8_256dim_8depth.yaml",
        "configs/deverb_bs_roformer_8_256dim_8depth-fast.yaml",
        "bs_roformer",
    ),
    (
        StageKind::Reverb,
        "deverb_mel_band_roformer_8_256dim_6depth.ckpt",
        "Very aggressive dereverberation, may strip vocals",
        "configs/8_256_6_deverb_mel_band_roformer_8_256dim_6depth.yaml",
        "configs/8_256_6_deverb_mel_band_roformer_8_256dim_6depth-fast.yaml",
        "mel_band_roformer",
    ),
    (
        StageKind::Reverb,
        "deverb_mel_band_roformer_8_512dim_12depth.ckpt",
        "Larger network, slightly higher SDR at 3x inference time",
        "configs/8_512_12_deverb_mel_band_roformer_8_512dim_12depth.yaml",
        "configs/8_512_12_deverb_mel_band_roformer_8_512dim_12depth-fast.yaml",
        "mel_band_roformer",
    ),
    (
        StageKind::Reverb,
        "deverb_mel_band_roformer_ep_27_sdr_10.4567.ckpt",
        "Initial version, balances dereverberation and deharmonization",
        "configs/deverb_mel_band_roformer.yaml",
        "configs/deverb_mel_band_roformer-fast.yaml",
        "mel_band_roformer",
    ),
    (
        StageKind::Other,
        "denoise_mel_band_roformer_aufr33_sdr_27.9959.ckpt",
        "[Denoise] Normal version, SDR 27.9959",
        "configs/model_mel_band_roformer_denoise.yaml",
        "configs/model_mel_band_roformer_denoise-fast.yaml",
        "mel_band_roformer",
    ),
    (
        StageKind::Other,
        "denoise_mel_band_roformer_aufr33_aggr_sdr_27.9768.ckpt",
        "[Denoise] Aggressive version, SDR 27.9768",
        "configs/model_mel_band_roformer_denoise.yaml",
        "configs/model_mel_band_roformer_denoise-fast.yaml",
        "mel_band_roformer",
    ),
    (
        StageKind::Other,
        "Apollo_LQ_MP3_restoration.ckpt",
        "[Restoration] Restores low-quality MP3 audio to 44.1 kHz",
        "configs/config_apollo_LQ_MP3_restoration.yaml",
        "configs/config_apollo_LQ_MP3_restoration-fast.yaml",
        "apollo",
    ),
    (
        StageKind::Other,
        "aspiration_mel_band_roformer_sdr_18.9845.ckpt",
        "[Aspiration] Aspiration separation",
        "configs/config_aspiration_mel_band_roformer.yaml",
        "configs/config_aspiration_mel_band_roformer-fast.yaml",
        "mel_band_roformer",
    ),
    (
        StageKind::Other,
        "aspiration_mel_band_roformer_less_aggr_sdr_18.1201.ckpt",
        "[Aspiration] Less aggressive aspiration separation",
        "configs/config_aspiration_mel_band_roformer.yaml",
        "configs/config_aspiration_mel_band_roformer-fast.yaml",
        "mel_band_roformer",
    ),
    (
        StageKind::Other,
        "mel_band_roformer_crowd_aufr33_viperx_sdr_8.7144.ckpt",
        "[Crowd] Removes background crowd noise at some cost to quality",
        "configs/model_mel_band_roformer_crowd_aufr33_viperx.yaml",
        "configs/model_mel_band_roformer_crowd_aufr33_viperx-fast.yaml",
        "mel_band_roformer",
    ),
];
