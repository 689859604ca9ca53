//! Settings struct with TOML-based sections.
//!
//! Settings are organized into logical sections that map to TOML tables.
//! Each section can be updated independently for atomic section-level updates.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;

/// Root settings structure containing all configuration sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Working directory layout.
    #[serde(default)]
    pub paths: PathSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Worker invocation and supervision.
    #[serde(default)]
    pub inference: InferenceSettings,
}

/// Locations of the pipeline's working directories and data files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Directory the first enabled stage reads from.
    #[serde(default = "default_input_folder")]
    pub input_folder: String,

    /// Root under which stage output directories are created.
    #[serde(default = "default_work_root")]
    pub work_root: String,

    /// Destination root for archived results.
    #[serde(default = "default_archive_folder")]
    pub archive_folder: String,

    /// Folder holding one JSON file per preset.
    #[serde(default = "default_presets_folder")]
    pub presets_folder: String,

    /// Model registry document.
    #[serde(default = "default_registry_file")]
    pub registry_file: String,

    /// Folder for run logs.
    #[serde(default = "default_logs_folder")]
    pub logs_folder: String,
}

fn default_input_folder() -> String {
    "input".to_string()
}

fn default_work_root() -> String {
    ".".to_string()
}

fn default_archive_folder() -> String {
    "archive".to_string()
}

fn default_presets_folder() -> String {
    "presets".to_string()
}

fn default_registry_file() -> String {
    "model_config.json".to_string()
}

fn default_logs_folder() -> String {
    "logs".to_string()
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            input_folder: default_input_folder(),
            work_root: default_work_root(),
            archive_folder: default_archive_folder(),
            presets_folder: default_presets_folder(),
            registry_file: default_registry_file(),
            logs_folder: default_logs_folder(),
        }
    }
}

impl PathSettings {
    pub fn input_dir(&self) -> PathBuf {
        PathBuf::from(&self.input_folder)
    }

    pub fn work_root(&self) -> PathBuf {
        PathBuf::from(&self.work_root)
    }

    pub fn archive_dir(&self) -> PathBuf {
        PathBuf::from(&self.archive_folder)
    }

    pub fn presets_dir(&self) -> PathBuf {
        PathBuf::from(&self.presets_folder)
    }

    pub fn registry_path(&self) -> PathBuf {
        PathBuf::from(&self.registry_file)
    }

    pub fn logs_dir(&self) -> PathBuf {
        PathBuf::from(&self.logs_folder)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Minimum level written to run logs.
    #[serde(default)]
    pub level: LogLevel,

    /// Keep worker output out of the run log unless a stage fails.
    #[serde(default = "default_true")]
    pub compact: bool,

    /// Number of worker lines to show after a failed stage.
    #[serde(default = "default_error_tail")]
    pub error_tail: u32,

    /// Prefix run log lines with a wall-clock timestamp.
    #[serde(default = "default_true")]
    pub show_timestamps: bool,
}

fn default_true() -> bool {
    true
}

fn default_error_tail() -> u32 {
    20
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            compact: true,
            error_tail: default_error_tail(),
            show_timestamps: true,
        }
    }
}

/// Worker invocation and supervision settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// Inference script passed as the interpreter's first argument.
    #[serde(default = "default_script")]
    pub script: String,

    /// Folder containing checkpoint files, joined with the model identifier.
    #[serde(default = "default_pretrain_folder")]
    pub pretrain_folder: String,

    /// Seconds to wait after a graceful termination request before killing.
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Capacity of the bounded line queue between reader and caller.
    #[serde(default = "default_line_buffer")]
    pub line_buffer: usize,

    /// How often the control loop wakes to check for cancellation.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_script() -> String {
    "inference.py".to_string()
}

fn default_pretrain_folder() -> String {
    "pretrain".to_string()
}

fn default_grace_period() -> u64 {
    5
}

fn default_line_buffer() -> usize {
    256
}

fn default_poll_interval() -> u64 {
    100
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            script: default_script(),
            pretrain_folder: default_pretrain_folder(),
            grace_period_secs: default_grace_period(),
            line_buffer: default_line_buffer(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl InferenceSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Names of config sections for targeted updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSection {
    Paths,
    Logging,
    Inference,
}

impl ConfigSection {
    /// All sections, in file order.
    pub const ALL: [ConfigSection; 3] = [
        ConfigSection::Paths,
        ConfigSection::Logging,
        ConfigSection::Inference,
    ];

    /// Get the TOML table name for this section.
    pub fn table_name(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "paths",
            ConfigSection::Logging => "logging",
            ConfigSection::Inference => "inference",
        }
    }

    /// Comment written above the section in a freshly generated file.
    pub fn comment(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "Working directories and data files",
            ConfigSection::Logging => "Logging configuration",
            ConfigSection::Inference => "Worker invocation and supervision",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_serializes() {
        let settings = Settings::default();
        let toml = toml::to_string_pretty(&settings).unwrap();
        assert!(toml.contains("[paths]"));
        assert!(toml.contains("[inference]"));
        assert!(toml.contains("input_folder"));
    }

    #[test]
    fn settings_round_trip() {
        let settings = Settings::default();
        let toml = toml::to_string_pretty(&settings).unwrap();
        let parsed: Settings = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.paths.input_folder, settings.paths.input_folder);
        assert_eq!(parsed.inference.grace_period_secs, 5);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let minimal = "[paths]\ninput_folder = \"songs\"";
        let parsed: Settings = toml::from_str(minimal).unwrap();
        assert_eq!(parsed.paths.input_folder, "songs");
        assert_eq!(parsed.paths.archive_folder, "archive");
        assert!(parsed.logging.compact);
        assert_eq!(parsed.inference.line_buffer, 256);
    }

    #[test]
    fn poll_interval_never_zero() {
        let mut inference = InferenceSettings::default();
        inference.poll_interval_ms = 0;
        assert_eq!(inference.poll_interval(), Duration::from_millis(1));
    }
}
