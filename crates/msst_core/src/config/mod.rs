//! Configuration management for the MSST orchestrator.
//!
//! This module provides:
//! - TOML-based configuration with logical sections
//! - Atomic file writes (write to temp, then rename)
//! - Section-level updates (only changed section is modified)
//! - Validation on load with automatic defaults
//!
//! # Example
//!
//! ```no_run
//! use msst_core::config::{ConfigManager, ConfigSection};
//!
//! let mut config = ConfigManager::new(".config/settings.toml");
//! config.load_or_create().unwrap();
//!
//! println!("Input folder: {}", config.settings().paths.input_folder);
//!
//! config.settings_mut().inference.grace_period_secs = 10;
//! config.update_section(ConfigSection::Inference).unwrap();
//! ```

mod manager;
mod settings;

pub use manager::{ConfigError, ConfigManager, ConfigResult};
pub use settings::{ConfigSection, InferenceSettings, LoggingSettings, PathSettings, Settings};
