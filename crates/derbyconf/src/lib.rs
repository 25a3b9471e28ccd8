//! Minimal configuration loading for Derby.
//!
//! Provides the tunables for marker detection, barrier synchronization,
//! and script execution, loadable by every Derby crate without circular
//! dependency issues.
//!
//! ```rust,no_run
//! use derbyconf::DerbyConfig;
//!
//! let config = DerbyConfig::load().expect("Failed to load config");
//! println!("poll interval: {}ms", config.sync.poll_interval_ms);
//! println!("script timeout: {}s", config.script.timeout_secs);
//! ```
//!
//! Config comes from, later winning: `/etc/derby/config.toml`, the user's
//! `derby/config.toml`, `./derby.toml` (or the `--config` path), then
//! `DERBY_*` environment variables. A config file looks like:
//!
//! ```toml
//! [detection]
//! green_hue_min = 90.0
//! green_hue_max = 150.0
//! red_hue_min = 340.0
//! red_hue_max = 20.0
//! min_saturation = 0.5
//! fallback_fps = 25.0
//!
//! [sync]
//! poll_interval_ms = 100
//!
//! [script]
//! timeout_secs = 30
//! ```

pub mod loader;

pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Marker detection thresholds.
///
/// Start markers are solid green regions, end markers solid red. A frame
/// only counts as a marker when its saturation clears `min_saturation`;
/// the luminance bounds reject washed-out or near-black false positives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Green band lower hue bound, degrees.
    #[serde(default = "DetectionConfig::default_green_hue_min")]
    pub green_hue_min: f32,

    /// Green band upper hue bound, degrees.
    #[serde(default = "DetectionConfig::default_green_hue_max")]
    pub green_hue_max: f32,

    /// Red band lower hue bound, degrees. The red band wraps through 0,
    /// so min > max is the normal case.
    #[serde(default = "DetectionConfig::default_red_hue_min")]
    pub red_hue_min: f32,

    /// Red band upper hue bound, degrees.
    #[serde(default = "DetectionConfig::default_red_hue_max")]
    pub red_hue_max: f32,

    /// Minimum saturation for a frame to count as a marker at all.
    #[serde(default = "DetectionConfig::default_min_saturation")]
    pub min_saturation: f32,

    /// Luminance ceiling for start (green) markers.
    #[serde(default = "DetectionConfig::default_green_luminance_max")]
    pub green_luminance_max: f32,

    /// Luminance floor for end (red) markers.
    #[serde(default = "DetectionConfig::default_red_luminance_min")]
    pub red_luminance_min: f32,

    /// Frame rate assumed when a recording has fewer than two samples.
    #[serde(default = "DetectionConfig::default_fallback_fps")]
    pub fallback_fps: f64,
}

impl DetectionConfig {
    fn default_green_hue_min() -> f32 {
        90.0
    }

    fn default_green_hue_max() -> f32 {
        150.0
    }

    fn default_red_hue_min() -> f32 {
        340.0
    }

    fn default_red_hue_max() -> f32 {
        20.0
    }

    fn default_min_saturation() -> f32 {
        0.5
    }

    fn default_green_luminance_max() -> f32 {
        0.6
    }

    fn default_red_luminance_min() -> f32 {
        0.2
    }

    fn default_fallback_fps() -> f64 {
        25.0
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            green_hue_min: Self::default_green_hue_min(),
            green_hue_max: Self::default_green_hue_max(),
            red_hue_min: Self::default_red_hue_min(),
            red_hue_max: Self::default_red_hue_max(),
            min_saturation: Self::default_min_saturation(),
            green_luminance_max: Self::default_green_luminance_max(),
            red_luminance_min: Self::default_red_luminance_min(),
            fallback_fps: Self::default_fallback_fps(),
        }
    }
}

/// Barrier synchronization tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How often suspended barrier waiters re-check the shared error flag.
    /// Bounds abort propagation latency.
    #[serde(default = "SyncConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl SyncConfig {
    fn default_poll_interval_ms() -> u64 {
        100
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

/// Script execution tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Maximum wall-clock seconds a single agent script may run.
    #[serde(default = "ScriptConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ScriptConfig {
    fn default_timeout_secs() -> u64 {
        30
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

/// Complete Derby configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DerbyConfig {
    #[serde(default)]
    pub detection: DetectionConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub script: ScriptConfig,
}

impl DerbyConfig {
    /// Load from every discovered source, compiled defaults first and
    /// `DERBY_*` env vars last.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env
    /// overrides. System and user configs still load first; the given path
    /// replaces the local `./derby.toml` override.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load and additionally report which files and env vars applied.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut config = DerbyConfig::default();
        let mut sources = ConfigSources::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let overlay = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, overlay);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }
}
