//! Config file discovery, TOML loading, and the `DERBY_*` env overlay.

use crate::{ConfigError, DerbyConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Provenance of the loaded configuration, for startup logging.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Files merged into the config, earliest first.
    pub files: Vec<PathBuf>,
    /// Names of env vars that overrode a value.
    pub env_overrides: Vec<String>,
}

/// Existing config files in merge order: system-wide, then the user's
/// config dir, then `./derby.toml`.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Like [`discover_config_files`], but an explicit `--config` path stands
/// in for the local `./derby.toml` layer.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let user = directories::BaseDirs::new()
        .map(|dirs| dirs.config_dir().join("derby/config.toml"));
    let local = match cli_path {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from("derby.toml"),
    };

    [Some(PathBuf::from("/etc/derby/config.toml")), user, Some(local)]
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
        .collect()
}

/// Merge two configs, the overlay winning field by field. An overlay
/// field still at its compiled default keeps the base's value, so a file
/// that only sets `[sync]` leaves earlier layers' `[detection]` intact.
pub fn merge_configs(base: DerbyConfig, overlay: DerbyConfig) -> DerbyConfig {
    fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
        if overlay != default {
            overlay
        } else {
            base
        }
    }

    let d = DerbyConfig::default();
    DerbyConfig {
        detection: crate::DetectionConfig {
            green_hue_min: pick(
                base.detection.green_hue_min,
                overlay.detection.green_hue_min,
                d.detection.green_hue_min,
            ),
            green_hue_max: pick(
                base.detection.green_hue_max,
                overlay.detection.green_hue_max,
                d.detection.green_hue_max,
            ),
            red_hue_min: pick(
                base.detection.red_hue_min,
                overlay.detection.red_hue_min,
                d.detection.red_hue_min,
            ),
            red_hue_max: pick(
                base.detection.red_hue_max,
                overlay.detection.red_hue_max,
                d.detection.red_hue_max,
            ),
            min_saturation: pick(
                base.detection.min_saturation,
                overlay.detection.min_saturation,
                d.detection.min_saturation,
            ),
            green_luminance_max: pick(
                base.detection.green_luminance_max,
                overlay.detection.green_luminance_max,
                d.detection.green_luminance_max,
            ),
            red_luminance_min: pick(
                base.detection.red_luminance_min,
                overlay.detection.red_luminance_min,
                d.detection.red_luminance_min,
            ),
            fallback_fps: pick(
                base.detection.fallback_fps,
                overlay.detection.fallback_fps,
                d.detection.fallback_fps,
            ),
        },
        sync: crate::SyncConfig {
            poll_interval_ms: pick(
                base.sync.poll_interval_ms,
                overlay.sync.poll_interval_ms,
                d.sync.poll_interval_ms,
            ),
        },
        script: crate::ScriptConfig {
            timeout_secs: pick(
                base.script.timeout_secs,
                overlay.script.timeout_secs,
                d.script.timeout_secs,
            ),
        },
    }
}

/// Parse one TOML config file.
pub fn load_from_file(path: &Path) -> Result<DerbyConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Overlay `DERBY_*` env vars onto a loaded config. Unparseable values
/// are ignored rather than fatal.
pub fn apply_env_overrides(config: &mut DerbyConfig, sources: &mut ConfigSources) {
    fn overlay<T: std::str::FromStr>(name: &str, slot: &mut T, applied: &mut Vec<String>) {
        if let Some(value) = env::var(name).ok().and_then(|v| v.parse().ok()) {
            *slot = value;
            applied.push(name.to_string());
        }
    }

    let applied = &mut sources.env_overrides;
    overlay("DERBY_POLL_INTERVAL_MS", &mut config.sync.poll_interval_ms, applied);
    overlay("DERBY_SCRIPT_TIMEOUT_SECS", &mut config.script.timeout_secs, applied);
    overlay("DERBY_MIN_SATURATION", &mut config.detection.min_saturation, applied);
    overlay("DERBY_FALLBACK_FPS", &mut config.detection.fallback_fps, applied);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [detection]
            min_saturation = 0.7
            fallback_fps = 30.0

            [sync]
            poll_interval_ms = 25

            [script]
            timeout_secs = 5
            "#
        )
        .unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.detection.min_saturation, 0.7);
        assert_eq!(config.detection.fallback_fps, 30.0);
        assert_eq!(config.sync.poll_interval_ms, 25);
        assert_eq!(config.script.timeout_secs, 5);
    }

    #[test]
    fn parse_error_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not valid toml [[[").unwrap();

        let err = load_from_file(file.path()).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, file.path()),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_from_file(Path::new("/nonexistent/derby.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn later_layer_keeps_earlier_sections() {
        // User layer tightens detection; local layer only touches sync.
        let user: DerbyConfig = toml::from_str("[detection]\nmin_saturation = 0.9\n").unwrap();
        let local: DerbyConfig = toml::from_str("[sync]\npoll_interval_ms = 5\n").unwrap();

        let merged = merge_configs(merge_configs(DerbyConfig::default(), user), local);
        assert_eq!(merged.sync.poll_interval_ms, 5);
        assert_eq!(merged.detection.min_saturation, 0.9);
    }

    #[test]
    fn overlay_field_wins_over_base() {
        let base: DerbyConfig = toml::from_str("[script]\ntimeout_secs = 10\n").unwrap();
        let overlay: DerbyConfig = toml::from_str("[script]\ntimeout_secs = 60\n").unwrap();

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.script.timeout_secs, 60);
    }

    #[test]
    fn cli_override_replaces_local() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[sync]\npoll_interval_ms = 10\n").unwrap();

        let files = discover_config_files_with_override(Some(file.path()));
        assert_eq!(files.last().unwrap(), file.path());
    }
}
