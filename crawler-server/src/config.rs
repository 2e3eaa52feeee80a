//! JSON configuration for cameras and motors.
//!
//! Loaded once at startup from `--config <path>` or the default location
//! under the user config directory; missing or malformed files fall back to
//! defaults with a warning rather than refusing to start. Applying a camera
//! quality profile writes the file back so the selection survives restarts.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crawler_core::capture::CameraSettings;
use crawler_core::drive::MotorSettings;
use crawler_core::frame::CameraId;

/// Project directories for config and cache storage.
pub fn get_project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "crawler", "crawler")
}

/// Default config file path: `<config_dir>/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    get_project_dirs().map(|dirs| dirs.config_dir().join("config.json"))
}

/// One camera's device assignment and capture parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraEntry {
    /// V4L2 device index (`/dev/video<N>`).
    pub device_index: usize,
    #[serde(flatten)]
    pub settings: CameraSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraConfig {
    pub front: CameraEntry,
    pub rear: CameraEntry,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            front: CameraEntry {
                device_index: 0,
                settings: CameraSettings::default_for(CameraId::Front),
            },
            rear: CameraEntry {
                device_index: 1,
                settings: CameraSettings::default_for(CameraId::Rear),
            },
        }
    }
}

impl CameraConfig {
    pub fn entry(&self, camera: CameraId) -> &CameraEntry {
        match camera {
            CameraId::Front => &self.front,
            CameraId::Rear => &self.rear,
        }
    }

    pub fn entry_mut(&mut self, camera: CameraId) -> &mut CameraEntry {
        match camera {
            CameraId::Front => &mut self.front,
            CameraId::Rear => &mut self.rear,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub cameras: CameraConfig,
    pub motors: MotorSettings,
}

impl Config {
    /// Load from `path`, falling back to defaults on any error.
    pub fn load(path: &Path) -> Config {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Malformed config {}: {}; using defaults", path.display(), e);
                    Config::default()
                }
            },
            Err(e) => {
                debug!(
                    "Config {} not readable ({}); using defaults",
                    path.display(),
                    e
                );
                Config::default()
            }
        }
    }

    /// Write back to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self).expect("config serializes");
        fs::write(path, contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_camera_positions() {
        let config = Config::default();
        assert_eq!(config.cameras.front.device_index, 0);
        assert_eq!(config.cameras.front.settings.width, 1280);
        assert_eq!(config.cameras.rear.settings.fps, 15);
        assert_eq!(config.motors.i2c_address, 0x34);
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.cameras.rear.device_index = 3;
        config.motors.max_speed = 60;
        config.save(&path).unwrap();

        let loaded = Config::load(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Config::load(&path), Config::default());
    }

    #[test]
    fn partial_file_fills_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"motors":{"maxSpeed":50}}"#).unwrap();
        let config = Config::load(&path);
        assert_eq!(config.motors.max_speed, 50);
        assert_eq!(config.cameras, CameraConfig::default());
    }
}
