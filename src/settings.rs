//! Session configuration
//!
//! Loaded from `session.json` in the platform config directory. Missing or
//! unreadable files fall back to defaults; only `validate` can reject one.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::cpal_backend::DEFAULT_INPUT_CAPACITY;
use crate::error::AudioError;
use crate::source::SourceKind;

/// Largest accepted processing block
pub const MAX_BLOCK_SIZE: usize = 16384;

/// Returns the path to the config file: `~/.config/blockio/session.json`
fn config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("blockio");
    path.push("session.json");
    path
}

/// Persisted session configuration.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    // Engine
    pub block_size: usize,
    pub source: SourceKind,

    /// File to play when `source` is `file`
    pub file: Option<PathBuf>,

    // Devices (None = system default)
    pub output_device: Option<String>,
    pub input_device: Option<String>,
    pub input_buffer_frames: usize,

    // File playback
    pub looping: bool,

    // Demo
    pub monitor_gain: f32,
    pub run_seconds: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            source: SourceKind::Synthesis,
            file: None,

            output_device: None,
            input_device: None,
            input_buffer_frames: DEFAULT_INPUT_CAPACITY,

            looping: false,

            monitor_gain: 1.0,
            run_seconds: None,
        }
    }
}

impl SessionConfig {
    /// Load from the platform config directory, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Load from `path`, falling back to defaults on any error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse config ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No config file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save to the platform config directory as pretty JSON.
    pub fn save(&self) {
        self.save_to(&config_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Failed to create config directory: {}", e);
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::warn!("Failed to write config: {}", e);
                }
            }
            Err(e) => {
                log::warn!("Failed to serialize config: {}", e);
            }
        }
    }

    pub fn validate(&self) -> Result<(), AudioError> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(AudioError::InvalidArgument(format!(
                "block_size must be between 1 and {}, got {}",
                MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.input_buffer_frames < self.block_size {
            return Err(AudioError::InvalidArgument(format!(
                "input_buffer_frames ({}) is smaller than one block ({})",
                self.input_buffer_frames, self.block_size
            )));
        }
        if self.source == SourceKind::File && self.file.is_none() {
            log::warn!("File source configured without a file; nothing will play");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert_eq!(config.block_size, 512);
        assert_eq!(config.source, SourceKind::Synthesis);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "source": "live_stereo", "block_size": 256 }"#).unwrap();
        assert_eq!(config.source, SourceKind::LiveStereo);
        assert_eq!(config.block_size, 256);
        assert_eq!(config.monitor_gain, 1.0);
        assert_eq!(config.run_seconds, None);
    }

    #[test]
    fn test_validate_block_size() {
        let mut config = SessionConfig {
            block_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AudioError::InvalidArgument(_))));

        config.block_size = MAX_BLOCK_SIZE + 1;
        assert!(config.validate().is_err());

        config.block_size = 4096;
        config.input_buffer_frames = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let config = SessionConfig {
            source: SourceKind::File,
            file: Some(PathBuf::from("/tmp/clip.wav")),
            looping: true,
            run_seconds: Some(5),
            ..Default::default()
        };

        config.save_to(&path);
        assert_eq!(SessionConfig::load_from(&path), config);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(SessionConfig::load_from(&path), SessionConfig::default());
        assert_eq!(
            SessionConfig::load_from(&dir.path().join("missing.json")),
            SessionConfig::default()
        );
    }
}
