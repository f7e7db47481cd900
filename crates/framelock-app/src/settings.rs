use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which clock drives the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TransportBackend {
    /// Audio output device callbacks (cpal).
    Device,
    /// Software timer, no audio hardware.
    FreeRunning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub version: u32,
    pub video: Option<PathBuf>,
    pub audio: Option<PathBuf>,
    pub backend: TransportBackend,
    /// Output device name; `None` picks the system default.
    pub device: Option<String>,
    /// Free-running transport rate. Device transports use the device rate.
    pub sample_rate: u32,
    /// Samples per transport cycle.
    pub cycle_size: u32,
    /// Sample frames per audio block.
    pub block_size: u32,
    /// Playback inputs the free-running transport pretends to have.
    pub physical_inputs: usize,
    pub auto_connect: bool,
    /// Pause renderers when the transport stops rolling.
    pub pause_on_stop: bool,
    /// Start the transport as soon as the session is open.
    pub autoplay: bool,
    /// Audio ring depth in blocks.
    pub ring_blocks: usize,
    /// Free-running only: stop after this many cycles.
    pub max_cycles: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            version: 1,
            video: None,
            audio: None,
            backend: TransportBackend::Device,
            device: None,
            sample_rate: 48000,
            cycle_size: 512,
            block_size: 1024,
            physical_inputs: 2,
            auto_connect: true,
            pause_on_stop: true,
            autoplay: true,
            ring_blocks: 8,
            max_cycles: None,
        }
    }
}

impl SessionConfig {
    /// Path to the session config file (~/.config/framelock/session.json).
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("framelock").join("session.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, falling back to defaults on any error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded session config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse session config: {e}");
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("No session config found, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self) {
        self.save_to(&Self::config_path());
    }

    pub fn save_to(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create config dir: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    log::error!("Failed to write session config: {e}");
                } else {
                    log::info!("Saved session config to {}", path.display());
                }
            }
            Err(e) => log::error!("Failed to serialize session config: {e}"),
        }
    }

    /// Samples the audio ring holds for `channels` interleaved channels.
    pub fn ring_capacity(&self, channels: usize) -> usize {
        self.ring_blocks.max(2) * self.block_size as usize * channels.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let config = SessionConfig {
            audio: Some(PathBuf::from("/music/take1.wav")),
            backend: TransportBackend::FreeRunning,
            cycle_size: 256,
            pause_on_stop: false,
            ..Default::default()
        };
        config.save_to(&path);
        assert_eq!(SessionConfig::load_from(&path), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"backend": "free-running", "block_size": 2048}"#).unwrap();
        assert_eq!(config.backend, TransportBackend::FreeRunning);
        assert_eq!(config.block_size, 2048);
        assert_eq!(config.cycle_size, 512);
        assert!(config.auto_connect);
    }

    #[test]
    fn corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(SessionConfig::load_from(&path), SessionConfig::default());
        assert_eq!(
            SessionConfig::load_from(&dir.path().join("absent.json")),
            SessionConfig::default()
        );
    }

    #[test]
    fn ring_capacity_scales_with_channels() {
        let config = SessionConfig::default();
        assert_eq!(config.ring_capacity(2), 8 * 1024 * 2);
    }
}
