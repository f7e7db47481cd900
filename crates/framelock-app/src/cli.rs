use std::path::PathBuf;

use clap::Parser;

use crate::settings::{SessionConfig, TransportBackend};

/// framelock - lock video and audio playback to an external transport clock
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "framelock", version, about, long_about = None)]
pub struct Cli {
    /// Video file to render (GIF, or any container ffmpeg reads with the `video` feature).
    #[arg(long)]
    pub video: Option<PathBuf>,

    /// WAV file to stream to the transport outputs.
    #[arg(long)]
    pub audio: Option<PathBuf>,

    /// Read settings from this file instead of the user config.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Clock source.
    #[arg(long, value_enum)]
    pub backend: Option<TransportBackend>,

    /// Output device name.
    #[arg(long)]
    pub device: Option<String>,

    /// Free-running sample rate.
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// Samples per transport cycle.
    #[arg(long)]
    pub cycle_size: Option<u32>,

    /// Sample frames per audio block.
    #[arg(long)]
    pub block_size: Option<u32>,

    /// Stop a free-running session after this many cycles.
    #[arg(long)]
    pub max_cycles: Option<u64>,

    /// Leave output ports unconnected.
    #[arg(long)]
    pub no_auto_connect: bool,

    /// Keep renderers playing when the transport stops.
    #[arg(long)]
    pub no_pause_on_stop: bool,

    /// Wait for `play` instead of rolling immediately.
    #[arg(long)]
    pub paused: bool,

    /// Write the effective settings back to the config file.
    #[arg(long)]
    pub save_config: bool,

    /// List output devices and exit.
    #[arg(long)]
    pub list_devices: bool,
}

impl Cli {
    /// Load the base config (file given on the command line, else the user
    /// config) and apply command-line overrides.
    pub fn resolve(&self) -> SessionConfig {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load_from(path),
            None => SessionConfig::load(),
        };
        self.apply(&mut config);
        config
    }

    pub fn apply(&self, config: &mut SessionConfig) {
        if let Some(video) = &self.video {
            config.video = Some(video.clone());
        }
        if let Some(audio) = &self.audio {
            config.audio = Some(audio.clone());
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(device) = &self.device {
            config.device = Some(device.clone());
        }
        if let Some(rate) = self.sample_rate {
            config.sample_rate = rate;
        }
        if let Some(size) = self.cycle_size {
            config.cycle_size = size;
        }
        if let Some(size) = self.block_size {
            config.block_size = size;
        }
        if self.max_cycles.is_some() {
            config.max_cycles = self.max_cycles;
        }
        if self.no_auto_connect {
            config.auto_connect = false;
        }
        if self.no_pause_on_stop {
            config.pause_on_stop = false;
        }
        if self.paused {
            config.autoplay = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let cli = Cli::parse_from([
            "framelock",
            "--audio",
            "take.wav",
            "--backend",
            "free-running",
            "--cycle-size",
            "256",
            "--paused",
        ]);
        let mut config = SessionConfig {
            cycle_size: 1024,
            block_size: 4096,
            ..Default::default()
        };
        cli.apply(&mut config);
        assert_eq!(config.audio, Some(PathBuf::from("take.wav")));
        assert_eq!(config.backend, TransportBackend::FreeRunning);
        assert_eq!(config.cycle_size, 256);
        assert_eq!(config.block_size, 4096);
        assert!(!config.autoplay);
        assert!(config.pause_on_stop);
    }

    #[test]
    fn empty_command_line_changes_nothing() {
        let cli = Cli::parse_from(["framelock"]);
        let mut config = SessionConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, SessionConfig::default());
    }
}
