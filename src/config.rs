//! Engine configuration
//!
//! Loaded from a TOML file under the platform config directory. Every
//! section has defaults, so a missing file or a partial file is fine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub recording: RecordingConfig,
    pub player: PlayerConfig,
}

/// Device and render settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Device channel count (1 or 2); units always render stereo
    pub channels: u16,
    /// Frames per render quantum
    pub render_quantum: usize,
    /// Input device id, `None` for the host default
    pub input_device: Option<String>,
    /// Output device id, `None` for the host default
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            render_quantum: RENDER_QUANTUM,
            input_device: None,
            output_device: None,
        }
    }
}

/// Recording transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Seconds of interleaved stereo audio each track ring can hold
    pub ring_seconds: f32,
    /// How often the worker drains a recording ring
    pub drain_interval_ms: u64,
    /// Samples moved per dequeue call
    pub drain_chunk: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            ring_seconds: RING_BUFFER_SECONDS,
            drain_interval_ms: DRAIN_INTERVAL_MS,
            drain_chunk: DRAIN_CHUNK,
        }
    }
}

/// Per-unit queue sizes and scheduling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Duration of one note schedule bucket in milliseconds
    pub instant_duration_ms: f64,
    pub command_queue_capacity: usize,
    pub report_queue_capacity: usize,
    pub event_queue_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            instant_duration_ms: DEFAULT_INSTANT_DURATION_MS,
            command_queue_capacity: COMMAND_QUEUE_CAPACITY,
            report_queue_capacity: REPORT_QUEUE_CAPACITY,
            event_queue_capacity: EVENT_QUEUE_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Default config file location, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "track-transport")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load `path` (or the default location); defaults when the file is absent
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.audio.sample_rate == 0 {
            return invalid("audio.sample_rate must be positive");
        }
        if !(1..=2).contains(&self.audio.channels) {
            return invalid("audio.channels must be 1 or 2");
        }
        if self.audio.render_quantum == 0 {
            return invalid("audio.render_quantum must be positive");
        }
        if self.recording.ring_seconds.is_nan() || self.recording.ring_seconds <= 0.0 {
            return invalid("recording.ring_seconds must be positive");
        }
        if self.recording.drain_chunk == 0 {
            return invalid("recording.drain_chunk must be positive");
        }
        if self.player.instant_duration_ms.is_nan() || self.player.instant_duration_ms <= 0.0 {
            return invalid("player.instant_duration_ms must be positive");
        }
        if self.player.command_queue_capacity == 0
            || self.player.report_queue_capacity == 0
            || self.player.event_queue_capacity == 0
        {
            return invalid("player queue capacities must be positive");
        }
        Ok(())
    }

    /// Milliseconds covered by one sample
    pub fn ms_per_sample(&self) -> f64 {
        1000.0 / self.audio.sample_rate as f64
    }

    /// Interleaved stereo samples held by one recording ring
    pub fn ring_capacity(&self) -> usize {
        let frames = (self.audio.sample_rate as f32 * self.recording.ring_seconds) as usize;
        frames.max(self.audio.render_quantum) * RECORD_CHANNELS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [audio]
            sample_rate = 44100

            [player]
            instant_duration_ms = 500.0
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.audio.render_quantum, RENDER_QUANTUM);
        assert_eq!(config.player.instant_duration_ms, 500.0);
        assert_eq!(config.recording, RecordingConfig::default());
    }

    #[test]
    fn test_default_ring_holds_one_second_of_stereo() {
        let config = AppConfig::default();
        assert_eq!(config.ring_capacity(), DEFAULT_SAMPLE_RATE as usize * 2);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            AppConfig::from_toml_str("[audio]\nchannels = 6\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_toml_str("[recording]\nring_seconds = 0.0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::from_toml_str("[audio\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join("track-transport-missing-config.toml");
        let config = AppConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config, AppConfig::default());
    }
}
