//! Configuration management for the Chirp bridge

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::{Error, Result};

/// Bridge configuration
///
/// Loaded from `config.toml` in the platform config directory (or an explicit
/// path), with environment overrides for secrets. Every field has a default
/// so a missing file yields a runnable configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Port the relay server listens on
    pub port: Port,

    /// PCM stream parameters shared by device and server
    pub audio: AudioConfig,

    /// Voice-activity-detection thresholds for the device recorder
    pub vad: VadConfig,

    /// Device-side playback buffering and gain
    pub playback: PlaybackConfig,

    /// Server-side paced delivery tuning
    pub delivery: DeliveryConfig,

    /// Speech backend (STT/LLM/TTS) settings
    pub backend: BackendConfig,
}

/// Newtype wrapper so the port default composes with `#[serde(default)]`
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Port(pub u16);

impl Default for Port {
    fn default() -> Self {
        Self(18990)
    }
}

/// PCM stream parameters
///
/// The stream is mono 16-bit little-endian throughout; only the rate and the
/// network/playback chunk granularity vary. `chunk_size` must match between
/// the paced delivery scheduler and the device ring buffer: a mismatch would
/// split samples across frames and corrupt playback.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Network transfer and playback chunk size in bytes
    pub chunk_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            chunk_size: 2048,
        }
    }
}

/// Voice activity detection configuration
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Mean absolute amplitude (i16 scale) above which a frame counts as speech
    pub amplitude_threshold: f32,

    /// Accumulated silence that ends an utterance once speech has started
    pub silence_ms: u64,

    /// Hard cap on a recording session; reached without any speech, the
    /// recording is abandoned
    pub timeout_ms: u64,

    /// Samples per analysis frame
    pub frame_samples: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            amplitude_threshold: 500.0,
            silence_ms: 1200,
            timeout_ms: 10_000,
            frame_samples: 512,
        }
    }
}

/// Device playback configuration
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Ring buffer capacity in bytes
    pub buffer_capacity: usize,

    /// Fraction of the buffer that must fill before playback starts
    pub start_fill: f32,

    /// Linear gain applied to samples, saturating at the i16 range
    pub gain: f32,
}

impl PlaybackConfig {
    /// Fill level in bytes at which playback begins
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn start_threshold(&self) -> usize {
        (self.buffer_capacity as f32 * self.start_fill) as usize
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 64 * 1024,
            start_fill: 0.875,
            gain: 1.0,
        }
    }
}

/// Paced delivery configuration
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Fraction of total chunks sent back-to-back before pacing begins
    pub burst_fraction: f64,

    /// How long to wait for the client's "ready" handshake before sending anyway
    pub handshake_timeout_ms: u64,
}

impl DeliveryConfig {
    /// Handshake timeout as a [`Duration`]
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            burst_fraction: 0.8,
            handshake_timeout_ms: 2000,
        }
    }
}

/// Speech backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// `OpenAI` API key; `OPENAI_API_KEY` env var takes precedence
    pub openai_api_key: Option<String>,

    /// Transcription model (e.g. "whisper-1")
    pub stt_model: String,

    /// Reply-generation model
    pub llm_model: String,

    /// Speech-synthesis model
    pub tts_model: String,

    /// Speech-synthesis voice
    pub tts_voice: String,

    /// System prompt for the reply model
    pub system_prompt: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            stt_model: "whisper-1".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            system_prompt: "You are a friendly voice assistant. Keep replies short \
                            and conversational; they will be spoken aloud."
                .to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the given path, or the default location
    ///
    /// A missing file is not an error; defaults apply. Environment variables
    /// override file values: `OPENAI_API_KEY`, `CHIRP_PORT`.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed, or if
    /// a value fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            tracing::debug!(path = %path.display(), "loading configuration");
            toml::from_str(&raw)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                config.backend.openai_api_key = Some(key);
            }
        }
        if let Ok(port) = std::env::var("CHIRP_PORT") {
            config.port = Port(port
                .parse()
                .map_err(|_| Error::Config(format!("invalid CHIRP_PORT: {port}")))?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Default config file location
    #[must_use]
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("dev", "chirp", "chirp-bridge").map_or_else(
            || PathBuf::from("config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Check cross-field and range constraints
    fn validate(&self) -> Result<()> {
        if self.audio.chunk_size == 0 || self.audio.chunk_size % 2 != 0 {
            return Err(Error::Config(format!(
                "chunk_size must be a positive even number of bytes, got {}",
                self.audio.chunk_size
            )));
        }
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be non-zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.playback.start_fill) {
            return Err(Error::Config(format!(
                "start_fill must be within [0, 1], got {}",
                self.playback.start_fill
            )));
        }
        if self.playback.buffer_capacity < self.audio.chunk_size {
            return Err(Error::Config(
                "buffer_capacity must hold at least one chunk".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.delivery.burst_fraction) {
            return Err(Error::Config(format!(
                "burst_fraction must be within [0, 1], got {}",
                self.delivery.burst_fraction
            )));
        }
        if self.playback.gain < 0.0 {
            return Err(Error::Config("gain must be non-negative".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio.sample_rate, 24_000);
        assert_eq!(config.audio.chunk_size, 2048);
        assert!((config.delivery.burst_fraction - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn start_threshold_is_fraction_of_capacity() {
        let playback = PlaybackConfig {
            buffer_capacity: 64 * 1024,
            start_fill: 0.875,
            gain: 1.0,
        };
        assert_eq!(playback.start_threshold(), 57_344);
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            port = 9000

            [audio]
            chunk_size = 1024

            [delivery]
            burst_fraction = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.port, Port(9000));
        assert_eq!(config.audio.chunk_size, 1024);
        assert_eq!(config.audio.sample_rate, 24_000);
        assert!((config.delivery.burst_fraction - 0.5).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_odd_chunk_size() {
        let mut config = Config::default();
        config.audio.chunk_size = 2047;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_buffer_smaller_than_chunk() {
        let mut config = Config::default();
        config.playback.buffer_capacity = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_burst_fraction() {
        let mut config = Config::default();
        config.delivery.burst_fraction = 1.5;
        assert!(config.validate().is_err());
    }
}
