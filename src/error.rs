//! Error types for the Chirp bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// WAV encoding/decoding error
    #[error("wav error: {0}")]
    Wav(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Reply-generation error
    #[error("reply error: {0}")]
    Reply(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Transport error (closed or errored connection)
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
