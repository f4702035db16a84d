//! Error types for the chorus bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the chorus bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Voice platform error (gateway, voice channel, text post)
    #[error("platform error: {0}")]
    Platform(String),

    /// Audio processing error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Brain endpoint error
    #[error("brain error: {0}")]
    Brain(String),

    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// Alert ingress error
    #[error("alert error: {0}")]
    Alert(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
