//! Error types for the voicelink session core

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport errors. The session treats every variant as retryable;
/// the transport implementation maps provider-specific failures here.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Stream closed")]
    StreamClosed,

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Audio pipeline errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Fragment queue full, dropped {0} bytes")]
    QueueFull(usize),

    #[error("Pipeline is not running")]
    PipelineClosed,
}

/// Playback errors, isolated per chunk
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Player spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Player exited with status {0}")]
    PlayerExit(i32),

    #[error("WAV write failed: {0}")]
    WavWrite(String),

    #[error("Playback queue closed")]
    QueueClosed,
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Retry budget exhausted after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Session is not accepting commands")]
    NotRunning,
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
