//! Error types for the audio pipeline.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Microphone or speaker could not be opened (permission, missing hardware).
    #[error("Audio device access failed: {0}")]
    DeviceAccess(String),

    /// Malformed binary payload in either direction.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Session open/send/close failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation not allowed in the current session state.
    #[error("Invalid session state: {0}")]
    State(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Session-level errors are surfaced to the user; the rest are logged and dropped.
    pub fn is_session_level(&self) -> bool {
        matches!(
            self,
            PipelineError::DeviceAccess(_) | PipelineError::Transport(_) | PipelineError::State(_)
        )
    }
}

impl From<base64::DecodeError> for PipelineError {
    fn from(e: base64::DecodeError) -> Self {
        PipelineError::Codec(format!("invalid base64 payload: {}", e))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PipelineError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        PipelineError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
