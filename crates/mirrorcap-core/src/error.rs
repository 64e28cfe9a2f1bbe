//! Error types for mirrorcap

use std::time::Duration;
use thiserror::Error;

/// Main error type for mirrorcap operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed frame stream header: {0}")]
    Protocol(String),

    #[error("Frame decode failed: {0}")]
    FrameDecode(String),

    #[error("Capture agent is not supported on this device")]
    AgentUnsupported,

    #[error("Failed to launch capture agent: {0}")]
    AgentLaunch(String),

    #[error("No orientation event received within {0:?}")]
    RotationTimeout(Duration),

    #[error("Orientation event stream ended")]
    OrientationStreamEnded,

    #[error("Remote command failed: {command} - {message}")]
    RemoteExec { command: String, message: String },

    #[error("Already closed")]
    AlreadyClosed,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias using mirrorcap's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a remote command execution error
    pub fn remote_exec(command: impl Into<String>, message: impl Into<String>) -> Self {
        Error::RemoteExec {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Whether the reconnect loop recovers from this error by opening a new connection
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::FrameDecode(_) | Error::Io(_))
    }
}
