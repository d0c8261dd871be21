//! Error types for clamd-client.

use thiserror::Error;

/// Main error type for all clamd operations.
#[derive(Debug, Error)]
pub enum ClamdError {
    /// Malformed endpoint address.
    #[error("Invalid address: {0}")]
    Address(String),

    /// I/O error during connect, read, write or close.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Unexpected reply shape for a control command, or an invalid chunk.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A record that could not be classified where a structured reply was required.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Upload was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Malformed JSON configuration.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Configuration value out of range.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

impl ClamdError {
    /// True for errors raised by the socket layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClamdError::Transport(_))
    }
}

/// Result type alias using ClamdError.
pub type Result<T> = std::result::Result<T, ClamdError>;
