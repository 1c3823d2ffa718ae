//! Error types for the STB client.
//!
//! None of these reach the caller of a catalog or tune operation: those
//! degrade to partial results plus trace lines. They flow between the
//! session pieces and surface only from setup paths (config, CLI).

use thiserror::Error;

use stb_protocol::ProtocolError;

#[derive(Error, Debug)]
pub enum ClientError {
    /// TCP connect refused, unreachable, or timed out.
    #[error("Connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    /// Frame sync lost (bad magic or out-of-bound length).
    #[error("Protocol desync: {0}")]
    Desync(ProtocolError),

    /// Other protocol-level failure (stall, close).
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out")]
    Timeout,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Playback launch failed: {0}")]
    Launch(String),

    #[error("Remote key request failed: {0}")]
    RemoteKey(String),

    #[error("Worker task failed: {0}")]
    Join(String),
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        if e.is_desync() {
            ClientError::Desync(e)
        } else {
            ClientError::Protocol(e)
        }
    }
}

impl From<tokio::task::JoinError> for ClientError {
    fn from(e: tokio::task::JoinError) -> Self {
        ClientError::Join(e.to_string())
    }
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, ClientError>;
