//! Error types for hearth-node

use thiserror::Error;

use hearth_core::{FrameError, TransportError};
use hearth_crypto::CryptoError;
use hearth_log::LogError;

/// Errors that can occur while operating a node
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Log error: {0}")]
    Log(#[from] LogError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Room not joined: {0}")]
    RoomNotJoined(String),
}

impl From<postcard::Error> for NodeError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;
