//! Error types for Hearth core

use thiserror::Error;

/// Errors related to peer identity
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid identity format: {0}")]
    InvalidFormat(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

/// Errors related to transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Peer not connected: {0}")]
    PeerNotConnected(String),

    #[error("Topic join failed: {0}")]
    JoinFailed(String),
}

/// Errors related to protocol frames
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame encoding failed: {0}")]
    Encode(String),
}

impl From<serde_json::Error> for FrameError {
    fn from(e: serde_json::Error) -> Self {
        FrameError::Encode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_error_display() {
        let err = IdentityError::InvalidFormat("bad hex".to_string());
        assert!(format!("{}", err).contains("bad hex"));

        let err = IdentityError::InvalidKeyLength {
            expected: 32,
            actual: 16,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("32"));
        assert!(msg.contains("16"));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::SendFailed("channel closed".to_string());
        assert!(format!("{}", err).contains("channel closed"));

        assert!(format!("{}", TransportError::ConnectionClosed).contains("closed"));

        let err = TransportError::PeerNotConnected("ab12".to_string());
        assert!(format!("{}", err).contains("ab12"));
    }
}
