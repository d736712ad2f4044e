//! Error types for hearth-crypto

use thiserror::Error;

/// Errors that can occur in the crypto layer
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;
