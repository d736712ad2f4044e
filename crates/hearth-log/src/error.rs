//! Error types for hearth-log

use thiserror::Error;

/// Errors that can occur in the log layer
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Log I/O error: {0}")]
    Io(String),

    #[error("Index {index} out of range (log length {length})")]
    OutOfRange { index: u64, length: u64 },

    #[error("Checksum mismatch at index {index}")]
    ChecksumMismatch { index: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Log closed")]
    Closed,
}

impl From<std::io::Error> for LogError {
    fn from(e: std::io::Error) -> Self {
        LogError::Io(e.to_string())
    }
}

/// Result type for log operations
pub type LogResult<T> = Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LogError::OutOfRange {
            index: 9,
            length: 3,
        };
        let msg = format!("{}", err);
        assert!(msg.contains('9'));
        assert!(msg.contains('3'));

        assert!(format!("{}", LogError::ChecksumMismatch { index: 2 }).contains("Checksum"));
    }
}
