//! Error types.

use thiserror::Error;

/// The main error type for buildwise-notify operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage backend rejected or failed an operation.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Filesystem error from a directory-backed storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid argument passed to a method.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation needed a Tokio runtime but none was running.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create an invalid argument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Check if this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            Error::Storage(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for buildwise-notify operations.
pub type Result<T> = std::result::Result<T, Error>;
