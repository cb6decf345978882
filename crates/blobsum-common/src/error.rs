//! Error types for blobsum

use thiserror::Error;

/// Result type alias for blobsum operations
pub type Result<T> = std::result::Result<T, BlobsumError>;

/// Main error type for blobsum
///
/// Every per-task failure is one of these. They are caught at the task
/// boundary and turned into an abandoned outcome, never raised to the batch.
#[derive(Error, Debug)]
pub enum BlobsumError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered, and asking again will not change the answer
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Digest error after {bytes_read} bytes: {message}")]
    Digest { bytes_read: u64, message: String },

    #[error("Persist error: {0}")]
    Persist(String),

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BlobsumError {
    /// Whether a fresh attempt of the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BlobsumError::Transport(_) | BlobsumError::Persist(_) | BlobsumError::Timeout(_)
        )
    }

    /// Short machine-friendly name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            BlobsumError::Io(_) => "io",
            BlobsumError::Serialization(_) => "serialization",
            BlobsumError::Decode(_) => "decode",
            BlobsumError::NotFound(_) => "not_found",
            BlobsumError::Transport(_) => "transport",
            BlobsumError::Rejected(_) => "rejected",
            BlobsumError::Digest { .. } => "digest",
            BlobsumError::Persist(_) => "persist",
            BlobsumError::Timeout(_) => "timeout",
            BlobsumError::Config(_) => "config",
        }
    }
}
