//! Batch-level error types

use thiserror::Error;

/// Result type alias for batch operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Errors that stop a whole batch.
///
/// Individual task failures never show up here; they are folded into the
/// batch summary as abandoned tasks.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Batch contains no task descriptors")]
    EmptyBatch,

    #[error("Invalid inbound batch: {0}")]
    Inbound(String),

    #[error(transparent)]
    Blobsum(#[from] blobsum_common::BlobsumError),
}
