//! Blobsum Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, checksum primitives, logging and error handling for the
//! blobsum workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`BlobsumError`] covers every way a single retrieval
//!   task can fail, plus configuration problems
//! - **Checksums**: incremental MD5 / CRC32 (IEEE) accumulators
//! - **Types**: retrieval mode and checksum algorithm selectors
//! - **Logging**: `tracing` subscriber setup driven by environment variables
//!
//! # Example
//!
//! ```
//! use blobsum_common::checksum::DigestEngine;
//! use blobsum_common::types::ChecksumAlgorithm;
//!
//! let mut engine = DigestEngine::new(ChecksumAlgorithm::Crc32);
//! engine.update(b"1234");
//! engine.update(b"56789");
//! assert_eq!(engine.finalize().to_string(), "3421780262");
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{BlobsumError, Result};
