//! Blobsum Pipeline
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Batch checksum pipeline: each task descriptor names an object, the object
//! is streamed and digested (MD5 or CRC32), and one record per object is
//! written to the record store.
//!
//! # Overview
//!
//! - **Reference**: turns a raw descriptor into a store key or a decoded signed URL
//! - **Fetcher**: opens the object stream (S3 `GetObject` or HTTP `GET`)
//! - **Processor**: per-task state machine with retries and a task deadline
//! - **Coordinator**: bounded fan-out over a batch, batch deadline, summary
//! - **Descriptors**: load generator listing a bucket into descriptors
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use blobsum_common::types::RetrievalMode;
//! use blobsum_pipeline::config::ConcurrencyConfig;
//! use blobsum_pipeline::coordinator::BatchCoordinator;
//! use blobsum_pipeline::fetcher::StoreFetcher;
//! use blobsum_pipeline::processor::TaskProcessor;
//! use blobsum_pipeline::record_store::MemoryRecordStore;
//! use blobsum_pipeline::storage::MemoryObjectStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryObjectStore::new();
//! store.insert("objects", "objects/42.bin", vec![0u8; 1024]);
//!
//! let processor = TaskProcessor::new(
//!     RetrievalMode::DirectPath,
//!     Arc::new(StoreFetcher::new(Arc::new(store), "objects")),
//!     Arc::new(MemoryRecordStore::new()),
//!     "results",
//! );
//! let coordinator = BatchCoordinator::new(processor, ConcurrencyConfig::default());
//!
//! let summary = coordinator.process(&["objects/42.bin".to_string()]).await?;
//! assert_eq!(summary.processed_count, 1);
//! assert_eq!(summary.total_bytes, 1024);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod descriptors;
pub mod digest;
pub mod error;
pub mod fetcher;
pub mod inbound;
pub mod processor;
pub mod record;
pub mod record_store;
pub mod reference;
pub mod retry;
pub mod storage;
pub mod summary;

pub use config::PipelineConfig;
pub use coordinator::BatchCoordinator;
pub use error::{PipelineError, PipelineResult};
pub use summary::BatchSummary;
