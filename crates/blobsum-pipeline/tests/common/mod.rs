//! Shared fixtures for pipeline integration tests

#![allow(dead_code)]

use blobsum_common::types::{ChecksumAlgorithm, RetrievalMode};
use blobsum_pipeline::config::ConcurrencyConfig;
use blobsum_pipeline::coordinator::BatchCoordinator;
use blobsum_pipeline::fetcher::{Fetcher, HttpFetcher, StoreFetcher};
use blobsum_pipeline::processor::TaskProcessor;
use blobsum_pipeline::record_store::MemoryRecordStore;
use blobsum_pipeline::retry::RetryPolicy;
use blobsum_pipeline::storage::MemoryObjectStore;
use std::sync::Arc;
use std::time::Duration;

pub const BUCKET: &str = "objects";
pub const TABLE: &str = "results";

/// Fast retries so failing tests do not stall
pub fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

pub fn direct_path_coordinator(
    store: &MemoryObjectStore,
    records: &MemoryRecordStore,
    algorithm: ChecksumAlgorithm,
    concurrency: ConcurrencyConfig,
) -> BatchCoordinator {
    let fetcher: Arc<dyn Fetcher> = Arc::new(StoreFetcher::new(Arc::new(store.clone()), BUCKET));
    let processor = TaskProcessor::new(
        RetrievalMode::DirectPath,
        fetcher,
        Arc::new(records.clone()),
        TABLE,
    )
    .with_algorithm(algorithm)
    .with_bucket(Some(BUCKET.to_string()))
    .with_retry(quick_retry());

    BatchCoordinator::new(processor, concurrency)
}

pub fn signed_access_coordinator(records: &MemoryRecordStore) -> BatchCoordinator {
    let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
    let processor = TaskProcessor::new(
        RetrievalMode::SignedAccess,
        Arc::new(fetcher),
        Arc::new(records.clone()),
        TABLE,
    )
    .with_retry(quick_retry());

    BatchCoordinator::new(processor, ConcurrencyConfig::default())
}
