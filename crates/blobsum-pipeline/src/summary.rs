//! Batch-level counters and the summary returned to the caller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every task of a batch
#[derive(Debug, Default)]
pub struct BatchCounters {
    processed: AtomicU64,
    abandoned: AtomicU64,
    total_bytes: AtomicU64,
}

impl BatchCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_done(&self, size: u64) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }
}

/// Aggregate outcome of one batch, read only after every task has finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub task_count: u64,
    pub processed_count: u64,
    pub abandoned_count: u64,
    pub total_bytes: u64,
    pub elapsed_ms: u64,
    /// Whether the batch deadline cut unfinished tasks short
    pub timed_out: bool,
}

impl BatchSummary {
    pub fn total_kb(&self) -> u64 {
        self.total_bytes / 1024
    }
}
