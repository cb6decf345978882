//! Per-task state machine: resolve, fetch, digest, persist
//!
//! Every failure ends the task in [`TaskState::Abandoned`] and is logged
//! with the state it happened in. Nothing here returns an error to the
//! batch.

use blobsum_common::types::{ChecksumAlgorithm, RetrievalMode};
use blobsum_common::{BlobsumError, Result};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{field, info, info_span, warn, Instrument, Span};

use crate::config::{PipelineConfig, DEFAULT_SIGNED_URL_PREFIX_DEPTH, DEFAULT_TASK_TIMEOUT_SECS};
use crate::digest::digest_stream;
use crate::fetcher::Fetcher;
use crate::record::ResultRecord;
use crate::record_store::RecordStore;
use crate::reference::ObjectReference;
use crate::retry::RetryPolicy;
use crate::storage::FetchedObject;
use crate::summary::BatchCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Pending,
    Resolved,
    Fetching,
    Digesting,
    Persisting,
    Done,
    Abandoned,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Resolved => "resolved",
            TaskState::Fetching => "fetching",
            TaskState::Digesting => "digesting",
            TaskState::Persisting => "persisting",
            TaskState::Done => "done",
            TaskState::Abandoned => "abandoned",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Pending,
            1 => TaskState::Resolved,
            2 => TaskState::Fetching,
            3 => TaskState::Digesting,
            4 => TaskState::Persisting,
            5 => TaskState::Done,
            _ => TaskState::Abandoned,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The state a running task is in, readable from outside the task.
/// Starts out `Pending`.
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, state: TaskState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// How a task ended
#[derive(Debug)]
pub enum TaskOutcome {
    Done(ResultRecord),
    /// `state` is where the task was when it failed
    Abandoned { state: TaskState, error: BlobsumError },
}

impl TaskOutcome {
    pub fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Done(_) => TaskState::Done,
            TaskOutcome::Abandoned { .. } => TaskState::Abandoned,
        }
    }

    pub fn record(&self) -> Option<&ResultRecord> {
        match self {
            TaskOutcome::Done(record) => Some(record),
            TaskOutcome::Abandoned { .. } => None,
        }
    }
}

/// Runs one descriptor through the pipeline. Shared read-only by all tasks of a batch.
pub struct TaskProcessor {
    mode: RetrievalMode,
    algorithm: ChecksumAlgorithm,
    prefix_depth: usize,
    bucket: Option<String>,
    table: String,
    fetcher: Arc<dyn Fetcher>,
    records: Arc<dyn RecordStore>,
    retry: RetryPolicy,
    task_timeout: Duration,
}

impl TaskProcessor {
    pub fn new(
        mode: RetrievalMode,
        fetcher: Arc<dyn Fetcher>,
        records: Arc<dyn RecordStore>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            algorithm: ChecksumAlgorithm::default(),
            prefix_depth: DEFAULT_SIGNED_URL_PREFIX_DEPTH,
            bucket: None,
            table: table.into(),
            fetcher,
            records,
            retry: RetryPolicy::default(),
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
        }
    }

    pub fn from_config(
        config: &PipelineConfig,
        fetcher: Arc<dyn Fetcher>,
        records: Arc<dyn RecordStore>,
        table: impl Into<String>,
    ) -> Self {
        Self::new(config.mode, fetcher, records, table)
            .with_algorithm(config.algorithm)
            .with_prefix_depth(config.signed_url_prefix_depth)
            .with_bucket(config.storage.bucket.clone())
            .with_retry(config.retry.clone())
            .with_task_timeout(config.concurrency.task_timeout)
    }

    pub fn with_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_prefix_depth(mut self, prefix_depth: usize) -> Self {
        self.prefix_depth = prefix_depth;
        self
    }

    /// Bucket recorded on every result record
    pub fn with_bucket(mut self, bucket: Option<String>) -> Self {
        self.bucket = bucket;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_task_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    pub fn mode(&self) -> RetrievalMode {
        self.mode
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Process one descriptor to completion. The task deadline starts now.
    pub async fn process(&self, index: usize, descriptor: &str, counters: &BatchCounters) -> TaskOutcome {
        self.process_tracked(index, descriptor, counters, &StateCell::new())
            .await
    }

    /// Like [`process`](Self::process), publishing every state change to `state`
    pub async fn process_tracked(
        &self,
        index: usize,
        descriptor: &str,
        counters: &BatchCounters,
        state: &StateCell,
    ) -> TaskOutcome {
        let span = info_span!(
            "task",
            index,
            identifier = field::Empty,
            digest = field::Empty,
            size = field::Empty
        );

        async {
            let deadline = Instant::now() + self.task_timeout;
            state.set(TaskState::Pending);

            match self.run(descriptor, deadline, state).await {
                Ok(record) => {
                    let size = u64::try_from(record.file_size).unwrap_or(0);
                    counters.record_done(size);
                    info!(
                        identifier = %record.file_url,
                        digest = %record.digest,
                        size,
                        "done"
                    );
                    TaskOutcome::Done(record)
                }
                Err(error) => {
                    let state = state.get();
                    counters.record_abandoned();
                    warn!(
                        state = %state,
                        cause = error.kind(),
                        error = %error,
                        descriptor,
                        "abandoned"
                    );
                    TaskOutcome::Abandoned { state, error }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, descriptor: &str, deadline: Instant, state: &StateCell) -> Result<ResultRecord> {
        let reference = ObjectReference::resolve(descriptor, self.mode, self.prefix_depth)?;
        state.set(TaskState::Resolved);
        Span::current().record("identifier", reference.identifier());

        state.set(TaskState::Fetching);
        let FetchedObject {
            mut stream,
            content_length,
        } = within(
            deadline,
            TaskState::Fetching,
            self.retry
                .run("fetch", || self.fetcher.open(&reference))
                .instrument(info_span!("fetch")),
        )
        .await?;

        state.set(TaskState::Digesting);
        let digested = within(
            deadline,
            TaskState::Digesting,
            digest_stream(&mut stream, self.algorithm).instrument(info_span!("digest")),
        )
        .await;
        drop(stream);
        let digested = digested?;

        if let Some(reported) = content_length {
            if reported != digested.bytes_read {
                warn!(
                    reported,
                    counted = digested.bytes_read,
                    "Reported content length differs from bytes read; using the counted size"
                );
            }
        }

        let span = Span::current();
        span.record("digest", field::display(&digested.digest));
        span.record("size", digested.bytes_read);

        state.set(TaskState::Persisting);
        let record = ResultRecord::new(
            reference.identifier(),
            digested.bytes_read,
            digested.digest,
            self.bucket.clone(),
        );

        within(
            deadline,
            TaskState::Persisting,
            self.retry
                .run("persist", || self.records.put(&self.table, &record))
                .instrument(info_span!("persist", table = %self.table)),
        )
        .await?;

        state.set(TaskState::Done);
        Ok(record)
    }
}

async fn within<T>(deadline: Instant, phase: TaskState, fut: impl Future<Output = Result<T>>) -> Result<T> {
    timeout_at(deadline, fut)
        .await
        .map_err(|_| BlobsumError::Timeout(format!("task deadline exceeded while {}", phase)))?
}
