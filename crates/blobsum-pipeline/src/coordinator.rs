//! Batch fan-out / fan-in
//!
//! One spawned task per descriptor, at most `max_concurrency` of them past
//! the semaphore at once. The coordinator waits for all of them, or for the
//! batch deadline, then reports a [`BatchSummary`].

use aws_config::SdkConfig;
use blobsum_common::types::RetrievalMode;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{ConcurrencyConfig, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::fetcher::{Fetcher, HttpFetcher, StoreFetcher};
use crate::processor::{StateCell, TaskProcessor, TaskState};
use crate::record_store::RecordStore;
use crate::storage::S3ObjectStore;
use crate::summary::{BatchCounters, BatchSummary};

/// Build the fetcher for the configured retrieval mode.
///
/// Failure here is a setup failure: no task of the batch is attempted.
pub fn connect_fetcher(config: &PipelineConfig, sdk_config: &SdkConfig) -> PipelineResult<Arc<dyn Fetcher>> {
    match config.mode {
        RetrievalMode::DirectPath => {
            let bucket = config.storage.bucket.clone().ok_or_else(|| {
                PipelineError::Config("S3_BUCKET must be set in direct-path mode".to_string())
            })?;
            let store = S3ObjectStore::new(sdk_config, &config.storage);
            Ok(Arc::new(StoreFetcher::new(Arc::new(store), bucket)))
        }
        RetrievalMode::SignedAccess => {
            let fetcher = HttpFetcher::new(config.http_timeout)
                .map_err(|e| PipelineError::Setup(e.to_string()))?;
            Ok(Arc::new(fetcher))
        }
    }
}

/// A spawned task the coordinator has not seen finish yet
struct Outstanding {
    index: usize,
    descriptor: String,
    state: Arc<StateCell>,
}

pub struct BatchCoordinator {
    processor: Arc<TaskProcessor>,
    concurrency: ConcurrencyConfig,
}

impl BatchCoordinator {
    pub fn new(processor: TaskProcessor, concurrency: ConcurrencyConfig) -> Self {
        Self {
            processor: Arc::new(processor),
            concurrency,
        }
    }

    pub fn from_config(
        config: &PipelineConfig,
        fetcher: Arc<dyn Fetcher>,
        records: Arc<dyn RecordStore>,
        table: impl Into<String>,
    ) -> Self {
        Self::new(
            TaskProcessor::from_config(config, fetcher, records, table),
            config.concurrency.clone(),
        )
    }

    /// Run every descriptor through the pipeline and aggregate the outcomes.
    ///
    /// Individual task failures never fail the call. An empty batch is
    /// rejected with [`PipelineError::EmptyBatch`].
    pub async fn process(&self, descriptors: &[String]) -> PipelineResult<BatchSummary> {
        if descriptors.is_empty() {
            return Err(PipelineError::EmptyBatch);
        }

        let batch_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "batch",
            batch_id = %batch_id,
            tasks = descriptors.len(),
            mode = %self.processor.mode()
        );

        Ok(self.run(batch_id, descriptors).instrument(span).await)
    }

    async fn run(&self, batch_id: String, descriptors: &[String]) -> BatchSummary {
        let start = Utc::now();
        let started = Instant::now();
        let deadline = started + self.concurrency.batch_timeout;

        let counters = Arc::new(BatchCounters::new());
        let semaphore = Arc::new(Semaphore::new(self.concurrency.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut outstanding: HashMap<Id, Outstanding> = HashMap::with_capacity(descriptors.len());

        for (index, descriptor) in descriptors.iter().enumerate() {
            let processor = self.processor.clone();
            let counters = counters.clone();
            let semaphore = semaphore.clone();
            let state = Arc::new(StateCell::new());
            let task_state = state.clone();
            let task_descriptor = descriptor.clone();

            let handle = tasks.spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        counters.record_abandoned();
                        return TaskState::Abandoned;
                    };
                    processor
                        .process_tracked(index, &task_descriptor, &counters, &task_state)
                        .await
                        .state()
                }
                .in_current_span(),
            );
            outstanding.insert(
                handle.id(),
                Outstanding {
                    index,
                    descriptor: descriptor.clone(),
                    state,
                },
            );
        }

        let mut timed_out = false;
        loop {
            match timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(Ok((id, _)))) => {
                    outstanding.remove(&id);
                }
                Ok(Some(Err(e))) => note_join_error(e, &mut outstanding, &counters),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    warn!(
                        outstanding = tasks.len(),
                        "Batch deadline exceeded, abandoning unfinished tasks"
                    );
                    tasks.abort_all();
                    while let Some(result) = tasks.join_next_with_id().await {
                        match result {
                            Ok((id, _)) => {
                                outstanding.remove(&id);
                            }
                            Err(e) => note_join_error(e, &mut outstanding, &counters),
                        }
                    }
                    break;
                }
            }
        }

        let summary = BatchSummary {
            batch_id,
            start,
            end: Utc::now(),
            task_count: descriptors.len() as u64,
            processed_count: counters.processed(),
            abandoned_count: counters.abandoned(),
            total_bytes: counters.total_bytes(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            timed_out,
        };

        info!(
            processed = summary.processed_count,
            total_kb = summary.total_kb(),
            elapsed_ms = summary.elapsed_ms,
            abandoned = summary.abandoned_count,
            "processed {} messages with {} KB in {} msec",
            summary.processed_count,
            summary.total_kb(),
            summary.elapsed_ms
        );

        summary
    }
}

/// Count a task that never reported an outcome and log it with the state it was in
fn note_join_error(e: JoinError, outstanding: &mut HashMap<Id, Outstanding>, counters: &BatchCounters) {
    counters.record_abandoned();
    let Some(task) = outstanding.remove(&e.id()) else {
        error!(error = %e, "Unknown task ended without an outcome");
        return;
    };

    let state = task.state.get();
    if e.is_panic() {
        error!(
            index = task.index,
            state = %state,
            descriptor = %task.descriptor,
            error = %e,
            "Task panicked"
        );
    } else {
        warn!(
            index = task.index,
            state = %state,
            cause = "timeout",
            error = "batch deadline exceeded",
            descriptor = %task.descriptor,
            "abandoned"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::record_store::MemoryRecordStore;
    use crate::reference::ObjectReference;
    use crate::retry::RetryPolicy;
    use crate::storage::{FetchedObject, MemoryObjectStore};
    use async_trait::async_trait;
    use aws_config::{BehaviorVersion, Region};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn coordinator(
        fetcher: Arc<dyn Fetcher>,
        records: &MemoryRecordStore,
        concurrency: ConcurrencyConfig,
    ) -> BatchCoordinator {
        let processor = TaskProcessor::new(
            RetrievalMode::DirectPath,
            fetcher,
            Arc::new(records.clone()),
            "results",
        )
        .with_retry(RetryPolicy::none())
        .with_task_timeout(concurrency.task_timeout);
        BatchCoordinator::new(processor, concurrency)
    }

    /// Sleeps before serving each object and tracks peak parallelism
    struct SlowFetcher {
        inner: StoreFetcher,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn open(&self, reference: &ObjectReference) -> blobsum_common::Result<FetchedObject> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.open(reference).await
        }
    }

    fn slow_fetcher(store: &MemoryObjectStore, delay: Duration) -> Arc<SlowFetcher> {
        Arc::new(SlowFetcher {
            inner: StoreFetcher::new(Arc::new(store.clone()), "objects"),
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Log output of the current thread's subscriber
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn line_for(&self, needle: &str) -> String {
            let text = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            text.lines()
                .find(|line| line.contains(needle))
                .unwrap_or_else(|| panic!("no log line contains {:?} in:\n{}", needle, text))
                .to_string()
        }
    }

    fn signed_access_config() -> PipelineConfig {
        PipelineConfig::from_lookup(|key| match key {
            "RETRIEVAL_MODE" => Some("signed-access".to_string()),
            "S3_REGION" => Some("eu-west-1".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn sdk_config() -> SdkConfig {
        SdkConfig::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Some(Region::new("eu-west-1")))
            .build()
    }

    #[test]
    fn test_direct_path_without_bucket_fails_setup() {
        let mut config = signed_access_config();
        config.mode = RetrievalMode::DirectPath;

        match connect_fetcher(&config, &sdk_config()) {
            Err(PipelineError::Config(message)) => assert!(message.contains("S3_BUCKET")),
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("direct path without a bucket must not connect"),
        }
    }

    #[test]
    fn test_fetcher_is_built_for_each_mode() {
        let mut config = signed_access_config();
        assert!(connect_fetcher(&config, &sdk_config()).is_ok());

        config.mode = RetrievalMode::DirectPath;
        config.storage.bucket = Some("objects".to_string());
        assert!(connect_fetcher(&config, &sdk_config()).is_ok());
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let store = MemoryObjectStore::new();
        let records = MemoryRecordStore::new();
        let coordinator = coordinator(
            Arc::new(StoreFetcher::new(Arc::new(store.clone()), "objects")),
            &records,
            ConcurrencyConfig::default(),
        );

        for _ in 0..3 {
            let err = coordinator.process(&[]).await.unwrap_err();
            assert!(matches!(err, PipelineError::EmptyBatch));
        }
        assert_eq!(store.gets(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_is_bounded() {
        let store = MemoryObjectStore::new();
        let descriptors: Vec<String> = (0..20).map(|i| format!("obj-{}", i)).collect();
        for key in &descriptors {
            store.insert("objects", key, vec![1u8; 10]);
        }
        let records = MemoryRecordStore::new();
        let fetcher = slow_fetcher(&store, Duration::from_millis(100));

        let coordinator = coordinator(
            fetcher.clone(),
            &records,
            ConcurrencyConfig {
                max_concurrency: 3,
                ..ConcurrencyConfig::default()
            },
        );
        let summary = coordinator.process(&descriptors).await.unwrap();

        assert_eq!(summary.processed_count, 20);
        assert_eq!(summary.total_bytes, 200);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 3);
        assert!(!summary.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_deadline_abandons_outstanding_tasks() {
        let store = MemoryObjectStore::new();
        let descriptors: Vec<String> = (0..4).map(|i| format!("obj-{}", i)).collect();
        for key in &descriptors {
            store.insert("objects", key, vec![0u8; 1]);
        }
        let records = MemoryRecordStore::new();

        // one worker, 3s per task, 5s for the batch: one task finishes
        let coordinator = coordinator(
            slow_fetcher(&store, Duration::from_secs(3)),
            &records,
            ConcurrencyConfig {
                max_concurrency: 1,
                task_timeout: Duration::from_secs(60),
                batch_timeout: Duration::from_secs(5),
            },
        );
        let summary = coordinator.process(&descriptors).await.unwrap();

        assert!(summary.timed_out);
        assert_eq!(summary.processed_count, 1);
        assert_eq!(summary.abandoned_count, 3);
        assert_eq!(summary.task_count, 4);
        assert_eq!(records.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_are_logged_with_descriptor_and_state() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = MemoryObjectStore::new();
        let descriptors: Vec<String> = ["first-key", "second-key", "third-key"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for key in &descriptors {
            store.insert("objects", key, vec![0u8; 1]);
        }
        let records = MemoryRecordStore::new();

        let coordinator = coordinator(
            slow_fetcher(&store, Duration::from_secs(3)),
            &records,
            ConcurrencyConfig {
                max_concurrency: 1,
                task_timeout: Duration::from_secs(60),
                batch_timeout: Duration::from_secs(5),
            },
        );
        let summary = coordinator.process(&descriptors).await.unwrap();
        assert_eq!(summary.abandoned_count, 2);

        // second-key holds the only permit when the deadline hits
        let second = logs.line_for("descriptor=second-key");
        assert!(second.contains("abandoned"));
        assert!(second.contains("index=1"));
        assert!(second.contains("state=fetching"));
        assert!(second.contains("timeout"));

        let third = logs.line_for("descriptor=third-key");
        assert!(third.contains("index=2"));
        assert!(third.contains("state=pending"));
    }

    #[tokio::test]
    async fn test_mixed_outcomes_are_aggregated() {
        let store = MemoryObjectStore::new();
        store.insert("objects", "a", vec![0u8; 1024]);
        store.insert("objects", "b", vec![0u8; 2048]);
        store.insert_broken("objects", "c", vec![0u8; 10]);
        let records = MemoryRecordStore::new();

        let coordinator = coordinator(
            Arc::new(StoreFetcher::new(Arc::new(store), "objects")),
            &records,
            ConcurrencyConfig::default(),
        );
        let descriptors = vec!["a".to_string(), "missing".to_string(), "b".to_string(), "c".to_string()];
        let summary = coordinator.process(&descriptors).await.unwrap();

        assert_eq!(summary.processed_count, 2);
        assert_eq!(summary.abandoned_count, 2);
        assert_eq!(summary.total_bytes, 3072);
        assert_eq!(summary.total_kb(), 3);
        assert!(summary.end >= summary.start);
    }
}
