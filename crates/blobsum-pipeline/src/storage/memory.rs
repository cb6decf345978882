//! In-process object store for tests and dry runs

use async_trait::async_trait;
use blobsum_common::{BlobsumError, Result};
use bytes::Bytes;
use futures::stream;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::io::StreamReader;

use super::{FetchedObject, ObjectCatalog, ObjectStore, ObjectSummary};

#[derive(Clone)]
enum Entry {
    Complete { data: Bytes, report_length: bool },
    /// Yields `data` then fails with a connection reset
    Broken { data: Bytes },
}

/// Objects keyed by `(bucket, key)`, shared between clones
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<BTreeMap<(String, String), Entry>>>,
    transient_failures: Arc<AtomicU32>,
    gets: Arc<AtomicUsize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, bucket: &str, key: &str, entry: Entry) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert((bucket.to_string(), key.to_string()), entry);
        }
    }

    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.put(
            bucket,
            key,
            Entry::Complete {
                data: data.into(),
                report_length: true,
            },
        );
    }

    /// Store an object whose length is not reported on open
    pub fn insert_without_length(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.put(
            bucket,
            key,
            Entry::Complete {
                data: data.into(),
                report_length: false,
            },
        );
    }

    /// Store an object whose stream breaks after `data` has been read
    pub fn insert_broken(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.put(bucket, key, Entry::Broken { data: data.into() });
    }

    /// Make the next `n` opens fail with a transient transport error
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Number of `get` calls seen so far
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn lookup(&self, bucket: &str, key: &str) -> Result<Entry> {
        let objects = self
            .objects
            .read()
            .map_err(|_| BlobsumError::Transport("memory store lock poisoned".to_string()))?;

        objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| BlobsumError::NotFound(format!("memory://{}/{}", bucket, key)))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<FetchedObject> {
        self.gets.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BlobsumError::Transport(format!(
                "injected failure opening memory://{}/{}",
                bucket, key
            )));
        }

        match self.lookup(bucket, key)? {
            Entry::Complete {
                data,
                report_length,
            } => {
                let content_length = report_length.then_some(data.len() as u64);
                let chunks = stream::iter(vec![Ok::<Bytes, io::Error>(data)]);
                Ok(FetchedObject {
                    stream: Box::pin(StreamReader::new(chunks)),
                    content_length,
                })
            }
            Entry::Broken { data } => {
                let chunks = stream::iter(vec![
                    Ok(data),
                    Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "connection reset by peer",
                    )),
                ]);
                Ok(FetchedObject {
                    stream: Box::pin(StreamReader::new(chunks)),
                    content_length: None,
                })
            }
        }
    }
}

#[async_trait]
impl ObjectCatalog for MemoryObjectStore {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| BlobsumError::Transport("memory store lock poisoned".to_string()))?;

        Ok(objects
            .iter()
            .filter(|((b, _), _)| b == bucket)
            .map(|((_, key), entry)| {
                let size = match entry {
                    Entry::Complete { data, .. } | Entry::Broken { data } => data.len() as i64,
                };
                ObjectSummary {
                    key: key.clone(),
                    size,
                }
            })
            .collect())
    }

    async fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String> {
        Ok(format!(
            "memory://{}/{}?expires={}",
            bucket,
            key,
            expires_in.as_secs()
        ))
    }
}
