//! Opening object streams for resolved references

use async_trait::async_trait;
use blobsum_common::{BlobsumError, Result};
use futures::TryStreamExt;
use reqwest::{Client, StatusCode};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::reference::ObjectReference;
use crate::storage::{FetchedObject, ObjectStore};

/// Opens the byte stream behind an [`ObjectReference`]
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn open(&self, reference: &ObjectReference) -> Result<FetchedObject>;
}

/// Direct-path fetcher: resolves keys against one bucket of an object store
#[derive(Clone)]
pub struct StoreFetcher {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl StoreFetcher {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl Fetcher for StoreFetcher {
    async fn open(&self, reference: &ObjectReference) -> Result<FetchedObject> {
        match reference {
            ObjectReference::DirectPath { path } => self.store.get(&self.bucket, path).await,
            ObjectReference::SignedAccess { .. } => Err(BlobsumError::Config(
                "signed-access reference handed to the object store fetcher".to_string(),
            )),
        }
    }
}

/// Signed-access fetcher: plain HTTP GET of the decoded URL
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BlobsumError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn open(&self, reference: &ObjectReference) -> Result<FetchedObject> {
        let url = match reference {
            ObjectReference::SignedAccess { decoded_url, .. } => decoded_url,
            ObjectReference::DirectPath { .. } => {
                return Err(BlobsumError::Config(
                    "direct-path reference handed to the HTTP fetcher".to_string(),
                ))
            }
        };

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| BlobsumError::Transport(format!("GET {} failed: {}", reference.identifier(), e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(reference.identifier(), status));
        }

        let content_length = response.content_length();
        debug!(identifier = reference.identifier(), ?content_length, "Opened HTTP stream");

        let body = response.bytes_stream().map_err(io::Error::other);

        Ok(FetchedObject {
            stream: Box::pin(StreamReader::new(body)),
            content_length,
        })
    }
}

/// 404 is a missing object. Other client errors are final, except request
/// timeout and throttling which may pass on a later attempt.
fn classify_status(identifier: &str, status: StatusCode) -> BlobsumError {
    match status {
        StatusCode::NOT_FOUND => BlobsumError::NotFound(identifier.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            BlobsumError::Transport(format!("GET {} returned {}", identifier, status))
        }
        s if s.is_client_error() => {
            BlobsumError::Rejected(format!("GET {} returned {}", identifier, status))
        }
        _ => BlobsumError::Transport(format!("GET {} returned {}", identifier, status)),
    }
}
