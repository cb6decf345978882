use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::Region,
    error::{DisplayErrorContext, SdkError},
    operation::get_object::GetObjectError,
    presigning::PresigningConfig,
    Client,
};
use blobsum_common::{BlobsumError, Result};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{debug, info, instrument};

pub mod config;
pub mod memory;

pub use memory::MemoryObjectStore;

/// Byte stream of one object. Dropping it releases the underlying connection.
pub type ObjectStream = Pin<Box<dyn AsyncRead + Send>>;

/// An open object: its stream plus the length the transport reported, if any
pub struct FetchedObject {
    pub stream: ObjectStream,
    pub content_length: Option<u64>,
}

impl std::fmt::Debug for FetchedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedObject")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// One entry of a bucket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
}

/// Read access to blob storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open `key` in `bucket` for streaming
    async fn get(&self, bucket: &str, key: &str) -> Result<FetchedObject>;
}

/// Listing and URL signing, used to produce task descriptors
#[async_trait]
pub trait ObjectCatalog: Send + Sync {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>>;

    async fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String>;
}

/// Load the shared AWS configuration (region, credentials) for all clients
pub async fn load_aws_config(config: &config::StorageConfig) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.region.clone()));

    if let Some((access_key, secret_key)) = config.static_credentials() {
        loader = loader.credentials_provider(Credentials::new(
            access_key,
            secret_key,
            None,
            None,
            "blobsum-static",
        ));
    }

    loader.load().await
}

/// S3-backed object store
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(sdk_config: &aws_config::SdkConfig, config: &config::StorageConfig) -> Self {
        debug!("Initializing S3 client with config: {:?}", config);

        let mut s3_config_builder =
            aws_sdk_s3::config::Builder::from(sdk_config).force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(region = %config.region, endpoint = ?config.endpoint, "S3 client initialized");

        Self { client }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn classify_get_error(bucket: &str, key: &str, err: SdkError<GetObjectError>) -> BlobsumError {
    let not_found = match &err {
        SdkError::ServiceError(service) => {
            service.err().is_no_such_key() || service.raw().status().as_u16() == 404
        }
        _ => false,
    };

    if not_found {
        BlobsumError::NotFound(format!("s3://{}/{}", bucket, key))
    } else {
        BlobsumError::Transport(format!(
            "GetObject s3://{}/{} failed: {}",
            bucket,
            key,
            DisplayErrorContext(&err)
        ))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<FetchedObject> {
        debug!("Getting stream from s3://{}/{}", bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| classify_get_error(bucket, key, e))?;

        let content_length = response.content_length().and_then(|len| u64::try_from(len).ok());

        Ok(FetchedObject {
            stream: Box::pin(response.body.into_async_read()),
            content_length,
        })
    }
}

#[async_trait]
impl ObjectCatalog for S3ObjectStore {
    #[instrument(skip(self))]
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    BlobsumError::Transport(format!(
                        "ListObjectsV2 s3://{} failed: {}",
                        bucket,
                        DisplayErrorContext(&e)
                    ))
                })?;

            objects.extend(response.contents().iter().filter_map(|obj| {
                obj.key().map(|key| ObjectSummary {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0),
                })
            }));

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!("Listed {} objects in s3://{}", objects.len(), bucket);

        Ok(objects)
    }

    #[instrument(skip(self))]
    async fn presign_get(&self, bucket: &str, key: &str, expires_in: Duration) -> Result<String> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| BlobsumError::Config(format!("Invalid presign expiry: {}", e)))?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| {
                BlobsumError::Transport(format!(
                    "Failed to presign s3://{}/{}: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(presigned_request.uri().to_string())
    }
}
