//! Descriptor generation for load runs: one descriptor per object in a bucket

use base64::{engine::general_purpose::STANDARD, Engine as _};
use blobsum_common::types::RetrievalMode;
use blobsum_common::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::storage::ObjectCatalog;

/// Signed URLs stay valid for an hour by default
pub const DEFAULT_SIGNED_URL_EXPIRY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeneratedDescriptors {
    pub descriptors: Vec<String>,
    pub listed: usize,
    /// Zero-byte objects
    pub skipped: usize,
    /// Objects whose URL could not be signed
    pub failed: usize,
}

pub struct DescriptorGenerator {
    catalog: Arc<dyn ObjectCatalog>,
    bucket: String,
    expiry: Duration,
}

impl DescriptorGenerator {
    pub fn new(catalog: Arc<dyn ObjectCatalog>, bucket: impl Into<String>) -> Self {
        Self {
            catalog,
            bucket: bucket.into(),
            expiry: DEFAULT_SIGNED_URL_EXPIRY,
        }
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    /// List the bucket and produce descriptors for `mode`.
    ///
    /// Direct-path descriptors are the object keys; signed-access
    /// descriptors are `base64(presigned GET URL)`.
    pub async fn generate(&self, mode: RetrievalMode) -> Result<GeneratedDescriptors> {
        let objects = self.catalog.list_objects(&self.bucket).await?;
        let mut generated = GeneratedDescriptors {
            listed: objects.len(),
            ..Default::default()
        };

        for object in objects {
            if object.size <= 0 {
                info!(key = %object.key, "Skipping zero-byte object");
                generated.skipped += 1;
                continue;
            }

            match mode {
                RetrievalMode::DirectPath => generated.descriptors.push(object.key),
                RetrievalMode::SignedAccess => {
                    match self
                        .catalog
                        .presign_get(&self.bucket, &object.key, self.expiry)
                        .await
                    {
                        Ok(url) => generated.descriptors.push(STANDARD.encode(url)),
                        Err(e) => {
                            warn!(key = %object.key, error = %e, "Failed to sign object URL, skipping");
                            generated.failed += 1;
                        }
                    }
                }
            }
        }

        info!(
            bucket = %self.bucket,
            listed = generated.listed,
            skipped = generated.skipped,
            failed = generated.failed,
            emitted = generated.descriptors.len(),
            "Generated descriptors"
        );

        Ok(generated)
    }
}
