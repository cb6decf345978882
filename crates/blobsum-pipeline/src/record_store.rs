//! Record persistence: DynamoDB in production, memory for tests and dry runs

use async_trait::async_trait;
use aws_sdk_dynamodb::{error::DisplayErrorContext, types::AttributeValue, Client};
use blobsum_common::{BlobsumError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument};

use crate::record::{RecordField, ResultRecord};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, table: &str, record: &ResultRecord) -> Result<()>;
}

#[derive(Clone)]
pub struct DynamoRecordStore {
    client: Client,
}

impl DynamoRecordStore {
    /// Endpoint overrides come from the SDK's own `AWS_ENDPOINT_URL_DYNAMODB`
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        let client = Client::new(sdk_config);

        info!(region = ?sdk_config.region(), "DynamoDB client initialized");

        Self { client }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn to_attribute_value(field: RecordField) -> AttributeValue {
    match field {
        RecordField::String(s) => AttributeValue::S(s),
        RecordField::Number(n) => AttributeValue::N(n),
    }
}

#[async_trait]
impl RecordStore for DynamoRecordStore {
    #[instrument(skip(self, record), fields(file_url = %record.file_url))]
    async fn put(&self, table: &str, record: &ResultRecord) -> Result<()> {
        let item: HashMap<String, AttributeValue> = record
            .attributes()
            .into_iter()
            .map(|(name, field)| (name.to_string(), to_attribute_value(field)))
            .collect();

        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| {
                BlobsumError::Persist(format!(
                    "PutItem into {} failed: {}",
                    table,
                    DisplayErrorContext(&e)
                ))
            })?;

        debug!(table, "Record stored");
        Ok(())
    }
}

/// Keeps records in memory; failures can be scripted
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<Mutex<Vec<(String, ResultRecord)>>>,
    transient_failures: Arc<AtomicU32>,
    fail_always: Arc<AtomicBool>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored records with the table each was written to
    pub fn records(&self) -> Vec<(String, ResultRecord)> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Make the next `n` writes fail with a persistence error
    pub fn fail_next(&self, n: u32) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Make every write fail until switched off again
    pub fn fail_always(&self, enabled: bool) {
        self.fail_always.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, table: &str, record: &ResultRecord) -> Result<()> {
        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if injected || self.fail_always.load(Ordering::SeqCst) {
            return Err(BlobsumError::Persist(format!(
                "injected failure writing {} into {}",
                record.file_url, table
            )));
        }

        self.records
            .lock()
            .map_err(|_| BlobsumError::Persist("memory record store lock poisoned".to_string()))?
            .push((table.to_string(), record.clone()));

        Ok(())
    }
}
