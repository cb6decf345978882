//! Configuration management

use blobsum_common::types::{ChecksumAlgorithm, RetrievalMode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};
use crate::retry::RetryPolicy;
use crate::storage::config::StorageConfig;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Leading `/`-separated segments dropped from a signed URL to recover the
/// object key: scheme, empty authority separator, host, bucket.
pub const DEFAULT_SIGNED_URL_PREFIX_DEPTH: usize = 4;

/// Default number of tasks in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Default per-task deadline (fetch + digest + persist) in seconds.
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;

/// Default whole-batch deadline in seconds.
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 840;

/// Default attempts per fetch or persist call.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default first backoff delay in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;

/// Default backoff cap in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Default HTTP client timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;

/// Fan-out and deadline settings for one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub max_concurrency: usize,
    pub task_timeout: Duration,
    pub batch_timeout: Duration,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            batch_timeout: Duration::from_secs(DEFAULT_BATCH_TIMEOUT_SECS),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: RetrievalMode,
    pub algorithm: ChecksumAlgorithm,
    pub storage: StorageConfig,
    pub record_table: Option<String>,
    pub signed_url_prefix_depth: usize,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> PipelineResult<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::Config(format!("{} has an invalid value: '{}'", key, raw))),
        None => Ok(default),
    }
}

impl PipelineConfig {
    /// Load configuration from the process environment (and `.env`, if present)
    pub fn from_env() -> PipelineResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PipelineResult<Self> {
        let mode_raw = lookup("RETRIEVAL_MODE")
            .or_else(|| lookup("lambdamode"))
            .ok_or_else(|| PipelineError::Config("RETRIEVAL_MODE must be set".to_string()))?;
        let mode = mode_raw
            .parse::<RetrievalMode>()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let algorithm = match lookup("DIGEST_ALGORITHM") {
            Some(raw) => raw
                .parse::<ChecksumAlgorithm>()
                .map_err(|e| PipelineError::Config(e.to_string()))?,
            None => ChecksumAlgorithm::default(),
        };

        let storage =
            StorageConfig::from_lookup(&lookup).map_err(|e| PipelineError::Config(e.to_string()))?;

        let config = PipelineConfig {
            mode,
            algorithm,
            storage,
            record_table: lookup("RECORD_TABLE")
                .or_else(|| lookup("ddbtable"))
                .filter(|t| !t.is_empty()),
            signed_url_prefix_depth: parse_var(
                &lookup,
                "SIGNED_URL_PREFIX_DEPTH",
                DEFAULT_SIGNED_URL_PREFIX_DEPTH,
            )?,
            concurrency: ConcurrencyConfig {
                max_concurrency: parse_var(&lookup, "MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY)?,
                task_timeout: Duration::from_secs(parse_var(
                    &lookup,
                    "TASK_TIMEOUT_SECS",
                    DEFAULT_TASK_TIMEOUT_SECS,
                )?),
                batch_timeout: Duration::from_secs(parse_var(
                    &lookup,
                    "BATCH_TIMEOUT_SECS",
                    DEFAULT_BATCH_TIMEOUT_SECS,
                )?),
            },
            retry: RetryPolicy {
                max_attempts: parse_var(&lookup, "MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
                base_delay: Duration::from_millis(parse_var(
                    &lookup,
                    "RETRY_BASE_DELAY_MS",
                    DEFAULT_RETRY_BASE_DELAY_MS,
                )?),
                max_delay: Duration::from_millis(parse_var(
                    &lookup,
                    "RETRY_MAX_DELAY_MS",
                    DEFAULT_RETRY_MAX_DELAY_MS,
                )?),
            },
            http_timeout: Duration::from_secs(parse_var(
                &lookup,
                "HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> PipelineResult<()> {
        if self.mode == RetrievalMode::DirectPath && self.storage.bucket.is_none() {
            return Err(PipelineError::Config(
                "S3_BUCKET must be set in direct-path mode".to_string(),
            ));
        }

        if self.concurrency.max_concurrency == 0 {
            return Err(PipelineError::Config(
                "MAX_CONCURRENCY must be greater than 0".to_string(),
            ));
        }

        if self.concurrency.task_timeout.is_zero() || self.concurrency.batch_timeout.is_zero() {
            return Err(PipelineError::Config("Timeouts must be greater than 0".to_string()));
        }

        if self.retry.max_attempts == 0 {
            return Err(PipelineError::Config("MAX_RETRIES must be at least 1".to_string()));
        }

        if self.retry.base_delay > self.retry.max_delay {
            return Err(PipelineError::Config(format!(
                "RETRY_BASE_DELAY_MS ({:?}) cannot be greater than RETRY_MAX_DELAY_MS ({:?})",
                self.retry.base_delay, self.retry.max_delay
            )));
        }

        if self.concurrency.task_timeout > self.concurrency.batch_timeout {
            tracing::warn!(
                task_timeout = ?self.concurrency.task_timeout,
                batch_timeout = ?self.concurrency.batch_timeout,
                "Task timeout exceeds batch timeout; the batch deadline will cut tasks short"
            );
        }

        Ok(())
    }

    /// Table name for the record store; its absence is a setup failure
    pub fn record_table_name(&self) -> PipelineResult<&str> {
        self.record_table
            .as_deref()
            .ok_or_else(|| PipelineError::Config("RECORD_TABLE must be set".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("RETRIEVAL_MODE", "direct-path"),
            ("S3_BUCKET", "objects"),
            ("S3_REGION", "eu-west-1"),
            ("RECORD_TABLE", "digests"),
        ]))
        .unwrap();

        assert_eq!(config.mode, RetrievalMode::DirectPath);
        assert_eq!(config.algorithm, ChecksumAlgorithm::Md5);
        assert_eq!(config.signed_url_prefix_depth, DEFAULT_SIGNED_URL_PREFIX_DEPTH);
        assert_eq!(config.concurrency, ConcurrencyConfig::default());
        assert_eq!(config.retry.max_attempts, DEFAULT_MAX_RETRIES);
        assert_eq!(config.record_table_name().unwrap(), "digests");
    }

    #[test]
    fn test_legacy_variable_names() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("lambdamode", "s3signed"),
            ("ddbtable", "legacy-table"),
            ("AWS_REGION", "eu-west-1"),
            ("DIGEST_ALGORITHM", "crc32"),
        ]))
        .unwrap();

        assert_eq!(config.mode, RetrievalMode::SignedAccess);
        assert_eq!(config.algorithm, ChecksumAlgorithm::Crc32);
        assert_eq!(config.record_table.as_deref(), Some("legacy-table"));
        assert_eq!(config.storage.bucket, None);
    }

    #[test]
    fn test_missing_mode_fails() {
        let err = PipelineConfig::from_lookup(lookup_from(&[("S3_REGION", "eu-west-1")])).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_direct_path_requires_bucket() {
        let err = PipelineConfig::from_lookup(lookup_from(&[
            ("RETRIEVAL_MODE", "direct-path"),
            ("S3_REGION", "eu-west-1"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));
    }

    #[test]
    fn test_invalid_numbers_fail() {
        let err = PipelineConfig::from_lookup(lookup_from(&[
            ("RETRIEVAL_MODE", "signed-access"),
            ("S3_REGION", "eu-west-1"),
            ("MAX_CONCURRENCY", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAX_CONCURRENCY"));

        let err = PipelineConfig::from_lookup(lookup_from(&[
            ("RETRIEVAL_MODE", "signed-access"),
            ("S3_REGION", "eu-west-1"),
            ("MAX_CONCURRENCY", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_missing_table_reported_on_demand() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("RETRIEVAL_MODE", "signed-access"),
            ("S3_REGION", "eu-west-1"),
        ]))
        .unwrap();
        assert!(config.record_table_name().is_err());
    }
}
