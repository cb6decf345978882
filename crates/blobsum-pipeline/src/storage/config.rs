use serde::{Deserialize, Serialize};

/// Connection settings for the object store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    /// Required in direct-path mode; recorded on result records when set.
    pub bucket: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl StorageConfig {
    /// Read `S3_*` variables through `lookup`. The region falls back to `AWS_REGION`.
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let region = lookup("S3_REGION")
            .or_else(|| lookup("AWS_REGION"))
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("S3_REGION or AWS_REGION must be set"))?;

        let path_style = match lookup("S3_PATH_STYLE") {
            Some(v) => v
                .parse()
                .map_err(|_| anyhow::anyhow!("S3_PATH_STYLE must be true or false, got '{}'", v))?,
            None => false,
        };

        Ok(Self {
            endpoint: lookup("S3_ENDPOINT").filter(|e| !e.is_empty()),
            region,
            bucket: lookup("S3_BUCKET")
                .or_else(|| lookup("s3bucket"))
                .filter(|b| !b.is_empty()),
            access_key: lookup("S3_ACCESS_KEY").or_else(|| lookup("AWS_ACCESS_KEY_ID")),
            secret_key: lookup("S3_SECRET_KEY").or_else(|| lookup("AWS_SECRET_ACCESS_KEY")),
            path_style,
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: Some(bucket.into()),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }

    /// Static credentials, when both halves are configured
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }
}
