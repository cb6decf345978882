//! Common types used across blobsum

use serde::{Deserialize, Serialize};

use crate::error::BlobsumError;

/// How task descriptors in a batch identify their object.
///
/// The mode is chosen once per batch; descriptors are never sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalMode {
    /// Descriptor is the object key inside the configured bucket.
    DirectPath,
    /// Descriptor is a base64-encoded, time-limited fetch URL.
    SignedAccess,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::DirectPath => "direct-path",
            RetrievalMode::SignedAccess => "signed-access",
        }
    }
}

impl std::str::FromStr for RetrievalMode {
    type Err = BlobsumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct-path" | "direct_path" | "s3path" => Ok(RetrievalMode::DirectPath),
            "signed-access" | "signed_access" | "s3signed" => Ok(RetrievalMode::SignedAccess),
            other => Err(BlobsumError::Config(format!("Invalid retrieval mode: {}", other))),
        }
    }
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// MD5, for content addressing
    #[default]
    Md5,
    /// CRC-32 with the IEEE polynomial, for fast integrity checks
    Crc32,
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = BlobsumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "crc32" | "crc32ieee" | "crc32-ieee" => Ok(ChecksumAlgorithm::Crc32),
            other => Err(BlobsumError::Config(format!("Invalid checksum algorithm: {}", other))),
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Md5 => write!(f, "md5"),
            ChecksumAlgorithm::Crc32 => write!(f, "crc32"),
        }
    }
}
