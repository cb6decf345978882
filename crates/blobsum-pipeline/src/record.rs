//! Result records written once per successfully digested object

use blobsum_common::checksum::Digest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One persisted outcome. Built immediately before persistence and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    #[serde(rename = "fileURL")]
    pub file_url: String,
    pub file_size: i64,
    pub digest: Digest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

/// Scalar attribute value of a flat record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordField {
    String(String),
    Number(String),
}

impl ResultRecord {
    pub fn new(file_url: impl Into<String>, file_size: u64, digest: Digest, bucket: Option<String>) -> Self {
        Self {
            file_url: file_url.into(),
            file_size: i64::try_from(file_size).unwrap_or(i64::MAX),
            digest,
            bucket,
        }
    }

    /// Flat attribute map as stored in the record table
    pub fn attributes(&self) -> BTreeMap<&'static str, RecordField> {
        let mut attributes = BTreeMap::new();
        attributes.insert("Fileurl", RecordField::String(self.file_url.clone()));
        attributes.insert("Filesize", RecordField::Number(self.file_size.to_string()));

        match self.digest {
            Digest::Md5(_) => {
                attributes.insert("Md5", RecordField::String(self.digest.to_string()));
            }
            Digest::Crc32(_) => {
                attributes.insert("Crc32", RecordField::Number(self.digest.to_string()));
            }
        }

        if let Some(bucket) = &self.bucket {
            attributes.insert("Bucket", RecordField::String(bucket.clone()));
        }

        attributes
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use blobsum_common::checksum::compute_digest;
    use blobsum_common::types::ChecksumAlgorithm;

    #[test]
    fn test_md5_record_attributes() {
        let digest = compute_digest(&[0u8; 1024], ChecksumAlgorithm::Md5);
        let record = ResultRecord::new("objects/42.bin", 1024, digest, Some("objects".into()));

        let attributes = record.attributes();
        assert_eq!(
            attributes.get("Fileurl"),
            Some(&RecordField::String("objects/42.bin".into()))
        );
        assert_eq!(
            attributes.get("Filesize"),
            Some(&RecordField::Number("1024".into()))
        );
        assert_eq!(
            attributes.get("Md5"),
            Some(&RecordField::String("0f343b0931126a20f133d67c2b018a3b".into()))
        );
        assert_eq!(
            attributes.get("Bucket"),
            Some(&RecordField::String("objects".into()))
        );
        assert!(!attributes.contains_key("Crc32"));
    }

    #[test]
    fn test_crc32_record_without_bucket() {
        let digest = compute_digest(b"hello world", ChecksumAlgorithm::Crc32);
        let record = ResultRecord::new("a/b.txt", 11, digest, None);

        let attributes = record.attributes();
        assert_eq!(
            attributes.get("Crc32"),
            Some(&RecordField::Number("222957957".into()))
        );
        assert!(!attributes.contains_key("Md5"));
        assert!(!attributes.contains_key("Bucket"));
        assert_eq!(attributes.len(), 3);
    }

    #[test]
    fn test_json_shape() {
        let digest = compute_digest(b"", ChecksumAlgorithm::Md5);
        let record = ResultRecord::new("empty.bin", 0, digest, None);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["fileURL"], "empty.bin");
        assert_eq!(json["fileSize"], 0);
        assert_eq!(json["digest"]["algorithm"], "md5");
        assert!(json.get("bucket").is_none());
    }
}
