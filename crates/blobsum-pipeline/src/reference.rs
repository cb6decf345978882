//! Object references: where a task's bytes live
//!
//! A raw task body becomes an [`ObjectReference`] according to the batch's
//! [`RetrievalMode`]. Only signed-access bodies can fail to resolve.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use blobsum_common::types::RetrievalMode;
use blobsum_common::{BlobsumError, Result};

/// Resolved location of one task's object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectReference {
    /// Stable key resolved against the object store
    DirectPath { path: String },
    /// Time-limited URL decoded from the task body
    SignedAccess { decoded_url: String, identifier: String },
}

impl ObjectReference {
    /// Resolve a raw task body.
    ///
    /// `prefix_depth` is the number of leading `/` segments dropped from a
    /// signed URL when deriving its identifier.
    pub fn resolve(body: &str, mode: RetrievalMode, prefix_depth: usize) -> Result<Self> {
        match mode {
            RetrievalMode::DirectPath => Ok(ObjectReference::DirectPath {
                path: body.to_string(),
            }),
            RetrievalMode::SignedAccess => {
                let decoded_url = decode_signed_body(body)?;
                let identifier = signed_url_identifier(&decoded_url, prefix_depth);
                Ok(ObjectReference::SignedAccess {
                    decoded_url,
                    identifier,
                })
            }
        }
    }

    /// Identifier written to the result record and the logs
    pub fn identifier(&self) -> &str {
        match self {
            ObjectReference::DirectPath { path } => path,
            ObjectReference::SignedAccess { identifier, .. } => identifier,
        }
    }

    pub fn mode(&self) -> RetrievalMode {
        match self {
            ObjectReference::DirectPath { .. } => RetrievalMode::DirectPath,
            ObjectReference::SignedAccess { .. } => RetrievalMode::SignedAccess,
        }
    }
}

fn decode_signed_body(body: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(body.trim())
        .map_err(|e| BlobsumError::Decode(format!("body is not valid base64: {}", e)))?;

    String::from_utf8(bytes)
        .map_err(|e| BlobsumError::Decode(format!("decoded body is not UTF-8: {}", e)))
}

/// Recover the object key from a signed URL by position.
///
/// `https://host/bucket/a/b/file.bin?sig=...` with a depth of 4 yields
/// `a/b/file.bin`. Anything too short to strip degrades to the full URL.
pub fn signed_url_identifier(decoded_url: &str, prefix_depth: usize) -> String {
    let without_query = decoded_url.split('?').next().unwrap_or(decoded_url);
    let segments: Vec<&str> = without_query.split('/').collect();

    if segments.len() <= prefix_depth {
        return decoded_url.to_string();
    }

    let key = segments[prefix_depth..].join("/");
    if key.is_empty() {
        decoded_url.to_string()
    } else {
        key
    }
}
