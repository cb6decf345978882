//! Single-pass digest over an async byte stream

use blobsum_common::checksum::{Digest, DigestEngine};
use blobsum_common::types::ChecksumAlgorithm;
use blobsum_common::{BlobsumError, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read buffer for object streams
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Digest of a fully drained stream and the number of bytes it held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamDigest {
    pub digest: Digest,
    pub bytes_read: u64,
}

/// Drain `reader` to EOF, feeding every chunk to the accumulator.
///
/// An I/O error mid-stream becomes [`BlobsumError::Digest`] carrying the
/// number of bytes consumed before the failure.
pub async fn digest_stream<R>(reader: &mut R, algorithm: ChecksumAlgorithm) -> Result<StreamDigest>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut engine = DigestEngine::new(algorithm);
    let mut buffer = vec![0u8; STREAM_CHUNK_SIZE];

    loop {
        let n = match reader.read(&mut buffer).await {
            Ok(n) => n,
            Err(e) => {
                return Err(BlobsumError::Digest {
                    bytes_read: engine.bytes_read(),
                    message: e.to_string(),
                })
            }
        };
        if n == 0 {
            break;
        }
        engine.update(&buffer[..n]);
    }

    let bytes_read = engine.bytes_read();
    Ok(StreamDigest {
        digest: engine.finalize(),
        bytes_read,
    })
}
