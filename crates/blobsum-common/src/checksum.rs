//! Incremental checksum accumulators
//!
//! The engine is fed chunk by chunk and never needs the whole object in
//! memory. Feeding the same bytes with different chunk boundaries yields
//! the same digest.

use crate::error::Result;
use crate::types::ChecksumAlgorithm;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Read buffer size used by the blocking helpers
pub const CHUNK_SIZE: usize = 8192;

/// Final digest value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "algorithm", content = "value", rename_all = "lowercase")]
pub enum Digest {
    Md5([u8; 16]),
    Crc32(u32),
}

impl Digest {
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        match self {
            Digest::Md5(_) => ChecksumAlgorithm::Md5,
            Digest::Crc32(_) => ChecksumAlgorithm::Crc32,
        }
    }
}

/// MD5 renders as lowercase hex, CRC32 as a decimal integer.
impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Digest::Md5(bytes) => f.write_str(&hex::encode(bytes)),
            Digest::Crc32(value) => write!(f, "{}", value),
        }
    }
}

enum Accumulator {
    Md5(md5::Context),
    Crc32(crc32fast::Hasher),
}

/// Streaming hash accumulator that also counts the bytes it has seen
pub struct DigestEngine {
    accumulator: Accumulator,
    bytes_read: u64,
}

impl DigestEngine {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        let accumulator = match algorithm {
            ChecksumAlgorithm::Md5 => Accumulator::Md5(md5::Context::new()),
            ChecksumAlgorithm::Crc32 => Accumulator::Crc32(crc32fast::Hasher::new()),
        };
        Self {
            accumulator,
            bytes_read: 0,
        }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        match self.accumulator {
            Accumulator::Md5(_) => ChecksumAlgorithm::Md5,
            Accumulator::Crc32(_) => ChecksumAlgorithm::Crc32,
        }
    }

    /// Feed one chunk
    pub fn update(&mut self, chunk: &[u8]) {
        match &mut self.accumulator {
            Accumulator::Md5(ctx) => ctx.consume(chunk),
            Accumulator::Crc32(hasher) => hasher.update(chunk),
        }
        self.bytes_read += chunk.len() as u64;
    }

    /// Bytes fed so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn finalize(self) -> Digest {
        match self.accumulator {
            Accumulator::Md5(ctx) => Digest::Md5(ctx.compute().0),
            Accumulator::Crc32(hasher) => Digest::Crc32(hasher.finalize()),
        }
    }
}

/// One-shot digest of an in-memory buffer
pub fn compute_digest(data: &[u8], algorithm: ChecksumAlgorithm) -> Digest {
    let mut engine = DigestEngine::new(algorithm);
    engine.update(data);
    engine.finalize()
}

/// Digest any blocking reader, returning the digest and the byte count
pub fn compute_checksum<R: Read>(reader: &mut R, algorithm: ChecksumAlgorithm) -> Result<(Digest, u64)> {
    let mut engine = DigestEngine::new(algorithm);
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        engine.update(&buffer[..bytes_read]);
    }

    let size = engine.bytes_read();
    Ok((engine.finalize(), size))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn test_md5_known_values() {
        assert_eq!(
            compute_digest(b"hello world", ChecksumAlgorithm::Md5).to_string(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            compute_digest(b"", ChecksumAlgorithm::Md5).to_string(),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            compute_digest(&[0u8; 1024], ChecksumAlgorithm::Md5).to_string(),
            "0f343b0931126a20f133d67c2b018a3b"
        );
    }

    #[test]
    fn test_crc32_known_values() {
        assert_eq!(compute_digest(b"123456789", ChecksumAlgorithm::Crc32), Digest::Crc32(0xCBF4_3926));
        assert_eq!(
            compute_digest(b"hello world", ChecksumAlgorithm::Crc32).to_string(),
            "222957957"
        );
    }

    #[test]
    fn test_compute_checksum_counts_bytes() {
        let data = vec![7u8; CHUNK_SIZE * 3 + 17];
        let mut cursor = Cursor::new(&data);
        let (digest, size) = compute_checksum(&mut cursor, ChecksumAlgorithm::Md5).unwrap();
        assert_eq!(size, data.len() as u64);
        assert_eq!(digest, compute_digest(&data, ChecksumAlgorithm::Md5));
    }

    #[test]
    fn test_compute_checksum_from_file() {
        let mut file = tempfile::tempfile().unwrap();
        std::io::Write::write_all(&mut file, &[0u8; 1024]).unwrap();
        std::io::Seek::rewind(&mut file).unwrap();

        let (digest, size) = compute_checksum(&mut file, ChecksumAlgorithm::Crc32).unwrap();
        assert_eq!(size, 1024);
        assert_eq!(digest.to_string(), "4021661486");
    }

    #[test]
    fn test_digest_algorithm_tag() {
        let engine = DigestEngine::new(ChecksumAlgorithm::Crc32);
        assert_eq!(engine.algorithm(), ChecksumAlgorithm::Crc32);
        assert_eq!(engine.finalize().algorithm(), ChecksumAlgorithm::Crc32);
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_the_digest(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            chunk in 1usize..257,
        ) {
            for algorithm in [ChecksumAlgorithm::Md5, ChecksumAlgorithm::Crc32] {
                let mut engine = DigestEngine::new(algorithm);
                for piece in data.chunks(chunk) {
                    engine.update(piece);
                }
                prop_assert_eq!(engine.bytes_read(), data.len() as u64);
                prop_assert_eq!(engine.finalize(), compute_digest(&data, algorithm));
            }
        }
    }
}
