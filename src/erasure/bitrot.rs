//! Bitrot-protected shard I/O
//!
//! Every shard file interleaves an inline hash chain with the payload:
//! each record is `[digest || chunk]` where `digest = H(prev_digest ||
//! chunk)`. The writer emits its rolling digest at close; that digest is
//! recorded in the disk's manifest copy and re-checked when the shard is
//! read back. Any mismatch marks the shard corrupt so the read falls back
//! to parity reconstruction.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::disk::{DiskRef, FileWriter};
use crate::error::{DiskError, DiskResult};

// =============================================================================
// Algorithm
// =============================================================================

/// Hash algorithm of a shard's inline chain, recorded in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BitrotAlgorithm {
    /// BLAKE3-256, the default
    #[default]
    Blake3,

    /// SHA-256, for fleets standardised on it
    Sha256,
}

impl BitrotAlgorithm {
    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        32
    }

    /// Chain step: digest of the previous digest concatenated with the
    /// chunk.
    pub fn chain(&self, prev: &[u8], chunk: &[u8]) -> Vec<u8> {
        match self {
            BitrotAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(prev);
                hasher.update(chunk);
                hasher.finalize().as_bytes().to_vec()
            }
            BitrotAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(prev);
                hasher.update(chunk);
                hasher.finalize().to_vec()
            }
        }
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Streaming shard writer with an inline hash chain.
pub struct BitrotWriter {
    writer: FileWriter,
    algorithm: BitrotAlgorithm,
    shard_size: usize,
    last: Vec<u8>,
}

impl BitrotWriter {
    /// Open a shard file on `disk` and wrap it in a hash chain writing
    /// chunks of at most `shard_size` bytes.
    pub async fn create(
        disk: &DiskRef,
        bucket: &str,
        path: &str,
        file_size: Option<u64>,
        algorithm: BitrotAlgorithm,
        shard_size: usize,
    ) -> DiskResult<Self> {
        let writer = disk.create_file(bucket, path, file_size).await?;
        Ok(Self {
            writer,
            algorithm,
            shard_size,
            last: Vec::new(),
        })
    }

    /// Append one erasure shard chunk. Chunks must not exceed the shard
    /// size the writer was created with; only the final chunk of a stream
    /// may be shorter.
    pub async fn write(&mut self, chunk: &[u8]) -> DiskResult<()> {
        if chunk.len() > self.shard_size {
            return Err(DiskError::Io(format!(
                "bitrot chunk of {} bytes exceeds shard size {}",
                chunk.len(),
                self.shard_size
            )));
        }
        let digest = self.algorithm.chain(&self.last, chunk);
        self.writer
            .write_all(&digest)
            .await
            .map_err(|e| DiskError::from_io(&e))?;
        self.writer
            .write_all(chunk)
            .await
            .map_err(|e| DiskError::from_io(&e))?;
        self.last = digest;
        Ok(())
    }

    /// Flush, close, and return the rolling digest covering every chunk
    /// written. Empty for a shard that received no data.
    pub async fn finish(mut self) -> DiskResult<Vec<u8>> {
        self.writer
            .flush()
            .await
            .map_err(|e| DiskError::from_io(&e))?;
        self.writer
            .shutdown()
            .await
            .map_err(|e| DiskError::from_io(&e))?;
        Ok(self.last)
    }
}

// =============================================================================
// Verification
// =============================================================================

/// Verify a whole shard file against its recorded rolling digest and
/// return the raw shard payload with the chain stripped. Returns
/// [`DiskError::FileCorrupt`] on any flipped bit, truncation, or digest
/// mismatch.
pub fn bitrot_verify(
    data: &[u8],
    algorithm: BitrotAlgorithm,
    shard_size: usize,
    expected_hex: &str,
) -> DiskResult<Vec<u8>> {
    let digest_len = algorithm.digest_len();
    let mut payload = Vec::new();
    let mut prev: Vec<u8> = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        if data.len() - pos <= digest_len {
            return Err(DiskError::FileCorrupt);
        }
        let stored = &data[pos..pos + digest_len];
        pos += digest_len;

        let chunk_len = shard_size.min(data.len() - pos);
        let chunk = &data[pos..pos + chunk_len];
        pos += chunk_len;

        let computed = algorithm.chain(&prev, chunk);
        if computed != stored {
            return Err(DiskError::FileCorrupt);
        }
        payload.extend_from_slice(chunk);
        prev = computed;
    }

    if hex::encode(&prev) != expected_hex {
        return Err(DiskError::FileCorrupt);
    }
    Ok(payload)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::LocalDisk;
    use std::sync::Arc;

    async fn write_shard(
        chunks: &[&[u8]],
        shard_size: usize,
    ) -> (tempfile::TempDir, DiskRef, Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        let disk: DiskRef = Arc::new(LocalDisk::open(dir.path()).await.unwrap());
        disk.make_volume("v").await.unwrap();

        let mut writer = BitrotWriter::create(
            &disk,
            "v",
            "shard",
            None,
            BitrotAlgorithm::Blake3,
            shard_size,
        )
        .await
        .unwrap();
        for chunk in chunks {
            writer.write(chunk).await.unwrap();
        }
        let sum = writer.finish().await.unwrap();
        (dir, disk, sum)
    }

    #[tokio::test]
    async fn test_write_verify_roundtrip() {
        let (_dir, disk, sum) = write_shard(&[b"aaaa", b"bbbb", b"cc"], 4).await;
        let data = disk.read_all("v", "shard").await.unwrap();

        let payload =
            bitrot_verify(&data, BitrotAlgorithm::Blake3, 4, &hex::encode(&sum)).unwrap();
        assert_eq!(payload, b"aaaabbbbcc");
    }

    #[tokio::test]
    async fn test_single_bit_flip_detected() {
        let (_dir, disk, sum) = write_shard(&[b"aaaa", b"bbbb"], 4).await;
        let mut data = disk.read_all("v", "shard").await.unwrap().to_vec();

        // Flip one payload bit in the second record.
        let flip_at = data.len() - 1;
        data[flip_at] ^= 0x01;

        let err = bitrot_verify(&data, BitrotAlgorithm::Blake3, 4, &hex::encode(&sum))
            .unwrap_err();
        assert_eq!(err, DiskError::FileCorrupt);
    }

    #[tokio::test]
    async fn test_truncation_detected() {
        let (_dir, disk, sum) = write_shard(&[b"aaaa", b"bbbb"], 4).await;
        let data = disk.read_all("v", "shard").await.unwrap();

        let truncated = &data[..data.len() / 2];
        assert!(
            bitrot_verify(truncated, BitrotAlgorithm::Blake3, 4, &hex::encode(&sum)).is_err()
        );
    }

    #[tokio::test]
    async fn test_empty_shard() {
        let (_dir, disk, sum) = write_shard(&[], 4).await;
        let data = disk.read_all("v", "shard").await.unwrap();

        assert!(sum.is_empty());
        let payload =
            bitrot_verify(&data, BitrotAlgorithm::Blake3, 4, &hex::encode(&sum)).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_wrong_expected_digest() {
        let algorithm = BitrotAlgorithm::Blake3;
        let digest = algorithm.chain(&[], b"data");
        let mut file = digest.clone();
        file.extend_from_slice(b"data");

        assert!(bitrot_verify(&file, algorithm, 4, "00ff").is_err());
    }

    #[test]
    fn test_algorithms_differ() {
        let a = BitrotAlgorithm::Blake3.chain(&[], b"x");
        let b = BitrotAlgorithm::Sha256.chain(&[], b"x");
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert_eq!(b.len(), 32);
    }
}
