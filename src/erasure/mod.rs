//! Erasure coding pipeline
//!
//! A stateless systematic Reed-Solomon codec over GF(2^8), parameterised
//! by (data, parity, block size). Input streams are consumed in blocks of
//! up to the block size; each block is split into `data` shards of
//! `ceil(len / data)` bytes (the tail shard zero-padded) from which
//! `parity` shards of the same size are computed. Encoded shards fan out
//! to one bitrot-protected writer per disk.

use futures::future::join_all;
use reed_solomon_erasure::galois_8::ReedSolomon;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, instrument};

use crate::error::{DiskError, Error, Result};

pub mod bitrot;

#[cfg(test)]
mod proptest;

pub use bitrot::{bitrot_verify, BitrotAlgorithm, BitrotWriter};

// =============================================================================
// Codec
// =============================================================================

/// Erasure encoder/decoder with parameters fixed at upload creation.
pub struct Erasure {
    data_blocks: usize,
    parity_blocks: usize,
    block_size: u64,
    rs: ReedSolomon,
}

impl Erasure {
    /// Create a codec for `data + parity` shards and the given input
    /// block size.
    pub fn new(data_blocks: usize, parity_blocks: usize, block_size: u64) -> Result<Self> {
        if data_blocks == 0 || parity_blocks == 0 || block_size == 0 {
            return Err(Error::InvalidErasureConfig(format!(
                "unusable parameters: data={data_blocks} parity={parity_blocks} block_size={block_size}"
            )));
        }
        let rs = ReedSolomon::new(data_blocks, parity_blocks)
            .map_err(|e| Error::InvalidErasureConfig(e.to_string()))?;
        Ok(Self {
            data_blocks,
            parity_blocks,
            block_size,
            rs,
        })
    }

    /// Data shard count.
    pub fn data_blocks(&self) -> usize {
        self.data_blocks
    }

    /// Parity shard count.
    pub fn parity_blocks(&self) -> usize {
        self.parity_blocks
    }

    /// Total shard count.
    pub fn total_shards(&self) -> usize {
        self.data_blocks + self.parity_blocks
    }

    /// Input block size in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Per-shard chunk size for an input block of `block_len` bytes.
    pub fn shard_chunk_size(&self, block_len: usize) -> usize {
        block_len.div_ceil(self.data_blocks)
    }

    /// Per-shard chunk size for a full input block.
    pub fn shard_size(&self) -> usize {
        self.shard_chunk_size(self.block_size as usize)
    }

    /// On-disk size of one shard file for a stream of `total` bytes.
    /// `-1` (unknown length) stays `-1`.
    pub fn shard_file_size(&self, total: i64) -> i64 {
        if total < 0 {
            return -1;
        }
        if total == 0 {
            return 0;
        }
        let total = total as u64;
        let full_blocks = total / self.block_size;
        let tail = (total % self.block_size) as usize;
        let mut size = full_blocks as i64 * self.shard_size() as i64;
        if tail > 0 {
            size += self.shard_chunk_size(tail) as i64;
        }
        size
    }

    /// Split one input block into data shards (tail zero-padded) and
    /// compute its parity shards.
    pub fn encode_block(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        let chunk = self.shard_chunk_size(data.len());
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());

        for i in 0..self.data_blocks {
            let start = (i * chunk).min(data.len());
            let end = (start + chunk).min(data.len());
            let mut shard = data[start..end].to_vec();
            shard.resize(chunk, 0);
            shards.push(shard);
        }
        for _ in 0..self.parity_blocks {
            shards.push(vec![0u8; chunk]);
        }

        self.rs
            .encode(&mut shards)
            .map_err(|e| Error::Internal(format!("parity computation failed: {e}")))?;
        Ok(shards)
    }

    /// Encode a stream into the given shard writers, one writer per disk
    /// in logical shard order. Returns the number of input bytes consumed.
    /// Writers that fail are nulled out; the encode aborts with the error
    /// that dropped the live writer count below `quorum`, since any
    /// smaller set could not be read back even with parity.
    #[instrument(skip_all)]
    pub async fn encode<R>(
        &self,
        reader: &mut R,
        writers: &mut [Option<BitrotWriter>],
        buf: &mut [u8],
        quorum: usize,
    ) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        if writers.len() != self.total_shards() {
            return Err(Error::InvalidErasureConfig(format!(
                "expected {} writers, got {}",
                self.total_shards(),
                writers.len()
            )));
        }

        let mut total: u64 = 0;
        loop {
            let n = read_full(reader, buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;

            let shards = self.encode_block(&buf[..n])?;

            let errs: Vec<Option<DiskError>> =
                join_all(writers.iter_mut().zip(shards.iter()).map(
                    |(slot, shard)| async move {
                        match slot.as_mut() {
                            Some(writer) => writer.write(shard).await.err(),
                            None => None,
                        }
                    },
                ))
                .await;

            let mut first_err: Option<DiskError> = None;
            for (i, err) in errs.into_iter().enumerate() {
                if let Some(e) = err {
                    writers[i] = None;
                    first_err.get_or_insert(e);
                }
            }

            let live = writers.iter().filter(|w| w.is_some()).count();
            if live < quorum {
                debug!(live, quorum, "encode aborted below write quorum");
                return Err(Error::Disk(first_err.unwrap_or(DiskError::WriteQuorum)));
            }

            if n < buf.len() {
                break;
            }
        }
        Ok(total)
    }

    /// Reconstruct an original stream of `length` bytes from whole shard
    /// files, any of which may be missing or discarded as corrupt. At
    /// least `data` shards must survive.
    pub fn decode_stream(&self, shards: &[Option<Vec<u8>>], length: u64) -> Result<Vec<u8>> {
        if shards.len() != self.total_shards() {
            return Err(Error::InvalidErasureConfig(format!(
                "expected {} shards, got {}",
                self.total_shards(),
                shards.len()
            )));
        }

        let available = shards.iter().filter(|s| s.is_some()).count();
        if available < self.data_blocks {
            return Err(Error::InsufficientShards {
                available,
                required: self.data_blocks,
            });
        }

        let mut out = Vec::with_capacity(length as usize);
        let mut block_start: u64 = 0;
        let mut shard_offset: usize = 0;

        while block_start < length {
            let block_len = ((length - block_start).min(self.block_size)) as usize;
            let chunk = self.shard_chunk_size(block_len);

            let mut block_shards: Vec<Option<Vec<u8>>> = shards
                .iter()
                .map(|s| {
                    s.as_ref().and_then(|file| {
                        file.get(shard_offset..shard_offset + chunk).map(<[u8]>::to_vec)
                    })
                })
                .collect();

            self.rs
                .reconstruct_data(&mut block_shards)
                .map_err(|_| Error::InsufficientShards {
                    available: block_shards.iter().filter(|s| s.is_some()).count(),
                    required: self.data_blocks,
                })?;

            let mut produced = 0usize;
            for shard in block_shards.iter().take(self.data_blocks).flatten() {
                let take = shard.len().min(block_len - produced);
                out.extend_from_slice(&shard[..take]);
                produced += take;
                if produced == block_len {
                    break;
                }
            }

            block_start += block_len as u64;
            shard_offset += chunk;
        }

        Ok(out)
    }
}

/// Fill `buf` from the reader, stopping early only at end of stream.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut n = 0;
    while n < buf.len() {
        let m = reader.read(&mut buf[n..]).await?;
        if m == 0 {
            break;
        }
        n += m;
    }
    Ok(n)
}

// =============================================================================
// Tests
// =============================================================================
