//! Per-upload metadata manifest
//!
//! One manifest (`er.json`) is kept on every disk of the fleet. All copies
//! for an upload agree on every field except `erasure.checksums`: each disk
//! records only its own shard's bitrot digest, so writes go through
//! [`write_unique_file_info`] which hands every disk a different payload.
//! `mod_time` is the version tag; when copies disagree the newest mod-time
//! held by a quorum of disks wins.
//!
//! Unknown manifest fields are preserved across read-modify-write cycles
//! through a flattened side table.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::disk::{join_path, DiskRef, ER_META_FILE};
use crate::erasure::bitrot::BitrotAlgorithm;
use crate::error::{DiskError, DiskResult};
use crate::quorum::{eval_disks, reduce_write_quorum_errs, OBJECT_OP_IGNORED_ERRS};

/// Metadata key holding the object's final ETag after complete.
pub const META_ETAG: &str = "etag";

/// Metadata key holding the caller-visible content type.
pub const META_CONTENT_TYPE: &str = "content-type";

/// Internal metadata key holding the pre-transform object size.
pub const META_ACTUAL_SIZE: &str = "x-shardstore-internal-actual-size";

// =============================================================================
// Manifest Types
// =============================================================================

/// One uploaded part as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectPartInfo {
    /// Client-chosen part number
    pub number: usize,

    /// Hex MD5 of the part body
    pub etag: String,

    /// Stored size in bytes
    pub size: i64,

    /// Caller-declared size before any transform
    pub actual_size: i64,
}

/// Bitrot digest of one part's shard on one disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ChecksumInfo {
    /// Part this digest covers
    pub part_number: usize,

    /// Hash algorithm of the shard's inline chain
    pub algorithm: BitrotAlgorithm,

    /// Hex rolling digest emitted by the shard writer at close
    pub hash: String,
}

/// Erasure coding parameters, fixed at upload creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ErasureInfo {
    /// Data shard count
    pub data_blocks: usize,

    /// Parity shard count
    pub parity_blocks: usize,

    /// Input block size in bytes
    pub block_size: u64,

    /// 1-based position of this disk in the fleet (set at write time)
    pub index: usize,

    /// Permutation of `1..=N` assigning logical shard index to physical
    /// disk index; identical for every part of the upload
    pub distribution: Vec<usize>,

    /// Per-part shard digests; unique to each disk's copy
    pub checksums: Vec<ChecksumInfo>,
}

impl ErasureInfo {
    /// Record a shard digest, replacing any previous digest for the part.
    pub fn add_checksum(&mut self, checksum: ChecksumInfo) {
        if let Some(existing) = self
            .checksums
            .iter_mut()
            .find(|c| c.part_number == checksum.part_number)
        {
            *existing = checksum;
        } else {
            self.checksums.push(checksum);
        }
    }

    /// Digest recorded for `part_number`, if any.
    pub fn checksum_for(&self, part_number: usize) -> Option<&ChecksumInfo> {
        self.checksums.iter().find(|c| c.part_number == part_number)
    }

    /// Shard count of the fleet this upload was created on.
    pub fn shard_count(&self) -> usize {
        self.data_blocks + self.parity_blocks
    }
}

/// Per-upload, per-disk metadata document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FileInfo {
    /// Bucket this manifest lives in
    pub volume: String,

    /// Object key (or staging path) this manifest describes
    pub name: String,

    /// Version tag, advanced on every manifest mutation
    pub mod_time: Option<DateTime<Utc>>,

    /// Total size; sum of part sizes after complete, provisional before
    pub size: i64,

    /// Caller-supplied metadata plus engine-reserved keys
    pub metadata: HashMap<String, String>,

    /// Parts in ascending part-number order
    pub parts: Vec<ObjectPartInfo>,

    /// Coding parameters and per-disk digests
    pub erasure: ErasureInfo,

    /// Fields written by newer engines, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileInfo {
    /// Fresh manifest for a new upload on a fleet of `data + parity`
    /// disks, with a newly shuffled shard distribution.
    pub fn new(
        volume: impl Into<String>,
        name: impl Into<String>,
        data_blocks: usize,
        parity_blocks: usize,
        block_size: u64,
    ) -> Self {
        let mut distribution: Vec<usize> = (1..=data_blocks + parity_blocks).collect();
        distribution.shuffle(&mut rand::thread_rng());

        Self {
            volume: volume.into(),
            name: name.into(),
            erasure: ErasureInfo {
                data_blocks,
                parity_blocks,
                block_size,
                index: 0,
                distribution,
                checksums: Vec::new(),
            },
            ..Default::default()
        }
    }

    /// A manifest is usable when its coding parameters are coherent.
    pub fn is_valid(&self) -> bool {
        self.erasure.data_blocks > 0
            && self.erasure.parity_blocks > 0
            && self.erasure.distribution.len() == self.erasure.shard_count()
    }

    /// Record a part, keeping `parts` sorted by number and replacing any
    /// previous upload of the same part number.
    pub fn add_object_part(&mut self, number: usize, etag: String, size: i64, actual_size: i64) {
        let part = ObjectPartInfo {
            number,
            etag,
            size,
            actual_size,
        };
        match self.parts.binary_search_by_key(&number, |p| p.number) {
            Ok(idx) => self.parts[idx] = part,
            Err(idx) => self.parts.insert(idx, part),
        }
    }

    /// Index of `number` within `parts`, if present.
    pub fn part_index(&self, number: usize) -> Option<usize> {
        self.parts
            .binary_search_by_key(&number, |p| p.number)
            .ok()
    }
}

/// Index of `number` within an arbitrary part slice.
pub fn object_part_index(parts: &[ObjectPartInfo], number: usize) -> Option<usize> {
    parts.iter().position(|p| p.number == number)
}

// =============================================================================
// Manifest I/O
// =============================================================================

/// Read the manifest under `prefix` from every disk in parallel. Both
/// returned vectors have the fleet's length and are aligned by disk index;
/// errored slots hold a default manifest.
pub async fn read_all_file_info(
    disks: &[Option<DiskRef>],
    bucket: &str,
    prefix: &str,
) -> (Vec<FileInfo>, Vec<Option<DiskError>>) {
    let path = join_path(prefix, ER_META_FILE);

    let results = join_all(disks.iter().map(|disk| {
        let path = path.clone();
        async move {
            let disk = disk.as_ref().ok_or(DiskError::DiskNotFound)?;
            let data = disk.read_all(bucket, &path).await?;
            serde_json::from_slice::<FileInfo>(&data).map_err(|_| DiskError::FileCorrupt)
        }
    }))
    .await;

    let mut metas = Vec::with_capacity(disks.len());
    let mut errs = Vec::with_capacity(disks.len());
    for result in results {
        match result {
            Ok(fi) => {
                metas.push(fi);
                errs.push(None);
            }
            Err(e) => {
                metas.push(FileInfo::default());
                errs.push(Some(e));
            }
        }
    }
    (metas, errs)
}

/// Write `metas[i]` to disk `i` under `bucket/prefix`. Each disk receives
/// its own payload (the checksum arrays differ); the erasure index is
/// stamped per disk at write time. Fails when fewer than `quorum` writes
/// land; on success returns the fleet with failed slots nulled.
pub async fn write_unique_file_info(
    disks: &[Option<DiskRef>],
    bucket: &str,
    prefix: &str,
    metas: &[FileInfo],
    quorum: usize,
) -> DiskResult<Vec<Option<DiskRef>>> {
    let path = join_path(prefix, ER_META_FILE);

    let errs: Vec<Option<DiskError>> = join_all(disks.iter().enumerate().map(|(i, disk)| {
        let path = path.clone();
        let mut fi = metas[i].clone();
        async move {
            let disk = match disk.as_ref() {
                Some(disk) => disk,
                None => return Some(DiskError::DiskNotFound),
            };
            fi.erasure.index = i + 1;
            let data = match serde_json::to_vec(&fi) {
                Ok(data) => data,
                Err(_) => return Some(DiskError::FileCorrupt),
            };
            disk.write_all(bucket, &path, Bytes::from(data)).await.err()
        }
    }))
    .await;

    if let Some(err) = reduce_write_quorum_errs(&errs, OBJECT_OP_IGNORED_ERRS, quorum) {
        return Err(err);
    }
    Ok(eval_disks(disks, &errs))
}

/// Atomically promote the manifest from `src_prefix` to `dst_prefix` on
/// every disk in parallel, then best-effort clear the source staging
/// directory. Per-disk renames succeed or fail independently; quorum reads
/// at read time resolve any minority left behind.
pub async fn commit_all_file_info(
    disks: &[Option<DiskRef>],
    src_bucket: &str,
    src_prefix: &str,
    dst_bucket: &str,
    dst_prefix: &str,
    quorum: usize,
) -> DiskResult<Vec<Option<DiskRef>>> {
    let errs: Vec<Option<DiskError>> = join_all(disks.iter().map(|disk| async move {
        let disk = match disk.as_ref() {
            Some(disk) => disk,
            None => return Some(DiskError::DiskNotFound),
        };
        let res = disk
            .rename_metadata(src_bucket, src_prefix, dst_bucket, dst_prefix)
            .await;
        // Clear any dangling staging regardless of the rename outcome.
        let _ = disk.delete_file(src_bucket, src_prefix).await;
        res.err()
    }))
    .await;

    if let Some(err) = reduce_write_quorum_errs(&errs, OBJECT_OP_IGNORED_ERRS, quorum) {
        return Err(err);
    }
    Ok(eval_disks(disks, &errs))
}

// =============================================================================
// Tests
// =============================================================================
