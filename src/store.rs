//! Erasure-coded multipart engine
//!
//! Orchestrates the upload lifecycle over a fleet of disks: initiate,
//! upload parts concurrently, list, complete, abort, plus the janitor that
//! expires stale uploads. Every metadata transition follows the same
//! shape: write to a scratch UUID, rename into place, reduce the per-disk
//! outcomes under write quorum. A minority of failed or lagging disks is
//! tolerated and flagged for background healing.
//!
//! Uploads stage under a content-addressed directory derived from the
//! object key, so the staging layout has uniform key length and never
//! collides with user-visible paths:
//!
//! ```text
//! tmp       / <uuid> / ...                    per-operation scratch
//! multipart / sha256(bucket/object) / <uploadID> / er.json
//!                                              / part.<n>
//! bucket    / object / er.json                 committed object
//!                    / part.<n>
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::api::{
    canonicalize_etag, complete_multipart_etag, content_type_for, is_min_allowed_part_size,
    CompletePart, ListMultipartsInfo, ListPartsInfo, MultipartInfo, ObjectInfo, ObjectOptions,
    PartInfo, PutObjReader, MAX_PARTS_LIST, MIN_PART_SIZE,
};
use crate::config::{StoreConfig, AMZ_STORAGE_CLASS};
use crate::disk::{
    delete_recursive, join_path, DiskRef, ER_META_FILE, MULTIPART_BUCKET, TMP_BUCKET,
};
use crate::erasure::{bitrot_verify, BitrotAlgorithm, BitrotWriter, Erasure};
use crate::error::{DiskError, DiskResult, Error, Result};
use crate::manifest::{
    commit_all_file_info, object_part_index, read_all_file_info, write_unique_file_info,
    ChecksumInfo, FileInfo, META_ACTUAL_SIZE, META_CONTENT_TYPE, META_ETAG,
};
use crate::mrf::MrfQueue;
use crate::pool::BytePool;
use crate::quorum::{
    list_online_disks, object_quorum_from_meta, pick_valid_file_info, reduce_read_quorum_errs,
    reduce_write_quorum_errs, shuffle_disks, shuffle_parts_metadata, OBJECT_OP_IGNORED_ERRS,
};

/// Highest part number a client may upload.
const MAX_PART_NUMBER: usize = 10_000;

/// Buffers retained by the encode pool between part uploads.
const POOL_CAPACITY: usize = 16;

// =============================================================================
// Object State
// =============================================================================

/// Visible lifecycle state of an object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Neither committed nor being uploaded
    Absent,

    /// At least one multipart upload is staged for the key
    Staged,

    /// The key resolves to a committed object at quorum
    Committed,
}

// =============================================================================
// Store
// =============================================================================

/// The erasure-coded multipart engine over one fleet of disks.
pub struct ErasureStore {
    disks: RwLock<Vec<Option<DiskRef>>>,
    config: StoreConfig,
    pool: BytePool,
    mrf: MrfQueue,
    // Serialises the manifest read-modify-write tail of concurrent part
    // uploads on the same upload id.
    upload_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl ErasureStore {
    /// Create a store over `disks`, preparing the reserved namespaces on
    /// every reachable disk. Vacant fleet slots are allowed and treated as
    /// offline peers.
    pub async fn new(disks: Vec<Option<DiskRef>>, config: StoreConfig) -> Result<Arc<Self>> {
        if disks.len() < 2 {
            return Err(Error::InvalidArgument(format!(
                "a fleet needs at least 2 disks, got {}",
                disks.len()
            )));
        }

        join_all(disks.iter().flatten().map(|disk| async move {
            for bucket in [TMP_BUCKET, MULTIPART_BUCKET] {
                if let Err(e) = disk.make_volume(bucket).await {
                    warn!(endpoint = %disk.endpoint(), %e, "reserved volume setup failed");
                }
            }
        }))
        .await;

        let pool = BytePool::new(config.block_size as usize, POOL_CAPACITY);
        Ok(Arc::new(Self {
            disks: RwLock::new(disks),
            config,
            pool,
            mrf: MrfQueue::new(),
            upload_locks: DashMap::new(),
        }))
    }

    /// Snapshot of the fleet. Taken once per operation; within one
    /// operation the snapshot is frozen so per-index error vectors stay
    /// meaningful.
    pub fn disks(&self) -> Vec<Option<DiskRef>> {
        self.disks.read().clone()
    }

    /// Replace the fleet (cluster membership change).
    pub fn set_disks(&self, disks: Vec<Option<DiskRef>>) {
        *self.disks.write() = disks;
    }

    /// Mark one fleet slot offline or replace its disk.
    pub fn set_disk(&self, index: usize, disk: Option<DiskRef>) {
        let mut disks = self.disks.write();
        if index < disks.len() {
            disks[index] = disk;
        }
    }

    /// Queue of objects committed with part of the fleet offline.
    pub fn partial_uploads(&self) -> &MrfQueue {
        &self.mrf
    }

    fn load_balanced_disks(&self) -> Vec<Option<DiskRef>> {
        let mut disks = self.disks();
        disks.shuffle(&mut rand::thread_rng());
        disks
    }

    fn default_parity(&self) -> usize {
        self.disks.read().len() / 2
    }

    // =========================================================================
    // Paths
    // =========================================================================

    /// Content-addressed staging directory for `(bucket, object)`.
    pub fn multipart_sha_dir(bucket: &str, object: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bucket.as_bytes());
        hasher.update(b"/");
        hasher.update(object.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn upload_id_dir(bucket: &str, object: &str, upload_id: &str) -> String {
        join_path(&Self::multipart_sha_dir(bucket, object), upload_id)
    }

    fn upload_lock(&self, upload_id: &str) -> Arc<AsyncMutex<()>> {
        self.upload_locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    // =========================================================================
    // Probes
    // =========================================================================

    /// Resolve the visible lifecycle state of an object key with a single
    /// call, instead of separate boolean checks that can disagree.
    pub async fn probe(&self, bucket: &str, object: &str) -> Result<ObjectState> {
        let disks = self.disks();
        let meta_path = join_path(object, ER_META_FILE);

        let errs: Vec<Option<DiskError>> = join_all(disks.iter().map(|disk| {
            let meta_path = meta_path.clone();
            async move {
                match disk.as_ref() {
                    Some(disk) => disk.stat_file(bucket, &meta_path).await.err(),
                    None => Some(DiskError::DiskNotFound),
                }
            }
        }))
        .await;

        let successes = errs.iter().filter(|e| e.is_none()).count();
        if successes >= (disks.len() / 2).max(1) {
            return Ok(ObjectState::Committed);
        }

        let sha_dir = Self::multipart_sha_dir(bucket, object);
        for disk in self.load_balanced_disks().into_iter().flatten() {
            match disk.list_dir(MULTIPART_BUCKET, &sha_dir, 1).await {
                Ok(entries) if !entries.is_empty() => return Ok(ObjectState::Staged),
                Ok(_) | Err(DiskError::FileNotFound) => return Ok(ObjectState::Absent),
                Err(_) => continue,
            }
        }
        Ok(ObjectState::Absent)
    }

    /// True when any ancestor key of `object` is itself a committed
    /// object, which would make the key unreachable as a directory.
    async fn parent_dir_is_object(&self, bucket: &str, object: &str) -> Result<bool> {
        let mut parent = object;
        while let Some(idx) = parent.rfind('/') {
            parent = &parent[..idx];
            if parent.is_empty() {
                break;
            }
            if self.probe(bucket, parent).await? == ObjectState::Committed {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Verify the upload id resolves to a staged manifest at quorum.
    async fn check_upload_id_exists(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> Result<()> {
        let disks = self.disks();
        let upload_path = Self::upload_id_dir(bucket, object, upload_id);
        let ferr = |e: DiskError| Error::from_disk_upload(e, bucket, object, upload_id);
        let (metas, errs) = read_all_file_info(&disks, MULTIPART_BUCKET, &upload_path).await;

        let (read_quorum, _) =
            object_quorum_from_meta(&metas, &errs, self.default_parity()).map_err(ferr)?;

        if let Some(err) = reduce_read_quorum_errs(&errs, OBJECT_OP_IGNORED_ERRS, read_quorum) {
            return Err(ferr(err));
        }
        Ok(())
    }

    /// Read the manifest under `prefix` and reduce it to the
    /// authoritative copy: derive the operation's quorums, check the
    /// per-disk errors at the requested threshold, and pick the version
    /// the quorum agrees on. Returns the per-disk manifests, the disks
    /// holding the authoritative version, the operating quorum, and the
    /// picked manifest.
    async fn read_quorum_manifest(
        &self,
        disks: &[Option<DiskRef>],
        bucket: &str,
        prefix: &str,
        write: bool,
    ) -> DiskResult<(Vec<FileInfo>, Vec<Option<DiskRef>>, usize, FileInfo)> {
        let (metas, errs) = read_all_file_info(disks, bucket, prefix).await;
        let (read_quorum, write_quorum) =
            object_quorum_from_meta(&metas, &errs, self.default_parity())?;
        let quorum = if write { write_quorum } else { read_quorum };

        if write {
            // Only an outright quorum miss aborts a write path; any other
            // dominant error surfaces through the version pick below.
            if let Some(err @ DiskError::WriteQuorum) =
                reduce_write_quorum_errs(&errs, OBJECT_OP_IGNORED_ERRS, quorum)
            {
                return Err(err);
            }
        } else if let Some(err) = reduce_read_quorum_errs(&errs, OBJECT_OP_IGNORED_ERRS, quorum)
        {
            return Err(err);
        }

        let (online, mod_time) = list_online_disks(disks, &metas, &errs);
        let fi = pick_valid_file_info(&metas, mod_time, quorum)?;
        Ok((metas, online, quorum, fi))
    }

    // =========================================================================
    // Fan-Out Primitives
    // =========================================================================

    /// Rename `src` to `dst` on each disk in parallel and reduce under
    /// write quorum. An error equal to `accepted` counts as success on
    /// that disk (used when a source may legitimately be missing).
    async fn rename_all(
        &self,
        disks: &[Option<DiskRef>],
        src_bucket: &str,
        src_path: &str,
        dst_bucket: &str,
        dst_path: &str,
        write_quorum: usize,
        accepted: Option<DiskError>,
    ) -> DiskResult<Vec<Option<DiskRef>>> {
        let errs: Vec<Option<DiskError>> = join_all(disks.iter().map(|disk| {
            let accepted = accepted.clone();
            async move {
                let disk = match disk.as_ref() {
                    Some(disk) => disk,
                    None => return Some(DiskError::DiskNotFound),
                };
                match disk
                    .rename_file(src_bucket, src_path, dst_bucket, dst_path)
                    .await
                {
                    Ok(()) => None,
                    Err(e) if Some(&e) == accepted.as_ref() => None,
                    Err(e) => Some(e),
                }
            }
        }))
        .await;

        if let Some(err) = reduce_write_quorum_errs(&errs, OBJECT_OP_IGNORED_ERRS, write_quorum) {
            return Err(err);
        }
        Ok(crate::quorum::eval_disks(disks, &errs))
    }

    /// Recursively delete `prefix` on each disk and reduce under the
    /// given quorum.
    async fn delete_prefix_quorum(
        &self,
        disks: &[Option<DiskRef>],
        bucket: &str,
        prefix: &str,
        quorum: usize,
    ) -> DiskResult<()> {
        let errs: Vec<Option<DiskError>> = join_all(disks.iter().map(|disk| async move {
            match disk.as_ref() {
                Some(disk) => delete_recursive(disk, bucket, prefix).await.err(),
                None => Some(DiskError::DiskNotFound),
            }
        }))
        .await;

        if let Some(err) = reduce_write_quorum_errs(&errs, OBJECT_OP_IGNORED_ERRS, quorum) {
            return Err(err);
        }
        Ok(())
    }

    /// Best-effort purge of a scratch UUID on every disk. A no-op when the
    /// operation that created it committed (the rename moved it away).
    async fn cleanup_tmp_uuid(&self, uuid: &str) {
        let disks = self.disks();
        join_all(
            disks
                .iter()
                .flatten()
                .map(|disk| async move { delete_recursive(disk, TMP_BUCKET, uuid).await }),
        )
        .await;
    }

    /// Best-effort removal of one part's shard files across the fleet.
    /// The manifest is the source of truth on which parts make up the
    /// object; stray shard files never affect correctness.
    async fn remove_object_part(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number: usize,
    ) {
        let part_path = join_path(
            &Self::upload_id_dir(bucket, object, upload_id),
            &format!("part.{part_number}"),
        );
        let disks = self.disks();
        join_all(disks.iter().flatten().map(|disk| {
            let part_path = part_path.clone();
            async move {
                let _ = disk.delete_file(MULTIPART_BUCKET, &part_path).await;
            }
        }))
        .await;
    }

    // =========================================================================
    // New Multipart Upload
    // =========================================================================

    /// Initiate a multipart upload and return its freshly minted id. The
    /// coding parameters are fixed here from the requested storage class
    /// and the current fleet size, and never change for the upload's
    /// lifetime.
    #[instrument(skip(self, opts))]
    pub async fn new_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        opts: &ObjectOptions,
    ) -> Result<String> {
        check_object_args(bucket, object)?;

        let disks = self.disks();
        let disk_count = disks.len();

        let mut meta = opts.user_defined.clone();
        let parity = meta
            .get(AMZ_STORAGE_CLASS)
            .and_then(|sc| self.config.storage_class.parity_for(sc))
            .filter(|p| *p > 0 && *p < disk_count)
            .unwrap_or(disk_count / 2);
        let data = disk_count - parity;
        let write_quorum = data + 1;

        if !meta.contains_key(META_CONTENT_TYPE) {
            meta.insert(
                META_CONTENT_TYPE.to_string(),
                content_type_for(object).to_string(),
            );
        }

        let mut fi = FileInfo::new(bucket, object, data, parity, self.config.block_size);
        fi.mod_time = Some(Utc::now());
        fi.metadata = meta;

        let upload_id = Uuid::new_v4().to_string();
        let upload_path = Self::upload_id_dir(bucket, object, &upload_id);
        let tmp_path = upload_id.clone();

        let metas = vec![fi; disk_count];
        let oerr = |e: DiskError| Error::from_disk(e, bucket, object);

        let result = async {
            let online =
                write_unique_file_info(&disks, TMP_BUCKET, &tmp_path, &metas, write_quorum)
                    .await
                    .map_err(oerr)?;

            self.rename_all(
                &online,
                TMP_BUCKET,
                &tmp_path,
                MULTIPART_BUCKET,
                &upload_path,
                write_quorum,
                None,
            )
            .await
            .map_err(oerr)?;

            debug!(%upload_id, "staged new multipart upload");
            Ok(upload_id.clone())
        }
        .await;

        self.cleanup_tmp_uuid(&tmp_path).await;
        result
    }

    // =========================================================================
    // Put Object Part
    // =========================================================================

    /// Erasure-code one part body into its shard slot and publish the
    /// part in the upload's manifest.
    #[instrument(skip(self, data, _opts))]
    pub async fn put_object_part(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number: usize,
        data: &mut PutObjReader,
        _opts: &ObjectOptions,
    ) -> Result<PartInfo> {
        check_object_args(bucket, object)?;
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(Error::InvalidArgument(format!(
                "part number must be between 1 and {MAX_PART_NUMBER}"
            )));
        }
        if data.size() < -1 {
            return Err(Error::InvalidArgument(
                "declared size may not be below -1".to_string(),
            ));
        }

        self.check_upload_id_exists(bucket, object, upload_id).await?;

        let tmp_part = Uuid::new_v4().to_string();
        let tmp_fi = Uuid::new_v4().to_string();

        let result = self
            .put_object_part_inner(bucket, object, upload_id, part_number, data, &tmp_part, &tmp_fi)
            .await;

        // Deferred purges; no-ops for whatever was renamed into place.
        self.cleanup_tmp_uuid(&tmp_part).await;
        self.cleanup_tmp_uuid(&tmp_fi).await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn put_object_part_inner(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number: usize,
        data: &mut PutObjReader,
        tmp_part: &str,
        tmp_fi: &str,
    ) -> Result<PartInfo> {
        let upload_path = Self::upload_id_dir(bucket, object, upload_id);
        let disks = self.disks();
        let ferr = |e: DiskError| Error::from_disk_upload(e, bucket, object, upload_id);

        // Authoritative manifest and quorum for this upload. A concurrent
        // part commit renames manifests disk by disk, so a read landing
        // mid-commit can briefly see no version at quorum; retry a few
        // times before giving up.
        let mut attempt = 0;
        let (online, write_quorum, fi) = loop {
            attempt += 1;
            match self
                .read_quorum_manifest(&disks, MULTIPART_BUCKET, &upload_path, true)
                .await
            {
                Ok((_, online, quorum, fi)) => break (online, quorum, fi),
                Err(DiskError::ReadQuorum) if attempt < 3 => {
                    tokio::time::sleep(Duration::from_millis(10 * attempt)).await;
                }
                Err(e) => return Err(ferr(e)),
            }
        };

        // Writer `i` must receive logical shard `i`.
        let mut online = shuffle_disks(&online, &fi.erasure.distribution);

        let erasure = Erasure::new(
            fi.erasure.data_blocks,
            fi.erasure.parity_blocks,
            fi.erasure.block_size,
        )?;

        let part_suffix = format!("part.{part_number}");
        let tmp_part_path = join_path(tmp_part, &part_suffix);

        // Block buffer, sized by the declared length.
        let size = data.size();
        let block_size = fi.erasure.block_size as usize;
        let (mut buffer, pooled) = match size {
            0 => (vec![0u8; 1], false),
            s if s == -1 || s >= block_size as i64 => {
                if self.pool.buf_size() == block_size {
                    (self.pool.get(), true)
                } else {
                    (vec![0u8; block_size], false)
                }
            }
            s => (vec![0u8; s as usize], false),
        };

        let shard_file_size = erasure.shard_file_size(size);
        let mut writers: Vec<Option<BitrotWriter>> = Vec::with_capacity(online.len());
        for disk in &online {
            match disk {
                Some(disk) => {
                    let writer = BitrotWriter::create(
                        disk,
                        TMP_BUCKET,
                        &tmp_part_path,
                        (shard_file_size >= 0).then_some(shard_file_size as u64),
                        BitrotAlgorithm::default(),
                        erasure.shard_size(),
                    )
                    .await;
                    match writer {
                        Ok(writer) => writers.push(Some(writer)),
                        Err(e) => {
                            warn!(endpoint = %disk.endpoint(), %e, "shard writer open failed");
                            writers.push(None);
                        }
                    }
                }
                None => writers.push(None),
            }
        }

        let encode_quorum = fi.erasure.data_blocks + 1;
        if writers.iter().filter(|w| w.is_some()).count() < encode_quorum {
            return Err(Error::WriteQuorumNotMet {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        }

        let encoded = erasure
            .encode(data, &mut writers, &mut buffer, encode_quorum)
            .await;
        if pooled {
            self.pool.put(std::mem::take(&mut buffer));
        }
        let bytes_written = encoded?;

        if size >= 0 && (bytes_written as i64) < size {
            return Err(Error::IncompleteBody {
                got: bytes_written as i64,
                expected: size,
            });
        }

        // Close writers and capture each disk's rolling digest.
        let mut bitrot_sums: Vec<Option<Vec<u8>>> = Vec::with_capacity(writers.len());
        for (i, slot) in writers.into_iter().enumerate() {
            match slot {
                Some(writer) => match writer.finish().await {
                    Ok(sum) => bitrot_sums.push(Some(sum)),
                    Err(e) => {
                        warn!(%e, "shard writer close failed");
                        online[i] = None;
                        bitrot_sums.push(None);
                    }
                },
                None => {
                    online[i] = None;
                    bitrot_sums.push(None);
                }
            }
        }

        // A concurrent abort may have removed the upload while we were
        // streaming shards.
        self.check_upload_id_exists(bucket, object, upload_id).await?;

        // Promote the shards into the upload's part slot.
        let part_path = join_path(&upload_path, &part_suffix);
        let online = self
            .rename_all(
                &online,
                TMP_BUCKET,
                &tmp_part_path,
                MULTIPART_BUCKET,
                &part_path,
                write_quorum,
                None,
            )
            .await
            .map_err(ferr)?;

        // Manifest read-modify-write, serialised per upload so concurrent
        // part uploads cannot overwrite each other's entries.
        let lock = self.upload_lock(upload_id);
        let _guard = lock.lock().await;

        let (mut metas, online, _, mut fi) = self
            .read_quorum_manifest(&online, MULTIPART_BUCKET, &upload_path, true)
            .await
            .map_err(ferr)?;

        fi.mod_time = Some(Utc::now());
        let md5_hex = data.md5_hex();
        let actual_size = data.actual_size();
        fi.add_object_part(part_number, md5_hex.clone(), bytes_written as i64, actual_size);

        for (i, disk) in online.iter().enumerate() {
            if disk.is_none() {
                continue;
            }
            metas[i].size = fi.size;
            metas[i].mod_time = fi.mod_time;
            metas[i].parts = fi.parts.clone();
            if let Some(sum) = &bitrot_sums[i] {
                metas[i].erasure.add_checksum(ChecksumInfo {
                    part_number,
                    algorithm: BitrotAlgorithm::default(),
                    hash: hex::encode(sum),
                });
            }
        }

        let online = write_unique_file_info(&online, TMP_BUCKET, tmp_fi, &metas, write_quorum)
            .await
            .map_err(ferr)?;
        commit_all_file_info(
            &online,
            TMP_BUCKET,
            tmp_fi,
            MULTIPART_BUCKET,
            &upload_path,
            write_quorum,
        )
        .await
        .map_err(ferr)?;

        Ok(PartInfo {
            part_number,
            etag: md5_hex,
            last_modified: fi.mod_time,
            size: bytes_written as i64,
            actual_size,
        })
    }

    // =========================================================================
    // Copy Object Part
    // =========================================================================

    /// Upload a part whose body is an existing committed object. A thin
    /// reduction onto [`put_object_part`](Self::put_object_part); no new
    /// protocol state.
    #[instrument(skip(self, opts))]
    pub async fn copy_object_part(
        &self,
        src_bucket: &str,
        src_object: &str,
        dst_bucket: &str,
        dst_object: &str,
        upload_id: &str,
        part_number: usize,
        opts: &ObjectOptions,
    ) -> Result<PartInfo> {
        check_object_args(src_bucket, src_object)?;
        let (_, body) = self.get_object(src_bucket, src_object).await?;
        let mut reader = PutObjReader::from_bytes(body);
        self.put_object_part(dst_bucket, dst_object, upload_id, part_number, &mut reader, opts)
            .await
    }

    // =========================================================================
    // List Object Parts
    // =========================================================================

    /// Snapshot listing of the parts recorded in an upload's manifest,
    /// starting after `part_number_marker`.
    #[instrument(skip(self))]
    pub async fn list_object_parts(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number_marker: usize,
        max_parts: usize,
    ) -> Result<ListPartsInfo> {
        check_object_args(bucket, object)?;
        self.check_upload_id_exists(bucket, object, upload_id).await?;

        let upload_path = Self::upload_id_dir(bucket, object, upload_id);
        let disks = self.disks();

        let (_, _, _, fi) = self
            .read_quorum_manifest(&disks, MULTIPART_BUCKET, &upload_path, false)
            .await
            .map_err(|e| Error::from_disk_upload(e, bucket, object, upload_id))?;

        let mut result = ListPartsInfo {
            bucket: bucket.to_string(),
            object: object.to_string(),
            upload_id: upload_id.to_string(),
            part_number_marker,
            max_parts,
            user_defined: fi.metadata.clone(),
            ..Default::default()
        };

        if fi.parts.is_empty() || max_parts == 0 {
            return Ok(result);
        }
        let max_parts = max_parts.min(MAX_PARTS_LIST);

        let remaining: Vec<_> = fi
            .parts
            .iter()
            .filter(|p| p.number > part_number_marker)
            .collect();

        for part in remaining.iter().take(max_parts) {
            result.parts.push(PartInfo {
                part_number: part.number,
                etag: part.etag.clone(),
                last_modified: fi.mod_time,
                size: part.size,
                actual_size: part.actual_size,
            });
        }

        if remaining.len() > result.parts.len() {
            result.is_truncated = true;
            if let Some(last) = result.parts.last() {
                result.next_part_number_marker = last.part_number;
            }
        }
        Ok(result)
    }

    // =========================================================================
    // List Multipart Uploads
    // =========================================================================

    /// List staged upload ids for exactly `(bucket, object)`. Markers and
    /// delimiter are echoed back untouched; prefix fan-out is deliberately
    /// unsupported.
    #[instrument(skip(self))]
    pub async fn list_multipart_uploads(
        &self,
        bucket: &str,
        object: &str,
        key_marker: &str,
        upload_id_marker: &str,
        delimiter: &str,
        max_uploads: usize,
    ) -> Result<ListMultipartsInfo> {
        check_object_args(bucket, object)?;

        let mut result = ListMultipartsInfo {
            key_marker: key_marker.to_string(),
            upload_id_marker: upload_id_marker.to_string(),
            max_uploads,
            prefix: object.to_string(),
            delimiter: delimiter.to_string(),
            ..Default::default()
        };

        let sha_dir = Self::multipart_sha_dir(bucket, object);
        for disk in self.load_balanced_disks().into_iter().flatten() {
            let mut upload_ids = match disk.list_dir(MULTIPART_BUCKET, &sha_dir, -1).await {
                Ok(entries) => entries,
                // No staging directory means no uploads for this object.
                Err(DiskError::FileNotFound) => return Ok(result),
                Err(e) => return Err(Error::from_disk(e, bucket, object)),
            };

            for id in &mut upload_ids {
                if id.ends_with('/') {
                    id.pop();
                }
            }
            upload_ids.sort_unstable();

            for upload_id in upload_ids.into_iter().take(max_uploads) {
                result.uploads.push(MultipartInfo {
                    object: object.to_string(),
                    upload_id,
                });
            }
            break;
        }
        Ok(result)
    }

    // =========================================================================
    // Complete Multipart Upload
    // =========================================================================

    /// Atomically assemble the uploaded parts into the destination
    /// object. This is the only operation that mutates the user-visible
    /// namespace; readers observe either the old object or the new one,
    /// with quorum reads resolving the brief per-disk skew in between.
    #[instrument(skip(self, parts, _opts))]
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        parts: &[CompletePart],
        _opts: &ObjectOptions,
    ) -> Result<ObjectInfo> {
        check_object_args(bucket, object)?;
        self.check_upload_id_exists(bucket, object, upload_id).await?;

        if parts.is_empty() {
            return Err(Error::InvalidArgument(
                "complete requires at least one part".to_string(),
            ));
        }
        for pair in parts.windows(2) {
            if pair[1].part_number <= pair[0].part_number {
                return Err(Error::InvalidPartOrder);
            }
        }

        if self.parent_dir_is_object(bucket, object).await? {
            return Err(Error::FileParentIsFile {
                bucket: bucket.to_string(),
                object: object.to_string(),
            });
        }

        let s3_etag = complete_multipart_etag(parts);
        let upload_path = Self::upload_id_dir(bucket, object, upload_id);
        let fleet = self.disks();
        let ferr = |e: DiskError| Error::from_disk_upload(e, bucket, object, upload_id);
        let oerr = |e: DiskError| Error::from_disk(e, bucket, object);

        let (metas, online, write_quorum, mut fi) = self
            .read_quorum_manifest(&fleet, MULTIPART_BUCKET, &upload_path, true)
            .await
            .map_err(ferr)?;

        let online = shuffle_disks(&online, &fi.erasure.distribution);
        let mut metas = shuffle_parts_metadata(&metas, &fi.erasure.distribution);

        // The staged manifest is the reference the client's list is
        // validated against.
        let current_fi = fi.clone();

        let mut new_parts = Vec::with_capacity(parts.len());
        let mut object_size: i64 = 0;
        let mut object_actual_size: i64 = 0;

        for (i, part) in parts.iter().enumerate() {
            let etag = canonicalize_etag(&part.etag);
            let idx = match object_part_index(&current_fi.parts, part.part_number) {
                Some(idx) => idx,
                None => {
                    return Err(Error::InvalidPart {
                        part_number: part.part_number,
                        exp_etag: String::new(),
                        got_etag: etag,
                    })
                }
            };
            let staged = &current_fi.parts[idx];

            if staged.etag != etag {
                return Err(Error::InvalidPart {
                    part_number: part.part_number,
                    exp_etag: staged.etag.clone(),
                    got_etag: etag,
                });
            }
            if i < parts.len() - 1 && !is_min_allowed_part_size(staged.actual_size) {
                return Err(Error::PartTooSmall {
                    part_number: part.part_number,
                    part_size: staged.actual_size,
                    min_size: MIN_PART_SIZE,
                });
            }

            object_size += staged.size;
            object_actual_size += staged.actual_size;
            new_parts.push(staged.clone());
        }

        fi.parts = new_parts;
        fi.size = object_size;
        fi.mod_time = Some(Utc::now());
        fi.metadata.insert(META_ETAG.to_string(), s3_etag);
        fi.metadata
            .insert(META_ACTUAL_SIZE.to_string(), object_actual_size.to_string());

        // Propagate the agreed fields into every copy while leaving each
        // disk's private checksum array alone.
        for meta in metas.iter_mut() {
            meta.size = fi.size;
            meta.mod_time = fi.mod_time;
            meta.metadata = fi.metadata.clone();
            meta.parts = fi.parts.clone();
        }

        let tmp_fi = Uuid::new_v4().to_string();
        let mut scratch_uuids = vec![tmp_fi.clone()];

        let result = async {
            let online =
                write_unique_file_info(&online, TMP_BUCKET, &tmp_fi, &metas, write_quorum)
                    .await
                    .map_err(ferr)?;
            let online = commit_all_file_info(
                &online,
                TMP_BUCKET,
                &tmp_fi,
                MULTIPART_BUCKET,
                &upload_path,
                write_quorum,
            )
            .await
            .map_err(ferr)?;

            if self.probe(bucket, object).await? == ObjectState::Committed {
                if self.config.worm {
                    return Err(Error::ObjectAlreadyExists {
                        bucket: bucket.to_string(),
                        object: object.to_string(),
                    });
                }

                // Move the current object aside on the whole fleet, not
                // just the disks online for this upload: the old body may
                // live partly on disks offline for the new one, and stale
                // copies must be overwritable.
                let displaced = Uuid::new_v4().to_string();
                scratch_uuids.push(displaced.clone());
                self.rename_all(
                    &self.disks(),
                    bucket,
                    object,
                    TMP_BUCKET,
                    &displaced,
                    write_quorum,
                    Some(DiskError::FileNotFound),
                )
                .await
                .map_err(oerr)?;
            }

            // Shard files for parts dropped from the final list are
            // orphans; clear them while the manifest already ignores them.
            for staged in &current_fi.parts {
                if object_part_index(&fi.parts, staged.number).is_none() {
                    self.remove_object_part(bucket, object, upload_id, staged.number)
                        .await;
                }
            }

            let online = self
                .rename_all(
                    &online,
                    MULTIPART_BUCKET,
                    &upload_path,
                    bucket,
                    object,
                    write_quorum,
                    None,
                )
                .await
                .map_err(oerr)?;

            // Anything offline during the commit needs healing.
            for i in 0..fleet.len() {
                if online.get(i).map(Option::is_none).unwrap_or(true) || fleet[i].is_none() {
                    self.mrf.push(bucket, object);
                }
            }

            info!(size = fi.size, "completed multipart upload");
            Ok(ObjectInfo::from_file_info(&fi, bucket, object))
        }
        .await;

        for uuid in &scratch_uuids {
            self.cleanup_tmp_uuid(uuid).await;
        }
        if result.is_ok() {
            self.upload_locks.remove(upload_id);
        }
        result
    }

    // =========================================================================
    // Abort Multipart Upload
    // =========================================================================

    /// Remove a staged upload and all its shard files. Terminal and
    /// idempotent: a second abort, or an abort after complete, reports the
    /// upload as unknown.
    #[instrument(skip(self))]
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> Result<()> {
        check_object_args(bucket, object)?;
        self.check_upload_id_exists(bucket, object, upload_id).await?;

        let upload_path = Self::upload_id_dir(bucket, object, upload_id);
        let disks = self.disks();
        let ferr = |e: DiskError| Error::from_disk_upload(e, bucket, object, upload_id);

        let (metas, errs) = read_all_file_info(&disks, MULTIPART_BUCKET, &upload_path).await;
        let (_, write_quorum) =
            object_quorum_from_meta(&metas, &errs, self.default_parity()).map_err(ferr)?;

        self.delete_prefix_quorum(&disks, MULTIPART_BUCKET, &upload_path, write_quorum)
            .await
            .map_err(ferr)?;

        self.upload_locks.remove(upload_id);
        Ok(())
    }

    // =========================================================================
    // Read Back
    // =========================================================================

    /// Read a committed object, verifying every shard's bitrot chain and
    /// reconstructing through parity where shards are missing or corrupt.
    #[instrument(skip(self))]
    pub async fn get_object(&self, bucket: &str, object: &str) -> Result<(ObjectInfo, Vec<u8>)> {
        check_object_args(bucket, object)?;
        let disks = self.disks();

        let (metas, online, _, fi) = self
            .read_quorum_manifest(&disks, bucket, object, false)
            .await
            .map_err(|e| Error::from_disk(e, bucket, object))?;

        let online = shuffle_disks(&online, &fi.erasure.distribution);
        let metas = shuffle_parts_metadata(&metas, &fi.erasure.distribution);

        let erasure = Erasure::new(
            fi.erasure.data_blocks,
            fi.erasure.parity_blocks,
            fi.erasure.block_size,
        )?;

        let mut body = Vec::with_capacity(fi.size.max(0) as usize);
        for part in &fi.parts {
            let part_path = join_path(object, &format!("part.{}", part.number));

            let shards: Vec<Option<Vec<u8>>> =
                join_all(online.iter().zip(metas.iter()).map(|(disk, meta)| {
                    let part_path = part_path.clone();
                    let erasure = &erasure;
                    async move {
                        let disk = disk.as_ref()?;
                        let data = disk.read_all(bucket, &part_path).await.ok()?;
                        let checksum = meta.erasure.checksum_for(part.number)?;
                        match bitrot_verify(
                            &data,
                            checksum.algorithm,
                            erasure.shard_size(),
                            &checksum.hash,
                        ) {
                            Ok(payload) => Some(payload),
                            Err(_) => {
                                warn!(endpoint = %disk.endpoint(), part = part.number,
                                    "shard failed bitrot verification");
                                None
                            }
                        }
                    }
                }))
                .await;

            let decoded = erasure.decode_stream(&shards, part.size as u64)?;
            body.extend_from_slice(&decoded);
        }

        Ok((ObjectInfo::from_file_info(&fi, bucket, object), body))
    }

    // =========================================================================
    // Janitor
    // =========================================================================

    /// Long-running sweep that expires staged uploads idle past the
    /// configured threshold. Exits when the done channel yields or
    /// closes; an in-flight sweep finishes first.
    #[instrument(skip(self, done))]
    pub async fn cleanup_stale_uploads(self: Arc<Self>, mut done: mpsc::Receiver<()>) {
        let period = self.config.cleanup_interval;
        let mut tick = interval_at(Instant::now() + period, period);
        info!(?period, "stale upload janitor started");

        loop {
            tokio::select! {
                _ = done.recv() => {
                    info!("stale upload janitor stopping");
                    return;
                }
                _ = tick.tick() => {
                    let disk = self.load_balanced_disks().into_iter().flatten().next();
                    if let Some(disk) = disk {
                        self.cleanup_stale_uploads_on_disk(&disk, self.config.expiry).await;
                    }
                }
            }
        }
    }

    /// One sweep over the staging area as seen from `disk`. Every
    /// per-item failure is skipped; the next tick retries.
    async fn cleanup_stale_uploads_on_disk(&self, disk: &DiskRef, expiry: Duration) {
        let now = Utc::now();
        let sha_dirs = match disk.list_dir(MULTIPART_BUCKET, "", -1).await {
            Ok(dirs) => dirs,
            Err(_) => return,
        };

        for sha_dir in sha_dirs {
            let sha_dir = sha_dir.trim_end_matches('/');
            let upload_dirs = match disk.list_dir(MULTIPART_BUCKET, sha_dir, -1).await {
                Ok(dirs) => dirs,
                Err(_) => continue,
            };

            for upload_dir in upload_dirs {
                let upload_path = join_path(sha_dir, upload_dir.trim_end_matches('/'));
                let stat = match disk
                    .stat_file(MULTIPART_BUCKET, &join_path(&upload_path, ER_META_FILE))
                    .await
                {
                    Ok(stat) => stat,
                    Err(_) => continue,
                };

                let idle = now
                    .signed_duration_since(stat.mod_time)
                    .to_std()
                    .unwrap_or_default();
                if idle > expiry {
                    debug!(upload = %upload_path, ?idle, "expiring stale upload");
                    let disks = self.disks();
                    let quorum = disks.len() / 2 + 1;
                    let _ = self
                        .delete_prefix_quorum(&disks, MULTIPART_BUCKET, &upload_path, quorum)
                        .await;
                }
            }
        }
    }
}

/// Reject degenerate bucket or object names up front.
fn check_object_args(bucket: &str, object: &str) -> Result<()> {
    if bucket.is_empty() || bucket.starts_with('.') {
        return Err(Error::InvalidArgument(format!("invalid bucket: {bucket:?}")));
    }
    if object.is_empty() || object.starts_with('/') || object.ends_with('/') {
        return Err(Error::InvalidArgument(format!("invalid object: {object:?}")));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
