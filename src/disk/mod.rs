//! Disk abstraction
//!
//! A [`Disk`] is one storage peer exposing directory and file primitives on
//! user buckets and on two reserved namespaces: a per-operation scratch
//! space and the multipart staging area. The engine only ever mutates state
//! through "write to a scratch UUID, rename into place", so the rename
//! operations must be metadata-only same-volume moves on every driver.
//!
//! Fleet positions may be vacant (`None` in a `Vec<Option<DiskRef>>`); all
//! fan-out code treats a vacant slot as [`DiskError::DiskNotFound`].

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWrite;

use crate::error::DiskResult;

pub mod local;

pub use local::LocalDisk;

/// Scratch namespace: every operation writes under a fresh UUID here and
/// registers a deferred purge of it.
pub const TMP_BUCKET: &str = ".shardstore.sys/tmp";

/// Multipart staging namespace, laid out as `SHA-dir / uploadID / ...`.
pub const MULTIPART_BUCKET: &str = ".shardstore.sys/multipart";

/// Manifest file name inside an upload or object directory.
pub const ER_META_FILE: &str = "er.json";

/// Shared handle to one disk.
pub type DiskRef = Arc<dyn Disk>;

/// Streaming file writer handed out by [`Disk::create_file`].
pub type FileWriter = Pin<Box<dyn AsyncWrite + Send>>;

// =============================================================================
// Stat
// =============================================================================

/// Result of a file stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Last modification time
    pub mod_time: DateTime<Utc>,

    /// Size in bytes
    pub size: u64,
}

// =============================================================================
// Disk Trait
// =============================================================================

/// One storage peer. Implementations must be safe for concurrent use; the
/// engine issues parallel calls against every disk of the fleet.
#[async_trait]
pub trait Disk: Send + Sync + fmt::Debug {
    /// Stable identifier used in logs (path, URL, ...).
    fn endpoint(&self) -> String;

    /// Create a bucket if it does not exist. Idempotent.
    async fn make_volume(&self, bucket: &str) -> DiskResult<()>;

    /// List immediate children of `prefix` inside `bucket`. Directory
    /// entries carry a trailing `/`. `limit < 0` means unlimited. Returns
    /// [`DiskError::FileNotFound`](crate::error::DiskError::FileNotFound)
    /// when the prefix does not exist.
    async fn list_dir(&self, bucket: &str, prefix: &str, limit: i64) -> DiskResult<Vec<String>>;

    /// Stat a regular file.
    async fn stat_file(&self, bucket: &str, path: &str) -> DiskResult<FileStat>;

    /// Delete a file or an empty directory. Absence is success.
    async fn delete_file(&self, bucket: &str, path: &str) -> DiskResult<()>;

    /// Atomically move `src_prefix`'s manifest file to `dst_prefix`,
    /// creating destination parents. Same-volume metadata-only move.
    async fn rename_metadata(
        &self,
        src_bucket: &str,
        src_prefix: &str,
        dst_bucket: &str,
        dst_prefix: &str,
    ) -> DiskResult<()>;

    /// Atomically move a file or directory. An existing destination is
    /// replaced. Same-volume metadata-only move.
    async fn rename_file(
        &self,
        src_bucket: &str,
        src_path: &str,
        dst_bucket: &str,
        dst_path: &str,
    ) -> DiskResult<()>;

    /// Read a whole file.
    async fn read_all(&self, bucket: &str, path: &str) -> DiskResult<Bytes>;

    /// Write a whole file, creating parents and truncating any previous
    /// content.
    async fn write_all(&self, bucket: &str, path: &str, data: Bytes) -> DiskResult<()>;

    /// Open a streaming writer for a new file. `size` is advisory
    /// (`None` when unknown).
    async fn create_file(
        &self,
        bucket: &str,
        path: &str,
        size: Option<u64>,
    ) -> DiskResult<FileWriter>;
}

// =============================================================================
// Recursive Delete
// =============================================================================

/// Depth-first removal of `prefix` and everything under it on one disk.
/// Absence at any level is success.
pub async fn delete_recursive(disk: &DiskRef, bucket: &str, prefix: &str) -> DiskResult<()> {
    // Post-order walk with an explicit stack; directories are revisited
    // once their children are gone.
    let mut stack: Vec<(String, bool)> = vec![(prefix.to_string(), false)];

    while let Some((dir, expanded)) = stack.pop() {
        if expanded {
            disk.delete_file(bucket, &dir).await?;
            continue;
        }

        let entries = match disk.list_dir(bucket, &dir, -1).await {
            Ok(entries) => entries,
            // A plain file, or already gone.
            Err(_) => {
                disk.delete_file(bucket, &dir).await?;
                continue;
            }
        };

        stack.push((dir.clone(), true));
        for entry in entries {
            if let Some(child) = entry.strip_suffix('/') {
                stack.push((join_path(&dir, child), false));
            } else {
                disk.delete_file(bucket, &join_path(&dir, &entry)).await?;
            }
        }
    }

    Ok(())
}

/// Join two path segments with a single separator.
pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), name)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("a", "b"), "a/b");
        assert_eq!(join_path("a/", "b"), "a/b");
        assert_eq!(join_path("", "b"), "b");
        assert_eq!(join_path("a/b", "c"), "a/b/c");
    }
}
