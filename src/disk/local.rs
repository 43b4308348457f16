//! Local filesystem disk driver
//!
//! Stores each bucket as a directory under a root path. Renames map to
//! `rename(2)` on the same filesystem, which is what makes them usable as
//! the engine's atomicity primitive; pointing a [`LocalDisk`] at a mount
//! boundary would break that and is not supported.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;

use crate::disk::{Disk, FileStat, FileWriter, ER_META_FILE, MULTIPART_BUCKET, TMP_BUCKET};
use crate::error::{DiskError, DiskResult};

/// A disk backed by a directory on the local filesystem.
#[derive(Debug)]
pub struct LocalDisk {
    root: PathBuf,
}

impl LocalDisk {
    /// Open a disk rooted at `root`, creating the root and the reserved
    /// namespaces if needed.
    pub async fn open(root: impl Into<PathBuf>) -> DiskResult<Self> {
        let root = root.into();
        for bucket in [TMP_BUCKET, MULTIPART_BUCKET] {
            fs::create_dir_all(root.join(bucket))
                .await
                .map_err(|e| DiskError::from_io(&e))?;
        }
        debug!(root = %root.display(), "opened local disk");
        Ok(Self { root })
    }

    fn resolve(&self, bucket: &str, path: &str) -> DiskResult<PathBuf> {
        if bucket.is_empty() {
            return Err(DiskError::VolumeNotFound);
        }
        let mut full = self.root.join(bucket);
        let rel = Path::new(path);
        for comp in rel.components() {
            match comp {
                Component::Normal(c) => full.push(c),
                Component::CurDir => {}
                // Nothing may escape the bucket directory.
                _ => return Err(DiskError::AccessDenied),
            }
        }
        Ok(full)
    }

    /// Distinguish a missing file from a missing bucket after a NotFound.
    async fn not_found(&self, bucket: &str) -> DiskError {
        match fs::metadata(self.root.join(bucket)).await {
            Ok(_) => DiskError::FileNotFound,
            Err(_) => DiskError::VolumeNotFound,
        }
    }

    async fn prepare_parent(&self, target: &Path) -> DiskResult<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DiskError::from_io(&e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Disk for LocalDisk {
    fn endpoint(&self) -> String {
        self.root.display().to_string()
    }

    async fn make_volume(&self, bucket: &str) -> DiskResult<()> {
        if bucket.is_empty() {
            return Err(DiskError::VolumeNotFound);
        }
        fs::create_dir_all(self.root.join(bucket))
            .await
            .map_err(|e| DiskError::from_io(&e))
    }

    async fn list_dir(&self, bucket: &str, prefix: &str, limit: i64) -> DiskResult<Vec<String>> {
        let dir = self.resolve(bucket, prefix)?;
        let mut rd = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(self.not_found(bucket).await)
            }
            Err(e) => return Err(DiskError::from_io(&e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = rd.next_entry().await.map_err(|e| DiskError::from_io(&e))? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| DiskError::from_io(&e))?
                .is_dir();
            if is_dir {
                name.push('/');
            }
            names.push(name);
            if limit >= 0 && names.len() as i64 >= limit {
                break;
            }
        }
        Ok(names)
    }

    async fn stat_file(&self, bucket: &str, path: &str) -> DiskResult<FileStat> {
        let full = self.resolve(bucket, path)?;
        let meta = match fs::metadata(&full).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(self.not_found(bucket).await)
            }
            Err(e) => return Err(DiskError::from_io(&e)),
        };
        if meta.is_dir() {
            return Err(DiskError::FileNotFound);
        }
        let mod_time: DateTime<Utc> = meta
            .modified()
            .map(DateTime::from)
            .map_err(|e| DiskError::from_io(&e))?;
        Ok(FileStat {
            mod_time,
            size: meta.len(),
        })
    }

    async fn delete_file(&self, bucket: &str, path: &str) -> DiskResult<()> {
        let full = self.resolve(bucket, path)?;
        let meta = match fs::metadata(&full).await {
            Ok(meta) => meta,
            // Idempotent: already gone.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(DiskError::from_io(&e)),
        };
        let res = if meta.is_dir() {
            fs::remove_dir(&full).await
        } else {
            fs::remove_file(&full).await
        };
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DiskError::from_io(&e)),
        }
    }

    async fn rename_metadata(
        &self,
        src_bucket: &str,
        src_prefix: &str,
        dst_bucket: &str,
        dst_prefix: &str,
    ) -> DiskResult<()> {
        let src = self
            .resolve(src_bucket, src_prefix)?
            .join(ER_META_FILE);
        let dst = self
            .resolve(dst_bucket, dst_prefix)?
            .join(ER_META_FILE);
        self.prepare_parent(&dst).await?;
        match fs::rename(&src, &dst).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(self.not_found(src_bucket).await)
            }
            Err(e) => Err(DiskError::from_io(&e)),
        }
    }

    async fn rename_file(
        &self,
        src_bucket: &str,
        src_path: &str,
        dst_bucket: &str,
        dst_path: &str,
    ) -> DiskResult<()> {
        let src = self.resolve(src_bucket, src_path)?;
        let dst = self.resolve(dst_bucket, dst_path)?;

        if let Err(e) = fs::metadata(&src).await {
            if e.kind() == std::io::ErrorKind::NotFound {
                return Err(self.not_found(src_bucket).await);
            }
            return Err(DiskError::from_io(&e));
        }

        self.prepare_parent(&dst).await?;

        // rename(2) will not replace a non-empty directory; clear the
        // destination first. The caller's quorum protocol tolerates the
        // non-atomic window on a minority of disks.
        if let Ok(dst_meta) = fs::metadata(&dst).await {
            let res = if dst_meta.is_dir() {
                fs::remove_dir_all(&dst).await
            } else {
                fs::remove_file(&dst).await
            };
            if let Err(e) = res {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(DiskError::from_io(&e));
                }
            }
        }

        fs::rename(&src, &dst)
            .await
            .map_err(|e| DiskError::from_io(&e))
    }

    async fn read_all(&self, bucket: &str, path: &str) -> DiskResult<Bytes> {
        let full = self.resolve(bucket, path)?;
        match fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(self.not_found(bucket).await)
            }
            Err(e) => Err(DiskError::from_io(&e)),
        }
    }

    async fn write_all(&self, bucket: &str, path: &str, data: Bytes) -> DiskResult<()> {
        let full = self.resolve(bucket, path)?;
        self.prepare_parent(&full).await?;
        fs::write(&full, &data)
            .await
            .map_err(|e| DiskError::from_io(&e))
    }

    async fn create_file(
        &self,
        bucket: &str,
        path: &str,
        _size: Option<u64>,
    ) -> DiskResult<FileWriter> {
        let full = self.resolve(bucket, path)?;
        self.prepare_parent(&full).await?;
        let file = fs::File::create(&full)
            .await
            .map_err(|e| DiskError::from_io(&e))?;
        Ok(Box::pin(file))
    }
}

// =============================================================================
// Tests
// =============================================================================
