//! Caller-facing value types and S3 multipart arithmetic
//!
//! These are the argument and result shapes of the public engine
//! operations, plus the composite-ETag rules that make a completed
//! multipart object's ETag reproducible from its part ETags.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, ReadBuf};

use crate::manifest::{FileInfo, ObjectPartInfo, META_ACTUAL_SIZE, META_CONTENT_TYPE, META_ETAG};

/// Minimum size of every part except the last, in bytes.
pub const MIN_PART_SIZE: i64 = 5 * 1024 * 1024;

/// Hard cap on entries returned by a single parts listing.
pub const MAX_PARTS_LIST: usize = 10_000;

// =============================================================================
// Options & Results
// =============================================================================

/// Per-operation options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct ObjectOptions {
    /// Caller metadata stored verbatim in the manifest (content type,
    /// storage class, user keys)
    pub user_defined: HashMap<String, String>,
}

/// Result of one part upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    /// Client-chosen part number
    pub part_number: usize,

    /// Hex MD5 of the part body
    pub etag: String,

    /// Manifest mod-time at commit
    pub last_modified: Option<DateTime<Utc>>,

    /// Stored size in bytes
    pub size: i64,

    /// Caller-declared size before any transform
    pub actual_size: i64,
}

/// One part reference in a complete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletePart {
    /// Part number being committed
    pub part_number: usize,

    /// ETag the client observed for that part
    pub etag: String,
}

/// One in-progress upload in a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartInfo {
    /// Object key the upload targets
    pub object: String,

    /// Upload identifier
    pub upload_id: String,
}

/// Result of a parts listing.
#[derive(Debug, Clone, Default)]
pub struct ListPartsInfo {
    pub bucket: String,
    pub object: String,
    pub upload_id: String,
    pub part_number_marker: usize,
    pub next_part_number_marker: usize,
    pub max_parts: usize,
    pub is_truncated: bool,
    pub parts: Vec<PartInfo>,
    pub user_defined: HashMap<String, String>,
}

/// Result of an uploads listing. Markers and delimiter are echoed back
/// untouched; only exact-object listing is supported.
#[derive(Debug, Clone, Default)]
pub struct ListMultipartsInfo {
    pub key_marker: String,
    pub upload_id_marker: String,
    pub max_uploads: usize,
    pub is_truncated: bool,
    pub uploads: Vec<MultipartInfo>,
    pub prefix: String,
    pub delimiter: String,
}

/// Committed object description returned by complete.
#[derive(Debug, Clone, Default)]
pub struct ObjectInfo {
    pub bucket: String,
    pub name: String,
    pub mod_time: Option<DateTime<Utc>>,
    pub size: i64,
    pub actual_size: i64,
    pub etag: String,
    pub content_type: String,
    pub user_defined: HashMap<String, String>,
    pub parts: Vec<ObjectPartInfo>,
}

impl ObjectInfo {
    /// Derive the caller-visible object description from a committed
    /// manifest.
    pub fn from_file_info(fi: &FileInfo, bucket: &str, object: &str) -> Self {
        let actual_size = fi
            .metadata
            .get(META_ACTUAL_SIZE)
            .and_then(|v| v.parse().ok())
            .unwrap_or(fi.size);
        Self {
            bucket: bucket.to_string(),
            name: object.to_string(),
            mod_time: fi.mod_time,
            size: fi.size,
            actual_size,
            etag: fi.metadata.get(META_ETAG).cloned().unwrap_or_default(),
            content_type: fi
                .metadata
                .get(META_CONTENT_TYPE)
                .cloned()
                .unwrap_or_default(),
            user_defined: fi.metadata.clone(),
            parts: fi.parts.clone(),
        }
    }
}

// =============================================================================
// ETag Arithmetic
// =============================================================================

/// Strip extraneous quotes off a client-supplied ETag.
pub fn canonicalize_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// Composite ETag of a completed multipart object: hex MD5 of the
/// concatenated raw MD5 bytes of each part, suffixed with the part count.
pub fn complete_multipart_etag(parts: &[CompletePart]) -> String {
    let mut ctx = md5::Context::new();
    for part in parts {
        let etag = canonicalize_etag(&part.etag);
        match hex::decode(&etag) {
            Ok(raw) => ctx.consume(&raw),
            // Not a hex digest; fold the literal bytes in instead.
            Err(_) => ctx.consume(etag.as_bytes()),
        }
    }
    format!("{:x}-{}", ctx.compute(), parts.len())
}

/// True when a part of `size` bytes may appear anywhere but last in a
/// complete request.
pub fn is_min_allowed_part_size(size: i64) -> bool {
    size >= MIN_PART_SIZE
}

// =============================================================================
// Content Type
// =============================================================================

/// Content type inferred from an object key's extension.
pub fn content_type_for(object: &str) -> &'static str {
    let ext = object
        .rsplit('.')
        .next()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        _ => "application/octet-stream",
    }
}

// =============================================================================
// Hashing Stream Reader
// =============================================================================

/// Part-body stream handed to the engine: wraps the caller's reader, keeps
/// the declared and pre-transform sizes, and folds every byte read into a
/// running MD5 so the part ETag falls out of the encode pass itself.
pub struct PutObjReader {
    inner: Pin<Box<dyn AsyncRead + Send>>,
    size: i64,
    actual_size: i64,
    md5: md5::Context,
}

impl PutObjReader {
    /// Wrap a stream with a declared size (`-1` when unknown/chunked) and
    /// the pre-transform size the caller reported.
    pub fn new(reader: impl AsyncRead + Send + 'static, size: i64, actual_size: i64) -> Self {
        Self {
            inner: Box::pin(reader),
            size,
            actual_size,
            md5: md5::Context::new(),
        }
    }

    /// Convenience wrapper over an in-memory body.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = data.len() as i64;
        Self::new(std::io::Cursor::new(data), size, size)
    }

    /// Declared stream length; `-1` means unknown.
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Pre-transform length reported by the caller.
    pub fn actual_size(&self) -> i64 {
        self.actual_size
    }

    /// Hex MD5 of everything read so far.
    pub fn md5_hex(&self) -> String {
        format!("{:x}", self.md5.clone().compute())
    }
}

impl AsyncRead for PutObjReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = self.inner.as_mut().poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let filled = buf.filled();
            if filled.len() > before {
                self.md5.consume(&filled[before..]);
            }
        }
        poll
    }
}

// =============================================================================
// Tests
// =============================================================================
