//! Error types for the erasure-coded multipart engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for per-disk operations
pub type DiskResult<T> = std::result::Result<T, DiskError>;

// =============================================================================
// Per-Disk Errors
// =============================================================================

/// Failure kind reported by a single disk.
///
/// These are comparable so the quorum calculator can count occurrences of
/// each distinct outcome across the fleet and reduce them to one result.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiskError {
    /// Disk is offline or was never mounted
    #[error("disk not found")]
    DiskNotFound,

    /// Disk answered but is misbehaving (partial writes, EIO, ...)
    #[error("drive is faulty")]
    FaultyDisk,

    /// The bucket (volume) does not exist on this disk
    #[error("volume not found")]
    VolumeNotFound,

    /// The file does not exist on this disk
    #[error("file not found")]
    FileNotFound,

    /// An ancestor of the path is a regular file
    #[error("parent is a file")]
    FileParentIsFile,

    /// Stored bytes failed bitrot verification
    #[error("file is corrupted")]
    FileCorrupt,

    /// Permission failure on the backing store
    #[error("disk access denied")]
    AccessDenied,

    /// Not enough disks agreed to assemble an authoritative read
    #[error("read quorum not met")]
    ReadQuorum,

    /// Not enough disks acknowledged a metadata write
    #[error("write quorum not met")]
    WriteQuorum,

    /// Any other I/O failure, carried as text so the kind stays comparable
    #[error("I/O error: {0}")]
    Io(String),
}

impl DiskError {
    /// True for errors that mean the data is permanently gone on this disk,
    /// as opposed to the disk being temporarily unreachable. Quorum
    /// reduction breaks ties toward these.
    pub fn is_data_loss(&self) -> bool {
        matches!(self, DiskError::FileNotFound | DiskError::FileCorrupt)
    }

    pub(crate) fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => DiskError::FileNotFound,
            ErrorKind::PermissionDenied => DiskError::AccessDenied,
            _ => DiskError::Io(err.to_string()),
        }
    }
}

// =============================================================================
// Engine Errors
// =============================================================================

/// Errors surfaced by the multipart engine to its caller.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (empty bucket, negative size, ...)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The upload id is not present at read quorum
    #[error("no such multipart upload: {bucket}/{object}/{upload_id}")]
    NoSuchUpload {
        bucket: String,
        object: String,
        upload_id: String,
    },

    /// The object does not exist at read quorum
    #[error("object not found: {bucket}/{object}")]
    ObjectNotFound { bucket: String, object: String },

    /// A part referenced at complete time does not match the manifest
    #[error("invalid part {part_number}: expected etag {exp_etag:?}, got {got_etag:?}")]
    InvalidPart {
        part_number: usize,
        exp_etag: String,
        got_etag: String,
    },

    /// Client-supplied part list is not strictly increasing by number
    #[error("part numbers must be in ascending order")]
    InvalidPartOrder,

    /// A non-terminal part is below the minimum allowed size
    #[error("part {part_number} is too small ({part_size} bytes), minimum is {min_size} bytes")]
    PartTooSmall {
        part_number: usize,
        part_size: i64,
        min_size: i64,
    },

    /// The stream ended before the declared size was read
    #[error("incomplete body: read {got} of {expected} bytes")]
    IncompleteBody { got: i64, expected: i64 },

    /// Fewer than write-quorum disks acknowledged a commit
    #[error("write quorum not met for {bucket}/{object}")]
    WriteQuorumNotMet { bucket: String, object: String },

    /// No authoritative manifest could be assembled at read quorum
    #[error("read quorum not met for {bucket}/{object}")]
    ReadQuorumNotMet { bucket: String, object: String },

    /// An ancestor of the object key is itself a committed object
    #[error("parent path of {bucket}/{object} is an object")]
    FileParentIsFile { bucket: String, object: String },

    /// Overwrite rejected because write-once mode is enabled
    #[error("object already exists: {bucket}/{object}")]
    ObjectAlreadyExists { bucket: String, object: String },

    /// Invalid (data, parity) coding parameters
    #[error("invalid erasure configuration: {0}")]
    InvalidErasureConfig(String),

    /// Fewer shards survived than the data-block count needed to decode
    #[error("insufficient shards for reconstruction: have {available}, need {required}")]
    InsufficientShards { available: usize, required: usize },

    /// Per-disk failure that was not absorbed by quorum
    #[error(transparent)]
    Disk(#[from] DiskError),

    /// Manifest (de)serialization failure
    #[error("manifest serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error outside any single disk's scope
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Translate a quorum-reduced disk error into the user-facing form for
    /// an operation on `bucket/object`.
    pub(crate) fn from_disk(err: DiskError, bucket: &str, object: &str) -> Self {
        match err {
            DiskError::FileNotFound | DiskError::VolumeNotFound => Error::ObjectNotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            },
            DiskError::ReadQuorum => Error::ReadQuorumNotMet {
                bucket: bucket.to_string(),
                object: object.to_string(),
            },
            DiskError::WriteQuorum => Error::WriteQuorumNotMet {
                bucket: bucket.to_string(),
                object: object.to_string(),
            },
            DiskError::FileParentIsFile => Error::FileParentIsFile {
                bucket: bucket.to_string(),
                object: object.to_string(),
            },
            other => Error::Disk(other),
        }
    }

    /// Translate a quorum-reduced disk error for an operation scoped to an
    /// upload id: an absent manifest means the upload does not exist.
    pub(crate) fn from_disk_upload(
        err: DiskError,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> Self {
        match err {
            DiskError::FileNotFound | DiskError::VolumeNotFound => Error::NoSuchUpload {
                bucket: bucket.to_string(),
                object: object.to_string(),
                upload_id: upload_id.to_string(),
            },
            other => Error::from_disk(other, bucket, object),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
