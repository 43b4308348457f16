//! shardstore - Erasure-Coded Multipart Upload Engine
//!
//! An object-store engine that lets clients upload a large object as a
//! sequence of independently transmitted parts and atomically assemble
//! them into a single immutable object. Each part is striped across a
//! fleet of disks with Reed-Solomon erasure coding and per-shard bitrot
//! hash chains; every metadata transition commits under a write-quorum
//! rule so a minority of failed or lagging disks cannot corrupt the
//! result.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ErasureStore                           │
//! │   New / PutPart / CopyPart / List / Complete / Abort          │
//! │                      + stale-upload janitor                   │
//! ├──────────────┬──────────────┬───────────────┬────────────────┤
//! │   Manifest   │    Quorum    │    Erasure    │     Bitrot     │
//! │  (er.json)   │  calculator  │     codec     │  shard writer  │
//! ├──────────────┴──────────────┴───────────────┴────────────────┤
//! │              Disk trait  (N peers, any may be offline)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Mutation reduces to one shape everywhere: write to a scratch UUID,
//! rename into place, quorum-reduce the per-disk outcomes. Reads pick the
//! newest manifest version a quorum of disks agrees on.
//!
//! # Modules
//!
//! - [`api`] - caller-facing value types and S3 multipart arithmetic
//! - [`config`] - store configuration
//! - [`disk`] - storage-peer trait and the local filesystem driver
//! - [`erasure`] - Reed-Solomon codec and bitrot-protected shard I/O
//! - [`error`] - error types
//! - [`manifest`] - the per-upload metadata document and its quorum I/O
//! - [`mrf`] - queue of partially committed uploads awaiting healing
//! - [`pool`] - block buffer pool
//! - [`quorum`] - per-disk outcome reduction and online-disk selection
//! - [`store`] - the multipart engine itself

pub mod api;
pub mod config;
pub mod disk;
pub mod erasure;
pub mod error;
pub mod manifest;
pub mod mrf;
pub mod pool;
pub mod quorum;
pub mod store;

// Re-export the types most embedders touch.
pub use api::{
    CompletePart, ListMultipartsInfo, ListPartsInfo, MultipartInfo, ObjectInfo, ObjectOptions,
    PartInfo, PutObjReader,
};
pub use config::{StorageClassConfig, StoreConfig};
pub use disk::{Disk, DiskRef, LocalDisk};
pub use erasure::{BitrotAlgorithm, Erasure};
pub use error::{DiskError, Error, Result};
pub use manifest::FileInfo;
pub use store::{ErasureStore, ObjectState};
