//! Engine configuration
//!
//! Plain configuration structs with sensible defaults. Everything here is
//! fixed at store construction; per-upload coding parameters are derived
//! from these plus the disk count at upload creation and never change for
//! the lifetime of an upload.

use std::time::Duration;

/// Default erasure block size: input streams are consumed in blocks of up
/// to this many bytes.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// Metadata key carrying the caller's requested storage class.
pub const AMZ_STORAGE_CLASS: &str = "x-amz-storage-class";

/// Standard storage class name.
pub const STORAGE_CLASS_STANDARD: &str = "STANDARD";

/// Reduced-redundancy storage class name.
pub const STORAGE_CLASS_RRS: &str = "REDUCED_REDUNDANCY";

// =============================================================================
// Storage Class
// =============================================================================

/// Parity selection per storage class.
///
/// A `None` entry means the class falls back to half the disk count.
#[derive(Debug, Clone, Default)]
pub struct StorageClassConfig {
    /// Parity shard count for STANDARD objects
    pub standard_parity: Option<usize>,

    /// Parity shard count for REDUCED_REDUNDANCY objects
    pub rrs_parity: Option<usize>,
}

impl StorageClassConfig {
    /// Parity for the given storage-class metadata value, if configured.
    pub fn parity_for(&self, class: &str) -> Option<usize> {
        match class {
            STORAGE_CLASS_RRS => self.rrs_parity,
            STORAGE_CLASS_STANDARD => self.standard_parity,
            _ => self.standard_parity,
        }
    }
}

// =============================================================================
// Store Configuration
// =============================================================================

/// Configuration for the erasure store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Erasure block size in bytes
    pub block_size: u64,

    /// Per-class parity overrides
    pub storage_class: StorageClassConfig,

    /// Reject overwrite of committed objects at complete time
    pub worm: bool,

    /// Interval between stale-upload janitor sweeps
    pub cleanup_interval: Duration,

    /// Idle age after which a staged upload is expired by the janitor
    pub expiry: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            storage_class: StorageClassConfig::default(),
            worm: false,
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
            expiry: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.block_size, 1024 * 1024);
        assert!(!config.worm);
        assert_eq!(config.cleanup_interval, Duration::from_secs(86_400));
        assert_eq!(config.expiry, Duration::from_secs(14 * 86_400));
    }

    #[test]
    fn test_storage_class_parity() {
        let sc = StorageClassConfig {
            standard_parity: Some(4),
            rrs_parity: Some(2),
        };
        assert_eq!(sc.parity_for(STORAGE_CLASS_STANDARD), Some(4));
        assert_eq!(sc.parity_for(STORAGE_CLASS_RRS), Some(2));
        // Unknown classes use the standard parity.
        assert_eq!(sc.parity_for("GLACIER"), Some(4));
        assert_eq!(StorageClassConfig::default().parity_for("STANDARD"), None);
    }
}
