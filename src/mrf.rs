//! Most-recently-failed uploads
//!
//! When a commit lands with part of the fleet offline, the affected
//! `(bucket, object)` tuple is queued here so background healing can bring
//! the lagging disks back in line. The engine only produces entries; the
//! healer that drains them is an external collaborator.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::warn;

/// Upper bound on queued entries; producers drop beyond it.
const MAX_PENDING: usize = 10_000;

/// One object committed with less than the full fleet online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialUpload {
    pub bucket: String,
    pub object: String,
}

/// Process-wide queue of partially committed uploads.
#[derive(Debug, Default)]
pub struct MrfQueue {
    entries: Mutex<VecDeque<PartialUpload>>,
}

impl MrfQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an object for healing. Duplicates of the most recent entry
    /// are collapsed; overflow beyond the cap is dropped with a warning.
    pub fn push(&self, bucket: &str, object: &str) {
        let entry = PartialUpload {
            bucket: bucket.to_string(),
            object: object.to_string(),
        };
        let mut entries = self.entries.lock();
        if entries.back() == Some(&entry) {
            return;
        }
        if entries.len() >= MAX_PENDING {
            warn!(bucket, object, "heal queue full, dropping entry");
            return;
        }
        entries.push_back(entry);
    }

    /// Take everything queued so far.
    pub fn drain(&self) -> Vec<PartialUpload> {
        self.entries.lock().drain(..).collect()
    }

    /// Number of entries currently queued.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Tests
// =============================================================================
