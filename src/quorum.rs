//! Quorum calculator
//!
//! Reduces vectors of per-disk outcomes to a single result under read- or
//! write-quorum thresholds, and derives the set of disks that hold the
//! authoritative manifest version for an operation. Thresholds come from
//! the coding parameters fixed at upload creation: read quorum is the data
//! block count, write quorum is one more.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::disk::DiskRef;
use crate::error::{DiskError, DiskResult};
use crate::manifest::FileInfo;

/// Disk errors skipped while counting consensus: these describe a peer
/// that is unreachable or unprepared (its reserved volumes not yet laid
/// down), not an observation about the data. File-level absence stays in
/// the tally: a quorum of prepared disks asserting a path does not exist
/// is the authoritative "no such object / no such upload" signal.
pub const OBJECT_OP_IGNORED_ERRS: &[DiskError] = &[
    DiskError::DiskNotFound,
    DiskError::FaultyDisk,
    DiskError::VolumeNotFound,
];

// =============================================================================
// Error Reduction
// =============================================================================

/// Count the most common outcome across disks. `None` entries (success)
/// participate in the count; ignored errors are skipped entirely. Ties are
/// broken toward success, then toward errors that indicate permanent data
/// loss over transient unavailability.
pub fn reduce_errs(
    errs: &[Option<DiskError>],
    ignored: &[DiskError],
) -> (usize, Option<DiskError>) {
    let mut counts: HashMap<Option<DiskError>, usize> = HashMap::new();
    for err in errs {
        if let Some(e) = err {
            if ignored.contains(e) {
                continue;
            }
        }
        *counts.entry(err.clone()).or_insert(0) += 1;
    }

    let mut max_count = 0usize;
    let mut max_err: Option<DiskError> = None;
    for (err, count) in counts {
        let wins = match count.cmp(&max_count) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => match (&err, &max_err) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(e), Some(m)) => e.is_data_loss() && !m.is_data_loss(),
            },
            std::cmp::Ordering::Less => false,
        };
        if wins {
            max_count = count;
            max_err = err;
        }
    }
    (max_count, max_err)
}

/// Reduce per-disk errors under `quorum`: success when the dominant
/// outcome is success and reaches quorum, the dominant error when that
/// error reaches quorum, `quorum_err` otherwise.
pub fn reduce_quorum_errs(
    errs: &[Option<DiskError>],
    ignored: &[DiskError],
    quorum: usize,
    quorum_err: DiskError,
) -> Option<DiskError> {
    let (max_count, max_err) = reduce_errs(errs, ignored);
    if max_count >= quorum {
        max_err
    } else {
        Some(quorum_err)
    }
}

/// Reduce under read quorum.
pub fn reduce_read_quorum_errs(
    errs: &[Option<DiskError>],
    ignored: &[DiskError],
    read_quorum: usize,
) -> Option<DiskError> {
    reduce_quorum_errs(errs, ignored, read_quorum, DiskError::ReadQuorum)
}

/// Reduce under write quorum.
pub fn reduce_write_quorum_errs(
    errs: &[Option<DiskError>],
    ignored: &[DiskError],
    write_quorum: usize,
) -> Option<DiskError> {
    reduce_quorum_errs(errs, ignored, write_quorum, DiskError::WriteQuorum)
}

// =============================================================================
// Online Disk Selection
// =============================================================================

/// The manifest mod-time shared by the largest set of disks; ties go to
/// the newest time.
pub fn common_mod_time(mod_times: &[Option<DateTime<Utc>>]) -> Option<DateTime<Utc>> {
    let mut counts: HashMap<DateTime<Utc>, usize> = HashMap::new();
    for t in mod_times.iter().flatten() {
        *counts.entry(*t).or_insert(0) += 1;
    }

    let mut max_count = 0usize;
    let mut latest: Option<DateTime<Utc>> = None;
    for (t, count) in counts {
        if count > max_count || (count == max_count && Some(t) > latest) {
            max_count = count;
            latest = Some(t);
        }
    }
    latest
}

/// Partition the fleet for one operation: disks whose manifest carries the
/// common (authoritative) mod-time stay online, the rest are flagged
/// offline and left for background healing.
pub fn list_online_disks(
    disks: &[Option<DiskRef>],
    metas: &[FileInfo],
    errs: &[Option<DiskError>],
) -> (Vec<Option<DiskRef>>, Option<DateTime<Utc>>) {
    let mut mod_times: Vec<Option<DateTime<Utc>>> = vec![None; metas.len()];
    for (i, meta) in metas.iter().enumerate() {
        if errs[i].is_none() {
            mod_times[i] = meta.mod_time;
        }
    }

    let mod_time = common_mod_time(&mod_times);

    let mut online: Vec<Option<DiskRef>> = vec![None; disks.len()];
    for (i, t) in mod_times.iter().enumerate() {
        if t.is_some() && *t == mod_time {
            online[i].clone_from(&disks[i]);
        }
    }
    (online, mod_time)
}

/// Pick the authoritative manifest: a copy carrying the common mod-time,
/// provided at least `quorum` disks agree on it.
pub fn pick_valid_file_info(
    metas: &[FileInfo],
    mod_time: Option<DateTime<Utc>>,
    quorum: usize,
) -> DiskResult<FileInfo> {
    let mut found: Option<&FileInfo> = None;
    let mut count = 0usize;
    for meta in metas {
        if meta.is_valid() && meta.mod_time == mod_time {
            count += 1;
            if found.is_none() {
                found = Some(meta);
            }
        }
    }
    if count < quorum {
        return Err(DiskError::ReadQuorum);
    }
    match found {
        Some(fi) => Ok(fi.clone()),
        None => Err(DiskError::ReadQuorum),
    }
}

/// Derive (read, write) quorum for an operation from the manifests read
/// off the fleet, falling back to `default_parity` when no copy is valid.
pub fn object_quorum_from_meta(
    metas: &[FileInfo],
    errs: &[Option<DiskError>],
    default_parity: usize,
) -> DiskResult<(usize, usize)> {
    let disk_count = metas.len();

    let parity = metas
        .iter()
        .enumerate()
        .find(|(i, meta)| errs[*i].is_none() && meta.is_valid())
        .map(|(_, meta)| meta.erasure.parity_blocks)
        .unwrap_or(default_parity);

    if parity == 0 || parity >= disk_count {
        return Err(DiskError::ReadQuorum);
    }

    let data = disk_count - parity;
    Ok((data, data + 1))
}

// =============================================================================
// Shuffles
// =============================================================================

/// Order disks so slot `i` holds the disk that stores logical shard `i`,
/// per the upload's distribution permutation.
pub fn shuffle_disks(disks: &[Option<DiskRef>], distribution: &[usize]) -> Vec<Option<DiskRef>> {
    if distribution.len() != disks.len() {
        return disks.to_vec();
    }
    let mut shuffled: Vec<Option<DiskRef>> = vec![None; disks.len()];
    for (i, disk) in disks.iter().enumerate() {
        shuffled[distribution[i] - 1].clone_from(disk);
    }
    shuffled
}

/// Same reordering for the per-disk manifest vector, so manifests stay
/// aligned with their disks after a shuffle.
pub fn shuffle_parts_metadata(metas: &[FileInfo], distribution: &[usize]) -> Vec<FileInfo> {
    if distribution.len() != metas.len() {
        return metas.to_vec();
    }
    let mut shuffled: Vec<FileInfo> = vec![FileInfo::default(); metas.len()];
    for (i, meta) in metas.iter().enumerate() {
        shuffled[distribution[i] - 1] = meta.clone();
    }
    shuffled
}

/// Null out fleet slots whose operation failed, keeping the vector aligned
/// by disk index.
pub fn eval_disks(
    disks: &[Option<DiskRef>],
    errs: &[Option<DiskError>],
) -> Vec<Option<DiskRef>> {
    debug_assert_eq!(disks.len(), errs.len());
    let mut online: Vec<Option<DiskRef>> = vec![None; disks.len()];
    for (i, err) in errs.iter().enumerate() {
        if err.is_none() {
            online[i].clone_from(&disks[i]);
        }
    }
    online
}

// =============================================================================
// Tests
// =============================================================================
