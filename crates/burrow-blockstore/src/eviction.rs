//! Eviction policy
//!
//! Under space pressure, unpinned entries are removed oldest-touched first
//! until the allocator can satisfy the request or no candidates are left.
//! Eviction never waits: if pinned entries hold the space, the write fails.

use crate::index::BlockIndex;
use crate::pins::PinTable;
use crate::ContentKey;

/// Unpinned keys ordered by last-update stamp, oldest first
///
/// Ties are broken by key so the order is deterministic.
pub fn eviction_candidates(index: &BlockIndex, pins: &PinTable) -> Vec<ContentKey> {
    let mut candidates: Vec<_> = index
        .iter()
        .filter(|(key, _)| !pins.is_pinned(key))
        .map(|(key, allocation)| (allocation.updated_at, key))
        .collect();

    candidates.sort_unstable();
    candidates.into_iter().map(|(_, key)| key.clone()).collect()
}
