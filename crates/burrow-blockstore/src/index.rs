//! Block index
//!
//! The durable mapping from content key to the clusters holding its bytes.
//! This is the single source of truth for what is stored where; the free
//! cluster set is derived from it.

use crate::ContentKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Version of the persisted index document
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Where a block lives in the backing file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAllocation {
    /// Cluster indices in content order, not necessarily contiguous
    pub clusters: Vec<u64>,
    /// Exact byte length of the content
    pub length: u64,
    /// Last put or successful get, used for eviction ordering only
    pub updated_at: DateTime<Utc>,
}

impl ClusterAllocation {
    /// Create a new allocation
    pub fn new(clusters: Vec<u64>, length: u64, updated_at: DateTime<Utc>) -> Self {
        Self {
            clusters,
            length,
            updated_at,
        }
    }

    /// Whether every cluster lies below `total_clusters`
    pub fn within(&self, total_clusters: u64) -> bool {
        self.clusters.iter().all(|&c| c < total_clusters)
    }
}

/// A persisted index entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexRecord {
    pub key: ContentKey,
    #[serde(flatten)]
    pub allocation: ClusterAllocation,
}

/// The persisted index document
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexState {
    pub version: u32,
    /// Quantized store size in bytes
    pub size: u64,
    pub cluster_size: u64,
    pub entries: Vec<IndexRecord>,
}

/// Mapping from content key to cluster allocation
#[derive(Debug, Default)]
pub struct BlockIndex {
    entries: HashMap<ContentKey, ClusterAllocation>,
}

impl BlockIndex {
    /// Create a new empty index
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Rebuild an index from persisted records
    ///
    /// Records that reference clusters outside `[0, total_clusters)`, claim a
    /// cluster already claimed by an earlier record, or declare a length their
    /// clusters cannot hold are dropped. Returns the index and the number of
    /// dropped records.
    pub fn from_records(
        records: Vec<IndexRecord>,
        total_clusters: u64,
        cluster_size: u64,
    ) -> (Self, usize) {
        let mut index = Self::new();
        let mut claimed = HashSet::new();
        let mut dropped = 0;

        for record in records {
            let allocation = record.allocation;
            let capacity = allocation.clusters.len() as u64 * cluster_size;
            let unique: HashSet<u64> = allocation.clusters.iter().copied().collect();

            let valid = allocation.within(total_clusters)
                && allocation.length <= capacity
                && unique.len() == allocation.clusters.len()
                && unique.is_disjoint(&claimed)
                && !index.contains(&record.key);

            if !valid {
                tracing::warn!(key = %record.key, "Dropping invalid index record");
                dropped += 1;
                continue;
            }

            claimed.extend(unique);
            index.entries.insert(record.key, allocation);
        }

        (index, dropped)
    }

    /// Snapshot the index as persistable records
    pub fn to_records(&self) -> Vec<IndexRecord> {
        self.entries
            .iter()
            .map(|(key, allocation)| IndexRecord {
                key: key.clone(),
                allocation: allocation.clone(),
            })
            .collect()
    }

    /// Check if a key is present
    pub fn contains(&self, key: &ContentKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Get the allocation for a key
    pub fn get(&self, key: &ContentKey) -> Option<&ClusterAllocation> {
        self.entries.get(key)
    }

    /// Record a new allocation
    pub fn insert(&mut self, key: ContentKey, allocation: ClusterAllocation) {
        self.entries.insert(key, allocation);
    }

    /// Remove a key, returning its allocation
    pub fn remove(&mut self, key: &ContentKey) -> Option<ClusterAllocation> {
        self.entries.remove(key)
    }

    /// Refresh the last-update stamp of a key
    pub fn touch(&mut self, key: &ContentKey, now: DateTime<Utc>) {
        if let Some(allocation) = self.entries.get_mut(key) {
            allocation.updated_at = now;
        }
    }

    /// Iterate over entries
    pub fn iter(&self) -> impl Iterator<Item = (&ContentKey, &ClusterAllocation)> {
        self.entries.iter()
    }

    /// Iterate over keys
    pub fn keys(&self) -> impl Iterator<Item = &ContentKey> {
        self.entries.keys()
    }

    /// Keys with at least one cluster at or beyond `total_clusters`
    pub fn keys_beyond(&self, total_clusters: u64) -> Vec<ContentKey> {
        self.entries
            .iter()
            .filter(|(_, allocation)| !allocation.within(total_clusters))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Total clusters referenced by the index
    pub fn used_clusters(&self) -> u64 {
        self.entries
            .values()
            .map(|allocation| allocation.clusters.len() as u64)
            .sum()
    }

    /// Get total number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
