//! Cluster allocator
//!
//! Tracks which clusters of the backing file are free. The free set is a cache
//! of a pure function of the index: it starts dirty, is rebuilt by walking the
//! index once on first use, and is thrown away again whenever the index is
//! reloaded or the valid cluster range changes.
//!
//! After a rebuild the allocator knows every cluster below `frontier`. Clusters
//! at or above the frontier have never been handed out this session and are
//! pulled into the free set only when it runs short, up to the store bound.

use crate::index::BlockIndex;
use std::collections::BTreeSet;

/// Free-cluster bookkeeping for a store of `total_clusters` clusters
#[derive(Debug)]
pub struct ClusterAllocator {
    total_clusters: u64,
    free: BTreeSet<u64>,
    frontier: u64,
    dirty: bool,
}

impl ClusterAllocator {
    /// Create an allocator whose free set will be built on first use
    pub fn new(total_clusters: u64) -> Self {
        Self {
            total_clusters,
            free: BTreeSet::new(),
            frontier: 0,
            dirty: true,
        }
    }

    /// Drop the cached free set; the next `ensure_capacity` rebuilds it
    pub fn invalidate(&mut self) {
        self.free.clear();
        self.frontier = 0;
        self.dirty = true;
    }

    /// Change the cluster bound and invalidate
    pub fn resize(&mut self, total_clusters: u64) {
        self.total_clusters = total_clusters;
        self.invalidate();
    }

    /// Clusters currently known to be free
    ///
    /// Only meaningful once the free set has been built.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Make sure at least `needed` clusters sit in the free set, if the bound allows
    ///
    /// Returns whether the free set now holds `needed` clusters.
    pub fn ensure_capacity(&mut self, needed: usize, index: &BlockIndex) -> bool {
        if self.dirty {
            self.rebuild(index);
        }

        while self.free.len() < needed && self.frontier < self.total_clusters {
            self.free.insert(self.frontier);
            self.frontier += 1;
        }

        self.free.len() >= needed
    }

    /// Return clusters to the free set
    pub fn reclaim(&mut self, clusters: &[u64]) {
        if self.dirty {
            return;
        }
        for &cluster in clusters {
            if cluster < self.frontier {
                self.free.insert(cluster);
            }
        }
    }

    /// Remove `count` clusters from the free set, lowest first
    ///
    /// # Panics
    ///
    /// Panics if fewer than `count` clusters are free; callers must have had
    /// `ensure_capacity(count)` succeed first.
    pub fn take(&mut self, count: usize) -> Vec<u64> {
        assert!(
            !self.dirty && self.free.len() >= count,
            "take({}) without ensured capacity ({} free)",
            count,
            self.free.len()
        );
        let mut taken = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(cluster) = self.free.pop_first() {
                taken.push(cluster);
            }
        }
        taken
    }

    fn rebuild(&mut self, index: &BlockIndex) {
        let used: BTreeSet<u64> = index
            .iter()
            .flat_map(|(_, allocation)| allocation.clusters.iter().copied())
            .filter(|&c| c < self.total_clusters)
            .collect();

        self.frontier = used.last().map_or(0, |&max| max + 1);
        self.free = (0..self.frontier).filter(|c| !used.contains(c)).collect();
        self.dirty = false;

        tracing::debug!(
            used = used.len(),
            free = self.free.len(),
            frontier = self.frontier,
            "Rebuilt free cluster set"
        );
    }
}
