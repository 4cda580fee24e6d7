//! Space reporting

use serde::{Deserialize, Serialize};

/// A read-only snapshot of how the store's space is used
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceStats {
    /// Quantized store size in bytes
    pub size: u64,
    /// Bytes in clusters referenced by the index
    pub used_space: u64,
    /// Bytes in clusters of stored blocks that are pinned
    pub locked_space: u64,
    /// Bytes not referenced by the index
    pub free_space: u64,
    /// Stored blocks
    pub block_count: usize,
    /// Stored blocks that are pinned
    pub locked_count: usize,
}

impl SpaceStats {
    /// Fraction of the store in use, in `[0, 1]`
    pub fn usage(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        self.used_space as f64 / self.size as f64
    }
}
