//! Cache store configuration

use crate::{BlockStoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cluster size (4 KB)
pub const DEFAULT_CLUSTER_SIZE: u64 = 4096;

/// Default growth and quantization unit for the backing file (256 MB)
pub const DEFAULT_ALLOCATION_UNIT: u64 = 256 * 1024 * 1024;

/// Default maximum block size (32 MB)
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 32 * 1024 * 1024;

/// Default store size (1 GB)
pub const DEFAULT_STORE_SIZE: u64 = 1024 * 1024 * 1024;

/// Default largest buffer the buffer pool keeps for reuse (1 MB)
pub const DEFAULT_BUFFER_RETAIN_LIMIT: usize = 1024 * 1024;

/// Default interval between space report refreshes (3 minutes)
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// Configuration for a cache store
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the backing file and settings
    pub directory: PathBuf,
    /// Store size used when no persisted size exists yet
    pub size: u64,
    /// Cluster size in bytes
    pub cluster_size: u64,
    /// Store sizes are rounded up to a multiple of this, and the backing file grows by it
    pub allocation_unit: u64,
    /// Largest block `put` accepts
    pub max_block_size: usize,
    /// How often the space watcher refreshes its report
    #[serde(with = "duration_secs")]
    pub watch_interval: Duration,
    /// Idle buffers kept by the buffer pool
    pub buffer_pool_capacity: usize,
    /// Buffers with more capacity than this are freed instead of kept
    pub buffer_retain_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("cache"),
            size: DEFAULT_STORE_SIZE,
            cluster_size: DEFAULT_CLUSTER_SIZE,
            allocation_unit: DEFAULT_ALLOCATION_UNIT,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            buffer_pool_capacity: 16,
            buffer_retain_limit: DEFAULT_BUFFER_RETAIN_LIMIT,
        }
    }
}

impl CacheConfig {
    /// Create a config rooted at `directory` with defaults for everything else
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    /// Set the initial store size
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Set the cluster size
    pub fn with_cluster_size(mut self, cluster_size: u64) -> Self {
        self.cluster_size = cluster_size;
        self
    }

    /// Set the allocation unit
    pub fn with_allocation_unit(mut self, allocation_unit: u64) -> Self {
        self.allocation_unit = allocation_unit;
        self
    }

    /// Set the maximum block size
    pub fn with_max_block_size(mut self, max_block_size: usize) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    /// Set the space watcher interval
    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    /// Path of the backing block file
    pub fn blocks_path(&self) -> PathBuf {
        self.directory.join("cache.blocks")
    }

    /// Directory holding persisted settings
    pub fn settings_dir(&self) -> PathBuf {
        self.directory.join("settings")
    }

    /// Root directory
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Reject configurations the store cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.cluster_size == 0 {
            return Err(BlockStoreError::Configuration(
                "cluster size must be positive".to_string(),
            ));
        }
        if self.allocation_unit == 0 || self.allocation_unit % self.cluster_size != 0 {
            return Err(BlockStoreError::Configuration(format!(
                "allocation unit {} is not a positive multiple of cluster size {}",
                self.allocation_unit, self.cluster_size
            )));
        }
        if self.max_block_size == 0 {
            return Err(BlockStoreError::Configuration(
                "max block size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Round a requested store size up to the allocation unit, then to the cluster size
    ///
    /// Sizes that overflow when rounded, or that no file can be set to, are a
    /// configuration error.
    pub fn quantize(&self, size: u64) -> Result<u64> {
        round_up(size, self.allocation_unit)
            .and_then(|size| round_up(size, self.cluster_size))
            .filter(|&size| size <= MAX_STORE_SIZE)
            .ok_or_else(|| {
                BlockStoreError::Configuration(format!("store size {} is too large", size))
            })
    }
}

/// Largest length a file can be set to
const MAX_STORE_SIZE: u64 = i64::MAX as u64;

fn round_up(value: u64, unit: u64) -> Option<u64> {
    value.div_ceil(unit).checked_mul(unit)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
