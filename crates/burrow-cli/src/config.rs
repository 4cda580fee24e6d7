//! Tool configuration

use burrow_blockstore::{CacheConfig, DEFAULT_CLUSTER_SIZE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the cache lives and how a fresh one is laid out
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Cache directory
    pub directory: PathBuf,
    /// Store size for a cache that has no persisted index yet
    pub size: Option<u64>,
    /// Cluster size in bytes
    pub cluster_size: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./burrow-cache"),
            size: None,
            cluster_size: DEFAULT_CLUSTER_SIZE,
        }
    }
}

impl ToolConfig {
    /// Build the store configuration
    pub fn cache_config(&self) -> CacheConfig {
        let config = CacheConfig::new(&self.directory).with_cluster_size(self.cluster_size);
        match self.size {
            Some(size) => config.with_size(size),
            None => config,
        }
    }
}
