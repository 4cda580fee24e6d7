//! The cache store
//!
//! [`CacheStore`] composes the index, allocator, pin table, verifier and
//! backing file behind one mutex. Every public operation holds that mutex for
//! its full duration, disk I/O included, so operations are strictly
//! serializable: no reader sees a half-written block and no two writers are
//! handed overlapping clusters.

use crate::allocator::ClusterAllocator;
use crate::buffer::{BufferPool, PooledBuffer};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::eviction::eviction_candidates;
use crate::file::BlockFile;
use crate::index::{BlockIndex, ClusterAllocation, IndexState, INDEX_FORMAT_VERSION};
use crate::pins::PinTable;
use crate::settings::SettingsStore;
use crate::stats::SpaceStats;
use crate::verify;
use crate::watcher::SpaceWatcher;
use crate::{BlockStoreError, ContentKey, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use std::ops::ControlFlow;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Name of the index document in the settings directory
const INDEX_SETTING: &str = "index";

/// Progress of an integrity scan, reported after each block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckProgress {
    /// Blocks in the scan snapshot
    pub total: usize,
    /// Blocks verified so far
    pub checked: usize,
    /// Blocks that failed verification and were purged
    pub bad: usize,
}

/// Outcome of an integrity scan
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub total: usize,
    pub checked: usize,
    pub bad: usize,
    /// Whether the callback stopped the scan early
    pub stopped: bool,
}

/// Why a stored block could not be read back
#[derive(Error, Debug)]
enum ReadFault {
    #[error("cluster {0} is outside the store")]
    OutOfRange(u64),
    #[error("length {length} does not fit in {clusters} clusters")]
    LengthExceedsClusters { length: u64, clusters: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("content hash mismatch")]
    HashMismatch,
}

struct StoreState {
    index: BlockIndex,
    allocator: ClusterAllocator,
    pins: PinTable,
    file: BlockFile,
    settings: SettingsStore,
    size: u64,
    cluster_size: u64,
}

impl StoreState {
    fn total_clusters(&self) -> u64 {
        self.size / self.cluster_size
    }

    fn remove_entry(&mut self, key: &ContentKey) -> bool {
        match self.index.remove(key) {
            Some(allocation) => {
                self.allocator.reclaim(&allocation.clusters);
                true
            }
            None => false,
        }
    }

    /// Clusters that eviction can never free: those of stored, pinned blocks
    fn pinned_clusters(&self) -> u64 {
        self.pins
            .keys()
            .filter_map(|key| self.index.get(key))
            .map(|allocation| allocation.clusters.len() as u64)
            .sum()
    }

    /// Get `needed` clusters into the free set, evicting unpinned blocks oldest first
    fn create_space(&mut self, needed: usize) -> Result<()> {
        if self.allocator.ensure_capacity(needed, &self.index) {
            return Ok(());
        }

        let reachable = self.total_clusters().saturating_sub(self.pinned_clusters());
        if needed as u64 > reachable {
            return Err(BlockStoreError::SpaceNotFound {
                needed,
                available: self.allocator.free_count(),
            });
        }

        for key in eviction_candidates(&self.index, &self.pins) {
            self.remove_entry(&key);
            debug!(key = %key, "Evicted block");
            if self.allocator.ensure_capacity(needed, &self.index) {
                return Ok(());
            }
        }

        Err(BlockStoreError::SpaceNotFound {
            needed,
            available: self.allocator.free_count(),
        })
    }

    fn write_clusters(&mut self, clusters: &[u64], data: &[u8]) -> std::io::Result<()> {
        for (&cluster, chunk) in clusters.iter().zip(data.chunks(self.cluster_size as usize)) {
            self.file.write_cluster(cluster, chunk, self.size)?;
        }
        self.file.sync()
    }

    /// Read a block into a pooled buffer, hashing each cluster as it arrives
    fn read_verified(
        &mut self,
        key: &ContentKey,
        allocation: &ClusterAllocation,
        pool: &Arc<BufferPool>,
    ) -> std::result::Result<PooledBuffer, ReadFault> {
        let capacity = allocation.clusters.len() as u64 * self.cluster_size;
        if allocation.length > capacity {
            return Err(ReadFault::LengthExceedsClusters {
                length: allocation.length,
                clusters: allocation.clusters.len(),
            });
        }

        let total = self.total_clusters();
        let mut buf = pool.take(allocation.length as usize);
        let mut hasher = verify::ReadVerifier::new(key);
        for (&cluster, chunk) in allocation
            .clusters
            .iter()
            .zip(buf.chunks_mut(self.cluster_size as usize))
        {
            if cluster >= total {
                return Err(ReadFault::OutOfRange(cluster));
            }
            self.file.read_cluster(cluster, chunk)?;
            hasher.update(chunk);
        }

        if !hasher.verify() {
            return Err(ReadFault::HashMismatch);
        }
        Ok(buf)
    }

    fn stats(&self) -> SpaceStats {
        let used_space = self.index.used_clusters() * self.cluster_size;
        let locked_count = self.pins.keys().filter(|k| self.index.contains(k)).count();
        SpaceStats {
            size: self.size,
            used_space,
            locked_space: self.pinned_clusters() * self.cluster_size,
            free_space: self.size.saturating_sub(used_space),
            block_count: self.index.len(),
            locked_count,
        }
    }

    fn to_index_state(&self) -> IndexState {
        IndexState {
            version: INDEX_FORMAT_VERSION,
            size: self.size,
            cluster_size: self.cluster_size,
            entries: self.index.to_records(),
        }
    }
}

struct Shared {
    state: Mutex<StoreState>,
    report: RwLock<SpaceStats>,
    pool: Arc<BufferPool>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl Shared {
    fn publish_report(&self) {
        let stats = self.state.lock().stats();
        *self.report.write() = stats;
    }
}

/// A disk-backed, content-addressed block cache
pub struct CacheStore {
    shared: Arc<Shared>,
    watcher: SpaceWatcher,
}

/// Read the persisted index, returning the quantized size and the index
fn read_index(
    settings: &SettingsStore,
    config: &CacheConfig,
) -> Result<Option<(u64, BlockIndex)>> {
    let Some(state) = settings.load::<IndexState>(INDEX_SETTING)? else {
        return Ok(None);
    };

    if state.version != INDEX_FORMAT_VERSION {
        return Err(BlockStoreError::Configuration(format!(
            "unsupported index version {}",
            state.version
        )));
    }
    if state.cluster_size != config.cluster_size {
        return Err(BlockStoreError::Configuration(format!(
            "index was written with cluster size {}, configured {}",
            state.cluster_size, config.cluster_size
        )));
    }

    let size = config.quantize(state.size)?;
    let (index, dropped) =
        BlockIndex::from_records(state.entries, size / config.cluster_size, config.cluster_size);
    if dropped > 0 {
        warn!(dropped, "Dropped invalid records while loading index");
    }
    Ok(Some((size, index)))
}

impl CacheStore {
    /// Open the store in `config.directory`, loading any persisted index
    pub fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Open the store with a custom time source
    #[instrument(skip(config, clock), fields(dir = %config.directory.display()))]
    pub fn open_with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let settings = SettingsStore::new(config.settings_dir());
        let (size, index) = match read_index(&settings, &config)? {
            Some(loaded) => loaded,
            None => (config.quantize(config.size)?, BlockIndex::new()),
        };

        let mut file = BlockFile::open(config.blocks_path(), config.cluster_size, config.allocation_unit)?;
        if file.len() > size {
            file.set_len(size)?;
        }

        info!(size, blocks = index.len(), "Opened cache store");

        let state = StoreState {
            allocator: ClusterAllocator::new(size / config.cluster_size),
            index,
            pins: PinTable::new(),
            file,
            settings,
            size,
            cluster_size: config.cluster_size,
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            report: RwLock::new(SpaceStats::default()),
            pool: BufferPool::new(config.buffer_pool_capacity, config.buffer_retain_limit),
            clock,
            config,
        });

        let watched = Arc::clone(&shared);
        let watcher = SpaceWatcher::spawn(shared.config.watch_interval, move || {
            watched.publish_report();
        })?;

        Ok(Self { shared, watcher })
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Pool the store borrows read buffers from
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.shared.pool
    }

    /// Cluster size in bytes
    pub fn cluster_size(&self) -> u64 {
        self.shared.config.cluster_size
    }

    /// Quantized store size in bytes
    pub fn size(&self) -> u64 {
        self.shared.state.lock().size
    }

    /// Number of stored blocks
    pub fn len(&self) -> usize {
        self.shared.state.lock().index.len()
    }

    /// Whether no blocks are stored
    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().index.is_empty()
    }

    /// Check if a block is stored
    pub fn contains(&self, key: &ContentKey) -> bool {
        self.shared.state.lock().index.contains(key)
    }

    /// Byte length of a stored block
    pub fn length_of(&self, key: &ContentKey) -> Result<u64> {
        self.shared
            .state
            .lock()
            .index
            .get(key)
            .map(|allocation| allocation.length)
            .ok_or_else(|| BlockStoreError::KeyNotFound(key.clone()))
    }

    /// Where a stored block lives
    pub fn allocation_of(&self, key: &ContentKey) -> Option<ClusterAllocation> {
        self.shared.state.lock().index.get(key).cloned()
    }

    /// Read and verify a block
    ///
    /// A block that cannot be read back with content matching its key is
    /// purged from the index and reported as [`BlockStoreError::BlockNotFound`].
    #[instrument(skip(self))]
    pub fn get(&self, key: &ContentKey) -> Result<Bytes> {
        let mut state = self.shared.state.lock();
        let Some(allocation) = state.index.get(key).cloned() else {
            return Err(BlockStoreError::BlockNotFound(key.clone()));
        };

        match state.read_verified(key, &allocation, &self.shared.pool) {
            Ok(buf) => {
                state.index.touch(key, self.shared.clock.now());
                Ok(Bytes::copy_from_slice(&buf))
            }
            Err(fault) => {
                warn!(key = %key, error = %fault, "Purging unreadable block");
                state.remove_entry(key);
                Err(BlockStoreError::BlockNotFound(key.clone()))
            }
        }
    }

    /// Store a block under its content key
    ///
    /// Storing a key that is already present is a no-op. When the free set is
    /// short, unpinned blocks are evicted oldest first. If the block would not
    /// fit even with every unpinned block gone, `put` fails with
    /// [`BlockStoreError::SpaceNotFound`] before evicting anything.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub fn put(&self, key: &ContentKey, data: &[u8]) -> Result<()> {
        verify::check_write(key, data, self.shared.config.max_block_size).map_err(|reason| {
            warn!(key = %key, reason = %reason, "Rejected block");
            BlockStoreError::BadBlock {
                key: key.clone(),
                reason,
            }
        })?;

        let mut state = self.shared.state.lock();
        if state.index.contains(key) {
            debug!(key = %key, "Block already stored");
            return Ok(());
        }

        let needed = data.len().div_ceil(state.cluster_size as usize);
        state.create_space(needed)?;
        let clusters = state.allocator.take(needed);

        if let Err(e) = state.write_clusters(&clusters, data) {
            error!(key = %key, error = %e, "Failed to write block");
            state.allocator.reclaim(&clusters);
            return Err(BlockStoreError::SpaceNotFound {
                needed,
                available: state.allocator.free_count(),
            });
        }

        debug!(key = %key, clusters = clusters.len(), "Stored block");
        let allocation = ClusterAllocation::new(clusters, data.len() as u64, self.shared.clock.now());
        state.index.insert(key.clone(), allocation);
        Ok(())
    }

    /// Remove a block; removing an absent key is a no-op
    ///
    /// The clusters are freed but their bytes are left in place.
    #[instrument(skip(self))]
    pub fn remove(&self, key: &ContentKey) {
        if self.shared.state.lock().remove_entry(key) {
            debug!(key = %key, "Removed block");
        }
    }

    /// Pin a key so eviction skips it
    pub fn lock(&self, key: &ContentKey) {
        self.shared.state.lock().pins.pin(key);
    }

    /// Release one pin on a key
    pub fn unlock(&self, key: &ContentKey) -> Result<()> {
        self.shared
            .state
            .lock()
            .pins
            .unpin(key)
            .map(|_| ())
            .ok_or_else(|| BlockStoreError::KeyNotFound(key.clone()))
    }

    /// Whether a key is pinned
    pub fn is_locked(&self, key: &ContentKey) -> bool {
        self.shared.state.lock().pins.is_pinned(key)
    }

    /// Snapshot of pinned keys
    pub fn locked_keys(&self) -> Vec<ContentKey> {
        self.shared.state.lock().pins.keys().cloned().collect()
    }

    /// Snapshot of stored keys
    ///
    /// Reflects the store at the moment of the call only.
    pub fn keys(&self) -> impl Iterator<Item = ContentKey> {
        let keys: Vec<_> = self.shared.state.lock().index.keys().cloned().collect();
        keys.into_iter()
    }

    /// Change the store size
    ///
    /// The size is quantized; every block with a cluster beyond the new bound
    /// is removed, pinned or not, and the backing file is set to the new size.
    /// On error the store is left as it was.
    #[instrument(skip(self))]
    pub fn resize(&self, size: u64) -> Result<()> {
        let size = self.shared.config.quantize(size)?;
        {
            let mut state = self.shared.state.lock();
            let total = size / state.cluster_size;

            // Nothing changes unless the file takes the new length
            state.file.set_len(size)?;

            let beyond = state.index.keys_beyond(total);
            for key in &beyond {
                state.remove_entry(key);
            }

            state.allocator.resize(total);
            state.size = size;
            info!(size, removed = beyond.len(), "Resized cache store");
        }
        self.watcher.signal();
        Ok(())
    }

    /// Verify every stored block, purging the ones that fail
    ///
    /// Blocks are visited in random order. `progress` is called after each
    /// block and may return `ControlFlow::Break(())` to stop the scan; the
    /// store lock is released between blocks.
    #[instrument(skip(self, progress))]
    pub fn check_blocks<F>(&self, mut progress: F) -> CheckReport
    where
        F: FnMut(&CheckProgress) -> ControlFlow<()>,
    {
        let mut keys: Vec<_> = self.keys().collect();
        keys.shuffle(&mut rand::thread_rng());

        let mut report = CheckReport {
            total: keys.len(),
            ..Default::default()
        };

        for key in keys {
            match self.verify_stored(&key) {
                None => continue,
                Some(true) => report.checked += 1,
                Some(false) => {
                    report.checked += 1;
                    report.bad += 1;
                }
            }

            let step = CheckProgress {
                total: report.total,
                checked: report.checked,
                bad: report.bad,
            };
            if progress(&step).is_break() {
                report.stopped = true;
                break;
            }
        }

        info!(checked = report.checked, bad = report.bad, "Block check finished");
        report
    }

    /// Verify one block without refreshing its stamp; `None` if it is gone
    fn verify_stored(&self, key: &ContentKey) -> Option<bool> {
        let mut state = self.shared.state.lock();
        let allocation = state.index.get(key).cloned()?;

        match state.read_verified(key, &allocation, &self.shared.pool) {
            Ok(_) => Some(true),
            Err(fault) => {
                warn!(key = %key, error = %fault, "Purging corrupt block");
                state.remove_entry(key);
                Some(false)
            }
        }
    }

    /// Live space statistics
    pub fn stats(&self) -> SpaceStats {
        self.shared.state.lock().stats()
    }

    /// Statistics last published by the space watcher
    pub fn report(&self) -> SpaceStats {
        *self.shared.report.read()
    }

    /// Persist the index
    #[instrument(skip(self))]
    pub fn save(&self) -> Result<()> {
        let state = self.shared.state.lock();
        state.settings.save(INDEX_SETTING, &state.to_index_state())?;
        info!(blocks = state.index.len(), "Saved index");
        Ok(())
    }

    /// Replace the in-memory index with the persisted one
    ///
    /// Pins are kept. With nothing persisted the index becomes empty.
    #[instrument(skip(self))]
    pub fn load(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            let config = &self.shared.config;
            let (size, index) = match read_index(&state.settings, config)? {
                Some(loaded) => loaded,
                None => (state.size, BlockIndex::new()),
            };

            if state.file.len() > size {
                state.file.set_len(size)?;
            }

            let total = size / state.cluster_size;
            state.index = index;
            state.size = size;
            state.allocator.resize(total);
            info!(size, blocks = state.index.len(), "Loaded index");
        }
        self.watcher.signal();
        Ok(())
    }
}
