//! # Burrow Blockstore
//!
//! The local block cache of a Burrow node: content-addressed blocks kept in a
//! single fixed-cluster file for later redistribution to peers.
//!
//! This crate provides:
//! - **Block operations**: Put, get, remove and enumerate blocks by content key
//! - **Integrity**: Every write and every read is checked against the key's hash
//! - **Eviction**: Least-recently-touched unpinned blocks make room for new ones
//! - **Pinning**: Reference-counted locks that exempt blocks from eviction
//! - **Persistence**: The index survives restarts as a JSON settings document
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               CacheStore                │
//! │        (one mutex, all operations)      │
//! ├──────────┬──────────┬─────────┬─────────┤
//! │BlockIndex│ Allocator│PinTable │Verifier │
//! │          │+Eviction │         │         │
//! ├──────────┴──────────┴─────────┴─────────┤
//! │   BlockFile (clusters)  │ SettingsStore │
//! └─────────────────────────────────────────┘
//!            SpaceWatcher (reporting thread)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use burrow_blockstore::{CacheConfig, CacheStore, ContentKey};
//!
//! # fn main() -> burrow_blockstore::Result<()> {
//! let store = CacheStore::open(CacheConfig::new("/var/lib/burrow/cache"))?;
//! let data = b"Hello, World!";
//! let key = ContentKey::sha512(data);
//! store.put(&key, data)?;
//! assert_eq!(store.get(&key)?.as_ref(), data);
//! store.save()?;
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod eviction;
pub mod file;
pub mod index;
pub mod key;
pub mod pins;
pub mod settings;
pub mod stats;
pub mod store;
pub mod verify;
pub mod watcher;

pub use buffer::{BufferPool, PooledBuffer};
pub use clock::{Clock, SteppingClock, SystemClock};
pub use config::{CacheConfig, DEFAULT_CLUSTER_SIZE, DEFAULT_MAX_BLOCK_SIZE};
pub use error::{BadBlockReason, BlockStoreError, Result};
pub use index::{BlockIndex, ClusterAllocation};
pub use key::ContentKey;
pub use stats::SpaceStats;
pub use store::{CacheStore, CheckProgress, CheckReport};

pub use burrow_crypto::HashAlgorithm;
