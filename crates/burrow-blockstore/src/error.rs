//! Error types for the burrow-blockstore crate

use crate::ContentKey;
use thiserror::Error;

/// Result type alias using `BlockStoreError`
pub type Result<T> = std::result::Result<T, BlockStoreError>;

/// Why a block was refused by `put`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BadBlockReason {
    /// Content exceeds the maximum block size
    #[error("block too large: {size} bytes exceeds maximum {max} bytes")]
    TooLarge { size: usize, max: usize },

    /// Content does not hash to the key it was offered under
    #[error("content hash does not match key")]
    HashMismatch,
}

/// Errors that can occur during block cache operations
///
/// The data path (`get`, `put`, `length_of`, `unlock`) only ever returns the
/// first four variants. The remaining ones come from opening, resizing and
/// persisting the store.
#[derive(Error, Debug)]
pub enum BlockStoreError {
    /// Key is not in the index, or not pinned when unlocking
    #[error("key not found: {0}")]
    KeyNotFound(ContentKey),

    /// Block could not be produced with verified content
    #[error("block not found: {0}")]
    BlockNotFound(ContentKey),

    /// Block rejected on write
    #[error("bad block {key}: {reason}")]
    BadBlock {
        key: ContentKey,
        reason: BadBlockReason,
    },

    /// Not enough clusters even after evicting every unlocked block
    #[error("space not found: {needed} clusters needed, {available} available")]
    SpaceNotFound { needed: usize, available: usize },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<serde_json::Error> for BlockStoreError {
    fn from(err: serde_json::Error) -> Self {
        BlockStoreError::Serialization(err.to_string())
    }
}
