//! Integrity checks for blocks entering and leaving the store
//!
//! Nothing is stored under a key it does not hash to, and nothing is returned
//! for a key unless the bytes read back hash to it.

use crate::error::BadBlockReason;
use crate::ContentKey;
use burrow_crypto::IncrementalHasher;

/// Check a block offered to `put`
pub fn check_write(
    key: &ContentKey,
    data: &[u8],
    max_block_size: usize,
) -> Result<(), BadBlockReason> {
    if data.len() > max_block_size {
        return Err(BadBlockReason::TooLarge {
            size: data.len(),
            max: max_block_size,
        });
    }
    if !key.matches(data) {
        return Err(BadBlockReason::HashMismatch);
    }
    Ok(())
}

/// Verifies a block read back cluster by cluster
pub struct ReadVerifier<'a> {
    key: &'a ContentKey,
    hasher: IncrementalHasher,
}

impl<'a> ReadVerifier<'a> {
    pub fn new(key: &'a ContentKey) -> Self {
        Self {
            key,
            hasher: key.algorithm().hasher(),
        }
    }

    /// Feed the next piece of the block
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    /// Whether everything fed so far hashes to the key
    pub fn verify(self) -> bool {
        self.hasher.finalize() == self.key.digest()
    }
}
