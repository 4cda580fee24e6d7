//! Pin table
//!
//! Reference counts of keys that upper layers are using. A pinned key is never
//! chosen for eviction. Pins are independent of the index: a key may be pinned
//! before it is stored and stays pinned after it is removed.

use crate::ContentKey;
use std::collections::HashMap;

/// Reference-counted set of pinned keys
#[derive(Debug, Default)]
pub struct PinTable {
    counts: HashMap<ContentKey, usize>,
}

impl PinTable {
    /// Create an empty pin table
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }

    /// Increment the pin count of `key`, returning the new count
    pub fn pin(&mut self, key: &ContentKey) -> usize {
        let count = self.counts.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Decrement the pin count of `key`
    ///
    /// Returns the remaining count, or `None` if the key was not pinned.
    pub fn unpin(&mut self, key: &ContentKey) -> Option<usize> {
        let count = self.counts.get_mut(key)?;
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            self.counts.remove(key);
        }
        Some(remaining)
    }

    /// Check if a key is pinned
    pub fn is_pinned(&self, key: &ContentKey) -> bool {
        self.counts.contains_key(key)
    }

    /// Iterate over pinned keys
    pub fn keys(&self) -> impl Iterator<Item = &ContentKey> {
        self.counts.keys()
    }
}
