//! Content hashing
//!
//! Blocks are addressed by the digest of their content. The protocol only ever
//! negotiates SHA-512, so [`HashAlgorithm`] is a closed enum rather than an
//! open trait object; adding an algorithm means adding a variant and a match arm.

use crate::{CryptoError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;
use std::str::FromStr;

/// Size of a SHA-512 digest in bytes
pub const SHA512_DIGEST_SIZE: usize = 64;

/// Hash algorithms a content key can be tagged with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-512 (FIPS 180-4)
    #[default]
    Sha512,
}

impl HashAlgorithm {
    /// Lowercase tag used in text and persisted forms
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Number of bytes in a digest produced by this algorithm
    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha512 => SHA512_DIGEST_SIZE,
        }
    }

    /// Hash the given data in one shot
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Start an incremental hash with this algorithm
    pub fn hasher(&self) -> IncrementalHasher {
        IncrementalHasher::new(*self)
    }

    /// Check that `digest` has the right length for this algorithm
    pub fn check_digest(&self, digest: &[u8]) -> Result<()> {
        if digest.len() != self.digest_len() {
            return Err(CryptoError::InvalidDigestLength {
                algorithm: self.name(),
                expected: self.digest_len(),
                actual: digest.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            other => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

enum HasherState {
    Sha512(Sha512),
}

/// An incremental hasher for data that arrives in pieces
///
/// Used to hash a block cluster by cluster as it is read back.
pub struct IncrementalHasher {
    state: HasherState,
}

impl IncrementalHasher {
    /// Create a new incremental hasher
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Self { state }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the digest bytes
    pub fn finalize(self) -> Vec<u8> {
        match self.state {
            HasherState::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Encode digest bytes as lowercase hex
pub fn to_hex(digest: &[u8]) -> String {
    hex::encode(digest)
}

/// Decode a hex digest and check its length against `algorithm`
pub fn from_hex(algorithm: HashAlgorithm, s: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(s)?;
    algorithm.check_digest(&bytes)?;
    Ok(bytes)
}
