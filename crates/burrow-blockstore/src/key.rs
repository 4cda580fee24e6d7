//! Content keys
//!
//! A [`ContentKey`] names a block by the digest of its content. Equality and
//! hashing are structural over `(algorithm, digest)`.

use burrow_crypto::{hashing, CryptoError, HashAlgorithm};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A hash-algorithm tag plus the digest bytes of a block's content
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl ContentKey {
    /// Create a key from an algorithm and a digest of the matching length
    pub fn new(algorithm: HashAlgorithm, digest: impl Into<Vec<u8>>) -> Result<Self, CryptoError> {
        let digest = digest.into();
        algorithm.check_digest(&digest)?;
        Ok(Self { algorithm, digest })
    }

    /// Derive the key a payload must be stored under
    pub fn from_content(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        Self {
            algorithm,
            digest: algorithm.hash(data),
        }
    }

    /// Derive a SHA-512 key for a payload
    pub fn sha512(data: &[u8]) -> Self {
        Self::from_content(HashAlgorithm::Sha512, data)
    }

    /// The algorithm the digest was computed with
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The digest bytes
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Whether `data` hashes to this key
    pub fn matches(&self, data: &[u8]) -> bool {
        self.algorithm.hash(data) == self.digest
    }

    /// Digest as lowercase hex
    pub fn to_hex(&self) -> String {
        hashing::to_hex(&self.digest)
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "ContentKey({}:{})", self.algorithm, &hex[..hex.len().min(16)])
    }
}

impl FromStr for ContentKey {
    type Err = CryptoError;

    /// Parses `"<algorithm>:<hex>"`; a bare hex string is read as SHA-512
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = match s.split_once(':') {
            Some((tag, hex)) => (tag.parse::<HashAlgorithm>()?, hex),
            None => (HashAlgorithm::Sha512, s),
        };
        let digest = hashing::from_hex(algorithm, hex.trim())?;
        Ok(Self { algorithm, digest })
    }
}

impl Serialize for ContentKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
