//! Error types for the burrow-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur while hashing or parsing digests
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Algorithm tag not recognised
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Digest has the wrong number of bytes for its algorithm
    #[error("invalid digest length for {algorithm}: expected {expected} bytes, got {actual}")]
    InvalidDigestLength {
        algorithm: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Hex decode error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
