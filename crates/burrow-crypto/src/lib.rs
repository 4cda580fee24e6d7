//! # Burrow Crypto
//!
//! Hashing primitives for the Burrow block cache.
//!
//! This crate provides:
//! - **HashAlgorithm**: The closed set of algorithms a content key may use (SHA-512)
//! - **IncrementalHasher**: Streaming digests over cluster-sized chunks
//! - **Hex helpers**: Text forms for digests
//!
//! ## Example
//!
//! ```rust
//! use burrow_crypto::HashAlgorithm;
//!
//! let digest = HashAlgorithm::Sha512.hash(b"Hello, World!");
//! assert_eq!(digest.len(), 64);
//! ```

pub mod error;
pub mod hashing;

pub use error::{CryptoError, Result};
pub use hashing::{HashAlgorithm, IncrementalHasher, SHA512_DIGEST_SIZE};
