//! Cryptographic primitives used by the fast finality node: ed25519 signatures
//! and SHA3-256 hashing, plus the byte/text encodings used to (de)serialize them.

pub use fmt::*;

pub mod ed25519;
mod fmt;
pub mod sha3_256;
