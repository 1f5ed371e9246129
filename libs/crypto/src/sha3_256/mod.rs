//! SHA3-256 hashing. Blocks, transactions and DBRB messages are all addressed by it.
use crate::ByteFmt;
use sha3::{Digest as _, Sha3_256};

pub mod testonly;

/// Length of an encoded hash.
pub const HASH_LENGTH: usize = 32;

/// SHA3-256 hash. The all-zero value stands for "no hash".
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash256(pub [u8; HASH_LENGTH]);

impl Hash256 {
    /// The all-zero hash.
    pub const ZERO: Self = Self([0; HASH_LENGTH]);

    /// Hashes a message.
    pub fn new(msg: &[u8]) -> Self {
        Self(Sha3_256::digest(msg).into())
    }

    /// Hashes the concatenation of `parts`, without materializing it.
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha3_256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    /// Returns a reference to the bytes of this hash.
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// Whether this is the all-zero hash.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl ByteFmt for Hash256 {
    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(Self(bytes.try_into()?))
    }

    fn encode(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
