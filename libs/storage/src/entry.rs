//! Entries of the view sequence cache and their serialization.
use anyhow::Context as _;
use fastfinality_crypto::sha3_256::Hash256;
use fastfinality_roles::{
    chain::Height,
    codec::Reader,
    dbrb::{Sequence, View},
};

/// Error returned when persisted entries cannot be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The stored views do not form a sequence. The storage has been tampered with,
    /// or was written by an incompatible version: loading cannot continue.
    #[error("corrupted view sequence in entry {hash}")]
    CorruptedSequence {
        /// Hash of the entry.
        hash: Hash256,
    },
    /// Any other failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Sequence of views installed by an install message, keyed by the message hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewSequenceEntry {
    version: u32,
    hash: Hash256,
    sequence: Sequence,
    end: Height,
}

impl ViewSequenceEntry {
    /// Version of the entries created by this node.
    pub const CURRENT_VERSION: u32 = 1;

    /// Entries with a version at least this high are never pruned.
    pub const PRUNING_EXEMPT_VERSION: u32 = 3;

    /// Entry created for the install message `hash`.
    pub fn new(hash: Hash256, sequence: Sequence, end: Height) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            hash,
            sequence,
            end,
        }
    }

    /// The entry with another version.
    pub fn with_version(self, version: u32) -> Self {
        Self { version, ..self }
    }

    /// Version of the entry.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Hash of the install message.
    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    /// The view sequence.
    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    /// Height at which the sequence ends.
    pub fn end(&self) -> Height {
        self.end
    }

    /// Sets the height at which the sequence ends.
    pub fn set_end(&mut self, end: Height) {
        self.end = end;
    }

    /// Appends a view. Returns false and leaves the entry unchanged if the view is not
    /// strictly more recent than the most recent one.
    pub fn try_append(&mut self, view: View) -> bool {
        self.sequence.try_append(view)
    }

    /// Whether `prune` may remove this entry.
    pub fn is_prunable(&self) -> bool {
        self.version < Self::PRUNING_EXEMPT_VERSION
    }

    /// Serializes the entry:
    /// `u32 version | hash | u16 sequence length | repeated { u16 view size |
    /// repeated { process id | u8 change } } | u64 end`.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = vec![];
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.hash.0);
        self.sequence.encode(&mut buf).context("sequence")?;
        buf.extend_from_slice(&self.end.0.to_le_bytes());
        Ok(buf)
    }

    /// Deserializes an entry, rebuilding the sequence from its views.
    pub fn decode(bytes: &[u8]) -> Result<Self, LoadError> {
        let mut r = Reader::new(bytes);
        let version = r.read_u32()?;
        let hash = r.read_hash()?;
        let views = Sequence::decode_views(&mut r).context("views")?;
        let end = Height(r.read_u64()?);
        r.finish()?;
        let sequence = Sequence::from_views(views).ok_or(LoadError::CorruptedSequence { hash })?;
        Ok(Self {
            version,
            hash,
            sequence,
            end,
        })
    }
}

/// Pointer to the entry holding the globally most recent view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHashEntry {
    /// Hash of the entry.
    pub hash: Hash256,
}

impl MessageHashEntry {
    /// The reserved key of the pointer.
    pub const KEY: u8 = 0;

    /// Serializes the pointer.
    pub fn encode(&self) -> Vec<u8> {
        self.hash.0.to_vec()
    }

    /// Deserializes the pointer.
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut r = Reader::new(bytes);
        let hash = r.read_hash()?;
        r.finish()?;
        Ok(Self { hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testonly::random_sequence;
    use assert_matches::assert_matches;
    use rand::Rng as _;

    #[test]
    fn entry_layout() {
        let rng = &mut rand::thread_rng();
        let sequence = random_sequence(rng, 3);
        let entry = ViewSequenceEntry::new(rng.gen(), sequence.clone(), Height(42)).with_version(2);
        let encoded = entry.encode().unwrap();
        assert_eq!(&encoded[..4], &2u32.to_le_bytes());
        assert_eq!(&encoded[4..36], &entry.hash().0);
        assert_eq!(&encoded[36..38], &3u16.to_le_bytes());
        assert_eq!(&encoded[encoded.len() - 8..], &42u64.to_le_bytes());
        assert_eq!(entry, ViewSequenceEntry::decode(&encoded).unwrap());
    }

    #[test]
    fn broken_chain_is_fatal() {
        let rng = &mut rand::thread_rng();
        let sequence = random_sequence(rng, 3);
        let hash: Hash256 = rng.gen();

        // Write the views in reverse order, bypassing the sequence checks.
        let mut buf = vec![];
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&hash.0);
        buf.extend_from_slice(&3u16.to_le_bytes());
        for view in sequence.views().iter().rev() {
            view.encode(&mut buf).unwrap();
        }
        buf.extend_from_slice(&7u64.to_le_bytes());
        assert_matches!(
            ViewSequenceEntry::decode(&buf),
            Err(LoadError::CorruptedSequence { hash: got }) if got == hash
        );
        assert_matches!(ViewSequenceEntry::decode(&buf[..20]), Err(LoadError::Internal(_)));
    }

    #[test]
    fn rejected_append_keeps_entry() {
        let rng = &mut rand::thread_rng();
        let sequence = random_sequence(rng, 2);
        let mut entry = ViewSequenceEntry::new(rng.gen(), sequence.clone(), Height(1));
        let before = entry.clone();
        assert!(!entry.try_append(sequence.views()[0].clone()));
        assert_eq!(entry, before);
    }
}
