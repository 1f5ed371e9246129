//! Little-endian fixed layout encoding shared by packets, blocks and persisted entries.
use crate::harvester::{PublicKey, Signature};
use anyhow::Context as _;
use fastfinality_crypto::{ed25519, sha3_256::Hash256};

/// Cursor over an encoded buffer. Every read fails instead of panicking when the buffer
/// is too short.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Starts reading `buf` from the beginning.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Reads the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        anyhow::ensure!(
            n <= self.buf.len(),
            "unexpected end of buffer: want {n} bytes, got {}",
            self.buf.len()
        );
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Reads a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> anyhow::Result<[u8; N]> {
        Ok(self.read_bytes(N)?.try_into()?)
    }

    /// Reads a byte.
    pub fn read_u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> anyhow::Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> anyhow::Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64(&mut self) -> anyhow::Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Reads a hash.
    pub fn read_hash(&mut self) -> anyhow::Result<Hash256> {
        Ok(Hash256(self.read_array()?))
    }

    /// Reads a public key.
    pub fn read_public_key(&mut self) -> anyhow::Result<PublicKey> {
        PublicKey::from_bytes(&self.read_array::<{ ed25519::PUBLIC_KEY_LENGTH }>()?)
    }

    /// Reads a signature.
    pub fn read_signature(&mut self) -> anyhow::Result<Signature> {
        Ok(Signature::from_bytes(
            &self.read_array::<{ ed25519::SIGNATURE_LENGTH }>()?,
        ))
    }

    /// Checks that the whole buffer has been consumed.
    pub fn finish(self) -> anyhow::Result<()> {
        anyhow::ensure!(self.buf.is_empty(), "{} trailing bytes", self.buf.len());
        Ok(())
    }
}

/// Appends a length prefix, failing if `len` doesn't fit in `u16`.
pub fn write_len_u16(buf: &mut Vec<u8>, len: usize) -> anyhow::Result<()> {
    let len = u16::try_from(len).context("length overflows u16")?;
    buf.extend_from_slice(&len.to_le_bytes());
    Ok(())
}
