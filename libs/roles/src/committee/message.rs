use crate::{
    chain::{Block, Cosignature},
    codec::Reader,
    harvester::{InvalidSignatureError, SecretKey, Signature},
};
use anyhow::Context as _;
use fastfinality_crypto::sha3_256::Hash256;

/// Kind of a vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CommitteeMessageType {
    /// Vote of the prevote phase.
    Prevote = 0,
    /// Vote of the precommit phase.
    Precommit = 1,
}

impl TryFrom<u8> for CommitteeMessageType {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> anyhow::Result<Self> {
        Ok(match v {
            0 => Self::Prevote,
            1 => Self::Precommit,
            v => anyhow::bail!("unknown committee message type {v}"),
        })
    }
}

/// A vote for a proposed block.
///
/// The vote body (`type | block hash | block cosignature`) is signed by the cosigner,
/// and the embedded cosignature additionally attests the proposed block header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitteeMessage {
    /// Kind of the vote.
    pub message_type: CommitteeMessageType,
    /// Hash of the block voted for.
    pub block_hash: Hash256,
    /// Cosignature of the block header by the voter.
    pub block_cosignature: Cosignature,
    /// Signature of the voter over the vote body.
    pub message_signature: Signature,
}

impl CommitteeMessage {
    /// Size of the signed vote body.
    pub const DATA_SIZE: usize = 1 + 32 + 32 + 64;
    /// Size of the encoded vote.
    pub const SIZE: usize = Self::DATA_SIZE + 64;

    /// Builds a vote of `key` for `block`.
    pub fn new(message_type: CommitteeMessageType, block: &Block, key: &SecretKey) -> Self {
        let block_hash = block.hash();
        let block_cosignature = block.cosign(key);
        let body = encode_body(message_type, &block_hash, &block_cosignature);
        Self {
            message_type,
            block_hash,
            block_cosignature,
            message_signature: key.sign(&body),
        }
    }

    /// The signed vote body.
    pub fn data_buffer(&self) -> [u8; Self::DATA_SIZE] {
        encode_body(self.message_type, &self.block_hash, &self.block_cosignature)
    }

    /// Verifies the signature over the vote body against the cosigner's key.
    pub fn verify_message_signature(&self) -> Result<(), InvalidSignatureError> {
        self.block_cosignature
            .signer
            .verify(&self.data_buffer(), &self.message_signature)
    }

    /// Encodes the vote.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.data_buffer());
        buf.extend_from_slice(&self.message_signature.to_bytes());
        buf
    }

    /// Decodes a vote. `bytes` has to hold exactly one vote.
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(
            bytes.len() == Self::SIZE,
            "committee message has {} bytes, want {}",
            bytes.len(),
            Self::SIZE
        );
        let mut r = Reader::new(bytes);
        let msg = Self {
            message_type: r.read_u8()?.try_into()?,
            block_hash: r.read_hash()?,
            block_cosignature: Cosignature::decode(&mut r).context("block cosignature")?,
            message_signature: r.read_signature()?,
        };
        r.finish()?;
        Ok(msg)
    }
}

fn encode_body(
    message_type: CommitteeMessageType,
    block_hash: &Hash256,
    cosignature: &Cosignature,
) -> [u8; CommitteeMessage::DATA_SIZE] {
    let mut buf = [0; CommitteeMessage::DATA_SIZE];
    buf[0] = message_type as u8;
    buf[1..33].copy_from_slice(&block_hash.0);
    buf[33..65].copy_from_slice(cosignature.signer.as_bytes());
    buf[65..].copy_from_slice(&cosignature.signature.to_bytes());
    buf
}
