use super::{Height, Timestamp, Transaction, TransactionRegistry};
use crate::{
    codec::Reader,
    harvester::{InvalidSignatureError, PublicKey, SecretKey, Signature},
};
use anyhow::Context as _;
use fastfinality_crypto::sha3_256::Hash256;

/// Size of the encoded block header.
pub const BLOCK_HEADER_SIZE: usize = 228;

/// Offset of the signed part of the header.
const HEADER_DATA_OFFSET: usize = 4 + 64;

/// Size of an encoded cosignature.
pub const COSIGNATURE_SIZE: usize = 32 + 64;

/// Version of the block format produced by this node.
pub const BLOCK_VERSION: u32 = 3;

/// A signature of a committee member over a block header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cosignature {
    /// Public key of the cosigner.
    pub signer: PublicKey,
    /// Signature over the block header data.
    pub signature: Signature,
}

impl Cosignature {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.signer.as_bytes());
        buf.extend_from_slice(&self.signature.to_bytes());
    }

    pub(crate) fn decode(r: &mut Reader) -> anyhow::Result<Self> {
        Ok(Self {
            signer: r.read_public_key().context("signer")?,
            signature: r.read_signature()?,
        })
    }
}

/// Block header fields covered by the proposer's signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    /// Proposer of the block.
    pub signer: PublicKey,
    /// Block format version.
    pub version: u32,
    /// Height of the block.
    pub height: Height,
    /// Start of the round in which the block was proposed.
    pub timestamp: Timestamp,
    /// Hash of the parent block.
    pub previous_block_hash: Hash256,
    /// Hash of the transactions, see [`transactions_hash`].
    pub transactions_hash: Hash256,
    /// Account receiving the block rewards.
    pub beneficiary: PublicKey,
    /// Phase time of the round in which the block was proposed, in milliseconds.
    pub committee_phase_time: u64,
}

/// A block: header signed by the proposer, transactions, and the cosignatures of the
/// committee members that confirmed it.
///
/// Layout: `u32 size | signature | signer | u32 version | u64 height | u64 timestamp |
/// previous block hash | transactions hash | beneficiary | u64 committee phase time |
/// u32 transaction payload size | transactions | cosignatures`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Proposer's signature over the header data.
    pub signature: Signature,
    /// Header.
    pub header: BlockHeader,
    /// Transactions.
    pub transactions: Vec<Transaction>,
    /// Cosignatures collected during the commit. Not covered by the block hash.
    pub cosignatures: Vec<Cosignature>,
}

/// Hash committing to the ordered list of transactions.
pub fn transactions_hash(transactions: &[Transaction]) -> Hash256 {
    let hashes: Vec<Hash256> = transactions.iter().map(Transaction::hash).collect();
    let parts: Vec<&[u8]> = hashes.iter().map(|h| &h.0[..]).collect();
    Hash256::from_parts(&parts)
}

fn encode_header_data(header: &BlockHeader, transactions: &[Transaction]) -> Vec<u8> {
    let payload_size: usize = transactions.iter().map(Transaction::size).sum();
    // Blocks with larger payloads fail to encode, so the clamped value never reaches the wire.
    let payload_size = u32::try_from(payload_size).unwrap_or(u32::MAX);
    let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE - HEADER_DATA_OFFSET);
    buf.extend_from_slice(header.signer.as_bytes());
    buf.extend_from_slice(&header.version.to_le_bytes());
    buf.extend_from_slice(&header.height.0.to_le_bytes());
    buf.extend_from_slice(&header.timestamp.0.to_le_bytes());
    buf.extend_from_slice(&header.previous_block_hash.0);
    buf.extend_from_slice(&header.transactions_hash.0);
    buf.extend_from_slice(header.beneficiary.as_bytes());
    buf.extend_from_slice(&header.committee_phase_time.to_le_bytes());
    buf.extend_from_slice(&payload_size.to_le_bytes());
    buf
}

impl Block {
    /// Builds a block proposed by `key`: fills in the signer and the transactions hash,
    /// and signs the header data.
    pub fn sign(key: &SecretKey, mut header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        header.signer = key.public();
        header.transactions_hash = transactions_hash(&transactions);
        Self {
            signature: key.sign(&encode_header_data(&header, &transactions)),
            header,
            transactions,
            cosignatures: vec![],
        }
    }

    /// Height of the block.
    pub fn height(&self) -> Height {
        self.header.height
    }

    /// Size of the encoded block.
    pub fn size(&self) -> usize {
        let payload_size: usize = self.transactions.iter().map(Transaction::size).sum();
        BLOCK_HEADER_SIZE + payload_size + COSIGNATURE_SIZE * self.cosignatures.len()
    }

    /// The signed part of the header: everything after `size | signature`.
    pub fn header_data(&self) -> Vec<u8> {
        encode_header_data(&self.header, &self.transactions)
    }

    /// Hash identifying the block: covers the proposer's signature and the header data,
    /// but not the cosignatures.
    pub fn hash(&self) -> Hash256 {
        Hash256::from_parts(&[&self.signature.to_bytes(), &self.header_data()])
    }

    /// Verifies the proposer's signature.
    pub fn verify_signature(&self) -> Result<(), InvalidSignatureError> {
        self.header.signer.verify(&self.header_data(), &self.signature)
    }

    /// Cosigns the block header.
    pub fn cosign(&self, key: &SecretKey) -> Cosignature {
        Cosignature {
            signer: key.public(),
            signature: key.sign(&self.header_data()),
        }
    }

    /// Verifies a cosignature of the block header.
    pub fn verify_cosignature(&self, cosignature: &Cosignature) -> Result<(), InvalidSignatureError> {
        verify_header_cosignature(&self.header_data(), cosignature)
    }

    /// Encodes the block.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let size = u32::try_from(self.size()).context("block too large")?;
        let mut buf = Vec::with_capacity(self.size());
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&self.signature.to_bytes());
        buf.extend_from_slice(&self.header_data());
        for tx in &self.transactions {
            tx.encode(&mut buf)?;
        }
        for cosignature in &self.cosignatures {
            cosignature.encode(&mut buf);
        }
        Ok(buf)
    }

    /// Decodes a block, checking every embedded size: the declared block size has to match
    /// `bytes`, the transactions have to fill the declared payload exactly and pass the
    /// registry's size checks, and the rest has to be a whole number of cosignatures.
    pub fn decode(bytes: &[u8], registry: &TransactionRegistry) -> anyhow::Result<Self> {
        let mut r = Reader::new(bytes);
        let size = usize::try_from(r.read_u32()?)?;
        anyhow::ensure!(
            size == bytes.len(),
            "declared block size {size} does not match buffer size {}",
            bytes.len()
        );
        anyhow::ensure!(size >= BLOCK_HEADER_SIZE, "block smaller than its header");
        let signature = r.read_signature()?;
        let header = BlockHeader {
            signer: r.read_public_key().context("signer")?,
            version: r.read_u32()?,
            height: Height(r.read_u64()?),
            timestamp: Timestamp(r.read_u64()?),
            previous_block_hash: r.read_hash()?,
            transactions_hash: r.read_hash()?,
            beneficiary: r.read_public_key().context("beneficiary")?,
            committee_phase_time: r.read_u64()?,
        };
        let payload_size = usize::try_from(r.read_u32()?)?;
        let mut payload = Reader::new(r.read_bytes(payload_size).context("transaction payload")?);
        let mut transactions = vec![];
        while payload.remaining() > 0 {
            let tx = Transaction::decode(&mut payload).context("transaction")?;
            anyhow::ensure!(
                registry.is_size_valid(&tx),
                "invalid size of a transaction of type {:#06x}",
                tx.entity_type
            );
            transactions.push(tx);
        }
        anyhow::ensure!(
            r.remaining() % COSIGNATURE_SIZE == 0,
            "{} bytes do not form whole cosignatures",
            r.remaining()
        );
        let mut cosignatures = vec![];
        while r.remaining() > 0 {
            cosignatures.push(Cosignature::decode(&mut r).context("cosignature")?);
        }
        Ok(Self {
            signature,
            header,
            transactions,
            cosignatures,
        })
    }
}

/// Verifies a cosignature over already serialized header data.
pub fn verify_header_cosignature(
    header_data: &[u8],
    cosignature: &Cosignature,
) -> Result<(), InvalidSignatureError> {
    cosignature.signer.verify(header_data, &cosignature.signature)
}
