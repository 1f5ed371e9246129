//! Test fixtures for blocks and transactions.
use super::{Block, BlockHeader, BodySizePlugin, Height, Timestamp, Transaction, TransactionRegistry, BLOCK_VERSION};
use crate::harvester::SecretKey;
use rand::{
    distributions::{Distribution, Standard},
    Rng,
};

/// Entity type of the transactions generated in tests.
pub const TEST_ENTITY_TYPE: u16 = 0x4154;

/// Largest body of the transactions generated in tests.
pub const TEST_MAX_BODY_SIZE: usize = 256;

/// Registry accepting the transactions generated in tests.
pub fn test_registry() -> TransactionRegistry {
    let mut registry = TransactionRegistry::default();
    registry
        .register(BodySizePlugin {
            entity_type: TEST_ENTITY_TYPE,
            body_size: 1..=TEST_MAX_BODY_SIZE,
        })
        .unwrap();
    registry
}

impl Distribution<Transaction> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Transaction {
        let n = rng.gen_range(1..=TEST_MAX_BODY_SIZE);
        Transaction {
            entity_type: TEST_ENTITY_TYPE,
            body: (0..n).map(|_| rng.gen()).collect(),
        }
    }
}

/// Random block at `height`, proposed by `key`, with a few random transactions.
pub fn make_block(rng: &mut impl Rng, key: &SecretKey, height: Height, timestamp: Timestamp) -> Block {
    let header = BlockHeader {
        signer: key.public(),
        version: BLOCK_VERSION,
        height,
        timestamp,
        previous_block_hash: rng.gen(),
        transactions_hash: Default::default(),
        beneficiary: rng.gen(),
        committee_phase_time: 1000,
    };
    let n = rng.gen_range(0..4);
    Block::sign(key, header, (0..n).map(|_| rng.gen()).collect())
}
