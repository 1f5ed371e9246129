use crate::ChainStore;
use anyhow::Context as _;
use fastfinality_concurrency::{ctx, sync};
use fastfinality_crypto::sha3_256::Hash256;
use fastfinality_roles::{
    chain::{Block, BlockHeader, Height, Timestamp, BLOCK_VERSION},
    harvester::SecretKey,
};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

/// First block of a test chain, signed by `key`.
pub fn make_genesis(key: &SecretKey, timestamp: Timestamp, phase_time_millis: u64) -> Block {
    let header = BlockHeader {
        signer: key.public(),
        version: BLOCK_VERSION,
        height: Height::GENESIS,
        timestamp,
        previous_block_hash: Hash256::ZERO,
        transactions_hash: Hash256::ZERO,
        beneficiary: key.public(),
        committee_phase_time: phase_time_millis,
    };
    Block::sign(key, header, vec![])
}

/// In-memory chain.
#[derive(Debug)]
pub struct InMemoryChain {
    blocks: Mutex<Vec<Block>>,
    head: watch::Sender<Height>,
}

impl InMemoryChain {
    /// Chain consisting of `genesis`.
    pub fn new(genesis: Block) -> Self {
        Self {
            head: watch::channel(genesis.height()).0,
            blocks: Mutex::new(vec![genesis]),
        }
    }

    /// All the blocks, starting with the genesis.
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Height of the last block.
    pub fn head_height(&self) -> Height {
        *self.head.borrow()
    }

    fn append(&self, block: Block) -> anyhow::Result<()> {
        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        let head = blocks.last().context("empty chain")?;
        anyhow::ensure!(
            block.height() == head.height().next(),
            "block {:?} doesn't follow the head {:?}",
            block.height(),
            head.height()
        );
        anyhow::ensure!(
            block.header.previous_block_hash == head.hash(),
            "block {:?} doesn't extend the head",
            block.height()
        );
        blocks.push(block);
        Ok(())
    }

    /// Waits until the chain reaches `height`.
    pub async fn wait_for_height(&self, ctx: &ctx::Ctx, height: Height) -> ctx::OrCanceled<()> {
        sync::wait_for(ctx, &mut self.head.subscribe(), |head| *head >= height).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChainStore for InMemoryChain {
    fn head(&self) -> Block {
        let blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        // The chain always holds the genesis.
        blocks[blocks.len() - 1].clone()
    }

    async fn commit(&self, _ctx: &ctx::Ctx, block: Block) -> ctx::Result<()> {
        let height = block.height();
        self.append(block)?;
        self.head.send_replace(height);
        Ok(())
    }
}
