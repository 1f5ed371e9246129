use crate::PayloadManager;
use fastfinality_concurrency::ctx;
use fastfinality_roles::chain::{Block, Height, Transaction};
use rand::Rng as _;

/// Proposes up to `self.0` random transactions and accepts every block.
#[derive(Debug, Clone, Copy)]
pub struct RandomPayload(pub usize);

#[async_trait::async_trait]
impl PayloadManager for RandomPayload {
    async fn propose(
        &self,
        ctx: &ctx::Ctx,
        _height: Height,
        max_transactions: usize,
    ) -> ctx::Result<Vec<Transaction>> {
        let rng = &mut ctx.rng();
        let n = rng.gen_range(0..=self.0.min(max_transactions));
        Ok((0..n).map(|_| rng.gen()).collect())
    }

    async fn verify(&self, _ctx: &ctx::Ctx, _block: &Block) -> ctx::Result<()> {
        Ok(())
    }
}

/// Proposes empty blocks and rejects every block of the peers.
#[derive(Debug, Clone, Copy)]
pub struct RejectingPayload;

#[async_trait::async_trait]
impl PayloadManager for RejectingPayload {
    async fn propose(
        &self,
        _ctx: &ctx::Ctx,
        _height: Height,
        _max_transactions: usize,
    ) -> ctx::Result<Vec<Transaction>> {
        Ok(vec![])
    }

    async fn verify(&self, _ctx: &ctx::Ctx, block: &Block) -> ctx::Result<()> {
        Err(anyhow::format_err!("block {:?} rejected", block.height()).into())
    }
}
