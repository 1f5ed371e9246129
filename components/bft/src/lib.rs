//! This crate contains the weighted voting consensus component. A committee of weighted
//! members proposes a block, exchanges prevotes and precommits on it within fixed phase
//! deadlines, and commits it once a sufficient share of the committee weight precommitted.
//!
//! The state machine lives in [`WeightedVotingFsm`]; packets from peers are admitted into
//! the shared [`CommitteeData`] by the [`handlers::Dispatcher`].

pub use committee_data::{CommitteeData, Votes};
pub use committee_manager::{CommitteeManager, SelectedCommittee, WeightedCommitteeManager};
pub use config::{Config, NetworkConfig};
pub use fsm::{
    find_most_frequent_value, peer_number_sufficient, transition, AdjustingRoundChangePolicy, Event,
    RoundChangePolicy, State, WeightedVotingFsm,
};
use fastfinality_concurrency::ctx;
use fastfinality_roles::{
    chain::{Block, Height, Transaction},
    committee::CommitteeStage,
    packet::Packet,
};
use std::{fmt, sync::Arc};

mod committee_data;
mod committee_manager;
mod config;
mod fsm;
pub mod handlers;
mod metrics;
pub mod testonly;
#[cfg(test)]
mod tests;

/// Payload proposal and verification trait.
#[async_trait::async_trait]
pub trait PayloadManager: fmt::Debug + Send + Sync {
    /// Used by the block proposer to collect at most `max_transactions` transactions
    /// for the block at `height`.
    async fn propose(
        &self,
        ctx: &ctx::Ctx,
        height: Height,
        max_transactions: usize,
    ) -> ctx::Result<Vec<Transaction>>;
    /// Used by committee members to verify the transactions of a proposed block.
    /// An internal error marks the proposal as invalid.
    async fn verify(&self, ctx: &ctx::Ctx, block: &Block) -> ctx::Result<()>;
}

/// The local chain.
#[async_trait::async_trait]
pub trait ChainStore: fmt::Debug + Send + Sync {
    /// Last committed block.
    fn head(&self) -> Block;
    /// Appends a block cosigned by the committee. Fails if it doesn't extend the head.
    async fn commit(&self, ctx: &ctx::Ctx, block: Block) -> ctx::Result<()>;
}

/// Network collaborator. Delivery is best effort and one way.
#[async_trait::async_trait]
pub trait Peers: fmt::Debug + Send + Sync {
    /// Sends a packet to every other committee member.
    fn broadcast(&self, packet: Packet);
    /// Asks the peers for their current stage. Peers which don't answer are skipped.
    async fn remote_stages(&self, ctx: &ctx::Ctx) -> ctx::Result<Vec<CommitteeStage>>;
    /// Asks the peers for the block proposed in their current round. Peers without a
    /// proposal, or which don't answer, are skipped.
    async fn remote_proposed_blocks(&self, ctx: &ctx::Ctx) -> ctx::Result<Vec<Block>>;
}

impl Config {
    /// Starts the bft component. It runs the state machine and feeds the packets
    /// received from `inbound` to the handlers, until `ctx` is canceled.
    pub async fn run(
        self,
        ctx: &ctx::Ctx,
        peers: Arc<dyn Peers>,
        mut inbound: ctx::channel::UnboundedReceiver<Packet>,
    ) -> anyhow::Result<()> {
        let fsm = WeightedVotingFsm::new(self, peers)?;
        tracing::info!("Starting weighted voting {:?}", fsm.public_key());
        fsm.run(ctx, &mut inbound).await
    }
}
