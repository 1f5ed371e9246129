//! Configuration of the bft component.
use crate::{ChainStore, CommitteeManager, PayloadManager, RoundChangePolicy};
use fastfinality_roles::{
    chain::TransactionRegistry,
    committee::Ratio,
    harvester::{PublicKey, SecretKey},
};
use fastfinality_storage::ViewSequenceCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Protocol parameters. They have to be identical on every committee member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Number of committee members queried for their state.
    pub committee_size: usize,
    /// Share of the committee weight (or of the queried peers) required for agreement.
    pub committee_approval: Ratio,
    /// Phase time of the first round, in milliseconds.
    pub committee_phase_time_millis: u64,
    /// Lower bound of the phase time.
    pub min_committee_phase_time_millis: u64,
    /// Upper bound of the phase time.
    pub max_committee_phase_time_millis: u64,
    /// Factor applied to the phase time after a failed round. Its inverse is applied
    /// after a committed block.
    pub committee_time_adjustment: Ratio,
    /// Maximal number of transactions in a block.
    pub max_transactions_per_block: usize,
    /// Whether committed blocks are broadcast to the peers.
    pub block_broadcast_enabled: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            committee_size: 21,
            committee_approval: Ratio { num: 2, den: 3 },
            committee_phase_time_millis: 1000,
            min_committee_phase_time_millis: 500,
            max_committee_phase_time_millis: 60_000,
            committee_time_adjustment: Ratio { num: 11, den: 10 },
            max_transactions_per_block: 200,
            block_broadcast_enabled: true,
        }
    }
}

impl NetworkConfig {
    /// Checks the parameters for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.committee_approval.validate()?;
        self.committee_time_adjustment.validate()?;
        anyhow::ensure!(self.committee_size > 0, "committee_size has to be positive");
        anyhow::ensure!(
            self.committee_approval.num > 0 && self.committee_approval.num <= self.committee_approval.den,
            "committee_approval has to be in (0, 1]"
        );
        anyhow::ensure!(
            self.committee_time_adjustment.num >= self.committee_time_adjustment.den,
            "committee_time_adjustment has to be at least 1"
        );
        anyhow::ensure!(
            0 < self.min_committee_phase_time_millis
                && self.min_committee_phase_time_millis <= self.committee_phase_time_millis
                && self.committee_phase_time_millis <= self.max_committee_phase_time_millis,
            "committee phase time bounds are inconsistent"
        );
        Ok(())
    }

    /// Clamps a phase time to the configured bounds.
    pub fn clamp_phase_time(&self, millis: u64) -> u64 {
        millis.clamp(
            self.min_committee_phase_time_millis,
            self.max_committee_phase_time_millis,
        )
    }
}

/// Configuration of the bft component.
#[derive(Debug)]
pub struct Config {
    /// The harvester's secret key.
    pub secret_key: SecretKey,
    /// Beneficiary of the blocks proposed by this node.
    pub beneficiary: PublicKey,
    /// Protocol parameters.
    pub network: NetworkConfig,
    /// Transaction plugins, used to check the blocks received from peers.
    pub registry: Arc<TransactionRegistry>,
    /// Source and verifier of the block transactions.
    pub payload_manager: Box<dyn PayloadManager>,
    /// The local chain.
    pub chain: Arc<dyn ChainStore>,
    /// Selects the committee of every round.
    pub committee_manager: Box<dyn CommitteeManager>,
    /// Computes the stage following a round.
    pub round_change_policy: Box<dyn RoundChangePolicy>,
    /// DBRB view sequences. Install messages are ignored without it.
    pub view_sequences: Option<Arc<ViewSequenceCache>>,
}
