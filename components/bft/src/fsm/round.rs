//! Stage of the round following a finished one.
use crate::NetworkConfig;
use fastfinality_roles::committee::{CommitteePhase, CommitteeStage};
use std::fmt;

/// Computes the stage following a round. Has to be deterministic, so that every member
/// starts the next round at the same time.
pub trait RoundChangePolicy: fmt::Debug + Send + Sync {
    /// Next round at the same height, after a round without a commit.
    fn increment_round(&self, stage: &CommitteeStage, network: &NetworkConfig) -> CommitteeStage;
    /// First round of the next height, after a commit.
    fn reset_round(&self, stage: &CommitteeStage, network: &NetworkConfig) -> CommitteeStage;
}

/// Starts the next round when the current one ends. The phase time grows by the
/// configured adjustment after a failed round and shrinks by it after a commit,
/// within the configured bounds.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdjustingRoundChangePolicy;

impl RoundChangePolicy for AdjustingRoundChangePolicy {
    fn increment_round(&self, stage: &CommitteeStage, network: &NetworkConfig) -> CommitteeStage {
        let pt = network.committee_time_adjustment.mul_floor(stage.phase_time_millis);
        CommitteeStage {
            height: stage.height,
            round: stage.round.saturating_add(1),
            phase: CommitteePhase::Propose,
            round_start: stage.round_end(),
            phase_time_millis: network.clamp_phase_time(pt),
        }
    }

    fn reset_round(&self, stage: &CommitteeStage, network: &NetworkConfig) -> CommitteeStage {
        let pt = network.committee_time_adjustment.div_floor(stage.phase_time_millis);
        CommitteeStage {
            height: stage.height.next(),
            round: 0,
            phase: CommitteePhase::Propose,
            round_start: stage.round_end(),
            phase_time_millis: network.clamp_phase_time(pt),
        }
    }
}
