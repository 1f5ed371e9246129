//! Detection of the committee stage from the stages reported by peers.
use crate::NetworkConfig;
use fastfinality_roles::{
    chain::{Height, Timestamp},
    committee::{CommitteePhase, CommitteeStage},
};
use std::collections::BTreeMap;

/// The most frequent value together with its number of occurrences.
/// Ties are broken in favor of the greatest value. `None` if there are no values.
pub fn find_most_frequent_value<T: Ord>(values: impl IntoIterator<Item = T>) -> Option<(T, usize)> {
    let mut counts = BTreeMap::new();
    for v in values {
        *counts.entry(v).or_insert(0usize) += 1;
    }
    counts.into_iter().max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
}

/// Whether `n` peers agreeing is enough: at least the approval share of the committee size.
pub fn peer_number_sufficient(n: usize, network: &NetworkConfig) -> bool {
    let required = network
        .committee_approval
        .mul_floor(u64::try_from(network.committee_size).unwrap_or(u64::MAX));
    u64::try_from(n).unwrap_or(u64::MAX) >= required
}

/// Phase of a round at time `now`, by elapsed phase times.
pub(crate) fn phase_at(stage: &CommitteeStage, now: Timestamp) -> CommitteePhase {
    let pt = stage.phase_time_millis.max(1);
    match now.millis_since(stage.round_start) / pt {
        0 => CommitteePhase::Propose,
        1 => CommitteePhase::Prevote,
        2 => CommitteePhase::Precommit,
        _ => CommitteePhase::Commit,
    }
}

/// Stage agreed on by a sufficient number of peers, for the height following `head`.
/// Peers which are not in a round are ignored. The phase is derived from `now`.
pub(crate) fn detect_stage(
    stages: &[CommitteeStage],
    head: Height,
    now: Timestamp,
    network: &NetworkConfig,
) -> Option<CommitteeStage> {
    let (stage, n) = find_most_frequent_value(
        stages
            .iter()
            .filter(|s| s.phase != CommitteePhase::None)
            .map(|s| s.with_phase(CommitteePhase::None)),
    )?;
    if !peer_number_sufficient(n, network) || stage.height != head.next() {
        return None;
    }
    Some(stage.with_phase(phase_at(&stage, now)))
}

/// First round after genesis: starts at the next multiple of the round duration.
pub(crate) fn genesis_stage(head: Height, now: Timestamp, network: &NetworkConfig) -> CommitteeStage {
    let pt = network.committee_phase_time_millis;
    let period = CommitteeStage::PHASES_PER_ROUND.saturating_mul(pt).max(1);
    CommitteeStage {
        height: head.next(),
        round: 0,
        phase: CommitteePhase::Propose,
        round_start: Timestamp(now.0.div_ceil(period).saturating_mul(period)),
        phase_time_millis: pt,
    }
}
