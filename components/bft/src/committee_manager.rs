//! Selection of the committee voting in a round.
use fastfinality_crypto::sha3_256::Hash256;
use fastfinality_roles::{
    chain::Height,
    committee::{Committee, LeaderSelectionMode, Weight},
    harvester::PublicKey,
};
use fastfinality_storage::ViewSequenceCache;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

/// Committee of a round: the block proposer and the cosigners, with their weights.
/// The proposer votes as well.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedCommittee {
    /// Round the committee was selected for.
    pub round: u32,
    /// Block proposer.
    pub proposer: PublicKey,
    /// Members cosigning the block, the proposer excluded.
    pub cosigners: BTreeSet<PublicKey>,
    /// Weights of the proposer and the cosigners.
    pub weights: BTreeMap<PublicKey, Weight>,
}

impl SelectedCommittee {
    /// Whether `key` votes in this round.
    pub fn is_member(&self, key: &PublicKey) -> bool {
        self.weights.contains_key(key)
    }

    /// Weight of the proposer plus the weights of all cosigners.
    pub fn total_weight(&self) -> Weight {
        self.weights.values().sum()
    }

    /// Sum of the weights of the distinct members among `keys`. Others count as zero.
    pub fn weight_of<'a>(&self, keys: impl IntoIterator<Item = &'a PublicKey>) -> Weight {
        let distinct: BTreeSet<_> = keys.into_iter().collect();
        distinct.into_iter().filter_map(|k| self.weights.get(k)).sum()
    }
}

/// Selects the committee of every round. Has to be deterministic: every member has to
/// select the same committee for the same `(height, round)`.
pub trait CommitteeManager: fmt::Debug + Send + Sync {
    /// Selects the committee of round `round` at height `height`.
    fn select_committee(&self, height: Height, round: u32) -> anyhow::Result<SelectedCommittee>;
}

/// [`CommitteeManager`] over a weighted [`Committee`].
#[derive(Debug)]
pub struct WeightedCommitteeManager {
    committee: Committee,
    leader_selection: LeaderSelectionMode,
    committee_size: usize,
    view_sequences: Option<Arc<ViewSequenceCache>>,
}

impl WeightedCommitteeManager {
    /// Manager selecting at most `committee_size` voters of `committee` per round.
    pub fn new(committee: Committee, leader_selection: LeaderSelectionMode, committee_size: usize) -> Self {
        Self {
            committee,
            leader_selection,
            committee_size,
            view_sequences: None,
        }
    }

    /// Restricts the selection to the members of the latest installed DBRB view.
    pub fn with_view_sequences(mut self, view_sequences: Arc<ViewSequenceCache>) -> Self {
        self.view_sequences = Some(view_sequences);
        self
    }

    /// Members eligible in the current view. If the view is unknown or none of the
    /// members belongs to it, the whole committee is eligible.
    fn eligible(&self) -> Committee {
        let Some(view_sequences) = &self.view_sequences else {
            return self.committee.clone();
        };
        let view = view_sequences.view().get_latest_view();
        if view.is_empty() {
            return self.committee.clone();
        }
        match self.committee.filter(|m| view.is_member(&m.key)) {
            Ok(eligible) => eligible,
            Err(err) => {
                tracing::warn!("latest view excludes the whole committee: {err:#}");
                self.committee.clone()
            }
        }
    }
}

/// Pseudo-random rank of a member in a round. Lower ranks are selected first.
fn cosigner_rank(height: Height, round: u32, key: &PublicKey) -> Hash256 {
    Hash256::from_parts(&[&height.0.to_le_bytes(), &round.to_le_bytes(), key.as_bytes()])
}

impl CommitteeManager for WeightedCommitteeManager {
    fn select_committee(&self, height: Height, round: u32) -> anyhow::Result<SelectedCommittee> {
        anyhow::ensure!(self.committee_size > 0, "committee size has to be positive");
        let eligible = self.eligible();
        let proposer = self.leader_selection.proposer(height, round, &eligible);
        let mut others: Vec<_> = eligible.keys().filter(|k| **k != proposer).copied().collect();
        if others.len() >= self.committee_size {
            others.sort_by_cached_key(|k| cosigner_rank(height, round, k));
            others.truncate(self.committee_size - 1);
        }
        let cosigners: BTreeSet<_> = others.into_iter().collect();
        let weights = std::iter::once(&proposer)
            .chain(&cosigners)
            .filter_map(|k| Some((*k, eligible.weight(k)?)))
            .collect();
        Ok(SelectedCommittee {
            round,
            proposer,
            cosigners,
            weights,
        })
    }
}
