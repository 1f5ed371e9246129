//! Test-only utilities.
use super::{Committee, CommitteeMessage, CommitteeMessageType, LeaderSelectionMode, WeightedMember};
use crate::{chain::Block, harvester::SecretKey};
use rand::Rng;

/// Test setup: a committee together with the secret keys of its members.
#[derive(Debug, Clone)]
pub struct Setup {
    /// Members' secret keys, in the order of the committee.
    pub keys: Vec<SecretKey>,
    /// The committee.
    pub committee: Committee,
    /// Proposer selection.
    pub leader_selection: LeaderSelectionMode,
}

impl Setup {
    /// Committee of `members` members of weight 1.
    pub fn new(rng: &mut impl Rng, members: usize) -> Self {
        Self::new_with_weights(rng, vec![1; members])
    }

    /// Committee with the given weights.
    pub fn new_with_weights(rng: &mut impl Rng, weights: Vec<u64>) -> Self {
        let weighted: Vec<(SecretKey, u64)> = weights.into_iter().map(|w| (rng.gen(), w)).collect();
        let committee = Committee::new(weighted.iter().map(|(k, w)| WeightedMember {
            key: k.public(),
            weight: *w,
        }))
        .unwrap();
        let mut keys: Vec<SecretKey> = weighted.into_iter().map(|(k, _)| k).collect();
        keys.sort_by_key(|k| committee.index(&k.public()));
        Self {
            keys,
            committee,
            leader_selection: LeaderSelectionMode::RoundRobin,
        }
    }

    /// Secret key of a committee member.
    pub fn key_of(&self, key: &crate::harvester::PublicKey) -> &SecretKey {
        &self.keys[self.committee.index(key).unwrap()]
    }

    /// Votes of every member for `block`.
    pub fn votes(&self, message_type: CommitteeMessageType, block: &Block) -> Vec<CommitteeMessage> {
        self.keys
            .iter()
            .map(|k| CommitteeMessage::new(message_type, block, k))
            .collect()
    }
}
