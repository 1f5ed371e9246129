use crate::{
    chain::Height,
    harvester::PublicKey,
    modification::{self, Modification, ModificationKind, ModificationType, RawModification},
};
use anyhow::Context as _;
use fastfinality_crypto::sha3_256::Hash256;
use std::collections::BTreeMap;

/// Voting weight.
pub type Weight = u64;

/// A set of weighted committee members, ordered by public key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Committee {
    vec: Vec<WeightedMember>,
    indexes: BTreeMap<PublicKey, usize>,
    total_weight: Weight,
}

impl std::ops::Deref for Committee {
    type Target = Vec<WeightedMember>;

    fn deref(&self) -> &Self::Target {
        &self.vec
    }
}

impl Committee {
    /// Creates a committee. Note that the order of the given members is NOT preserved.
    pub fn new(members: impl IntoIterator<Item = WeightedMember>) -> anyhow::Result<Self> {
        let mut map = BTreeMap::new();
        let mut total_weight: Weight = 0;
        for m in members {
            anyhow::ensure!(!map.contains_key(&m.key), "duplicate committee member {:?}", m.key);
            anyhow::ensure!(m.weight > 0, "member weight has to be a positive value");
            total_weight = total_weight
                .checked_add(m.weight)
                .context("sum of weights overflows")?;
            map.insert(m.key, m);
        }
        anyhow::ensure!(!map.is_empty(), "committee must contain at least one member");
        let vec: Vec<_> = map.into_values().collect();
        Ok(Self {
            indexes: vec.iter().enumerate().map(|(i, m)| (m.key, i)).collect(),
            vec,
            total_weight,
        })
    }

    /// Iterates over member keys.
    pub fn keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.vec.iter().map(|m| &m.key)
    }

    /// Returns true if the given key belongs to a member.
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.indexes.contains_key(key)
    }

    /// Index of a member.
    pub fn index(&self, key: &PublicKey) -> Option<usize> {
        self.indexes.get(key).copied()
    }

    /// Weight of a member.
    pub fn weight(&self, key: &PublicKey) -> Option<Weight> {
        self.index(key).map(|i| self.vec[i].weight)
    }

    /// Sum of all members' weights.
    pub fn total_weight(&self) -> Weight {
        self.total_weight
    }

    /// Sum of the weights of the distinct members among `keys`. Non-members count as zero.
    pub fn weight_of<'a>(&self, keys: impl IntoIterator<Item = &'a PublicKey>) -> Weight {
        let distinct: std::collections::BTreeSet<_> = keys.into_iter().collect();
        distinct
            .into_iter()
            .filter_map(|k| self.weight(k))
            .sum()
    }

    /// Sub-committee of the members satisfying `pred`.
    pub fn filter(&self, pred: impl Fn(&WeightedMember) -> bool) -> anyhow::Result<Self> {
        Self::new(self.vec.iter().filter(|m| pred(m)).cloned())
    }

    /// Applies a batch of membership modifications. The batch is validated as a whole first:
    /// nothing is applied if any modification is invalid.
    pub fn apply(
        &self,
        batch: impl IntoIterator<Item = RawModification<WeightedMember>>,
    ) -> anyhow::Result<Self> {
        let batch = modification::validate(self, batch)?;
        let mut members: BTreeMap<PublicKey, WeightedMember> =
            self.vec.iter().map(|m| (m.key, m.clone())).collect();
        for Modification { modification_type, item } in batch {
            match modification_type {
                ModificationType::Add => {
                    members.insert(item.key, item);
                }
                ModificationType::Del => {
                    members.remove(&item.key);
                }
            }
        }
        Self::new(members.into_values())
    }
}

impl ModificationKind for Committee {
    type Item = WeightedMember;
    type Id = PublicKey;
    const NAME: &'static str = "committee member";

    fn id(item: &WeightedMember) -> PublicKey {
        item.key
    }

    fn is_member(&self, id: &PublicKey) -> bool {
        self.contains(id)
    }
}

/// Member representation inside a [`Committee`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedMember {
    /// Member key.
    pub key: PublicKey,
    /// Member weight inside the committee.
    pub weight: Weight,
}

/// The mode used for selecting the block proposer of a round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LeaderSelectionMode {
    /// Select in a round-robin fashion, over `height + round`.
    #[default]
    RoundRobin,
    /// Select pseudo-randomly, with probability proportional to the weight.
    Weighted,
    /// Select always the same member. Falls back to round-robin if it is not in the committee.
    Sticky(PublicKey),
}

impl LeaderSelectionMode {
    /// Selects the block proposer of round `round` at height `height`.
    pub fn proposer(&self, height: Height, round: u32, committee: &Committee) -> PublicKey {
        match self {
            Self::Sticky(key) if committee.contains(key) => *key,
            Self::RoundRobin | Self::Sticky(_) => {
                let turn = height.0.wrapping_add(u64::from(round));
                let index = usize::try_from(turn % committee.len() as u64).unwrap_or_default();
                committee.vec[index].key
            }
            Self::Weighted => {
                let eligibility = Self::weighted_eligibility(height, round, committee.total_weight());
                let mut offset = 0;
                for member in committee.iter() {
                    offset += member.weight;
                    if eligibility < offset {
                        return member.key;
                    }
                }
                // `eligibility < total_weight`, so the loop always returns.
                committee.vec[committee.len() - 1].key
            }
        }
    }

    /// Pseudo-random value in `0..total_weight` derived from the round.
    pub fn weighted_eligibility(height: Height, round: u32, total_weight: Weight) -> Weight {
        let hash = Hash256::from_parts(&[&height.0.to_le_bytes(), &round.to_le_bytes()]);
        let mut prefix = [0; 8];
        prefix.copy_from_slice(&hash.0[..8]);
        u64::from_le_bytes(prefix) % total_weight.max(1)
    }
}
