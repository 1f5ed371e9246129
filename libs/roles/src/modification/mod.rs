//! Validation of batched membership modifications.
//!
//! The same three rules apply to every kind of membership: the modification type has to be
//! known, an item may be modified at most once per batch, and a modification may not be
//! redundant (adding a member or removing a non-member).
use std::{collections::BTreeSet, fmt};

#[cfg(test)]
mod tests;

/// Type of a modification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ModificationType {
    /// Adds an item.
    Add = 0,
    /// Removes an item.
    Del = 1,
}

impl TryFrom<u8> for ModificationType {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self, Error> {
        match v {
            0 => Ok(Self::Add),
            1 => Ok(Self::Del),
            v => Err(Error::InvalidType(v)),
        }
    }
}

/// A modification as received, with an unchecked type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawModification<T> {
    /// Raw modification type.
    pub modification_type: u8,
    /// Modified item.
    pub item: T,
}

/// A validated modification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Modification<T> {
    /// Modification type.
    pub modification_type: ModificationType,
    /// Modified item.
    pub item: T,
}

/// A membership which can be modified in batches.
pub trait ModificationKind {
    /// Item added or removed by a modification.
    type Item;
    /// Identity of an item.
    type Id: Ord + fmt::Debug;
    /// Name of the item kind, for errors.
    const NAME: &'static str;

    /// Identity of `item`.
    fn id(item: &Self::Item) -> Self::Id;

    /// Whether `id` is currently a member.
    fn is_member(&self, id: &Self::Id) -> bool;

    /// Whether adding `id` would change the membership.
    fn can_add(&self, id: &Self::Id) -> bool {
        !self.is_member(id)
    }
}

/// Reasons for rejecting a batch of modifications.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Unknown modification type.
    #[error("invalid modification type {0}")]
    InvalidType(u8),
    /// An item is modified twice in one batch.
    #[error("{kind} {id} modified more than once in one batch")]
    DuplicateInBatch {
        /// Item kind.
        kind: &'static str,
        /// Item identity.
        id: String,
    },
    /// Adding an item which is already a member.
    #[error("{kind} {id} is already present")]
    RedundantAdd {
        /// Item kind.
        kind: &'static str,
        /// Item identity.
        id: String,
    },
    /// Removing an item which is not a member.
    #[error("{kind} {id} is not present")]
    RedundantRemove {
        /// Item kind.
        kind: &'static str,
        /// Item identity.
        id: String,
    },
}

/// Validates a batch of modifications against the current membership of `target`.
pub fn validate<K: ModificationKind>(
    target: &K,
    batch: impl IntoIterator<Item = RawModification<K::Item>>,
) -> Result<Vec<Modification<K::Item>>, Error> {
    let mut seen = BTreeSet::new();
    let mut validated = vec![];
    for raw in batch {
        let modification_type = ModificationType::try_from(raw.modification_type)?;
        let id = K::id(&raw.item);
        let describe = |id: &K::Id| format!("{id:?}");
        match modification_type {
            ModificationType::Add if !target.can_add(&id) => {
                return Err(Error::RedundantAdd {
                    kind: K::NAME,
                    id: describe(&id),
                })
            }
            ModificationType::Del if !target.is_member(&id) => {
                return Err(Error::RedundantRemove {
                    kind: K::NAME,
                    id: describe(&id),
                })
            }
            _ => {}
        }
        if seen.contains(&id) {
            return Err(Error::DuplicateInBatch {
                kind: K::NAME,
                id: describe(&id),
            });
        }
        seen.insert(id);
        validated.push(Modification {
            modification_type,
            item: raw.item,
        });
    }
    Ok(validated)
}
