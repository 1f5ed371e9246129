use crate::{
    codec::{self, Reader},
    harvester::ProcessId,
    modification::{self, Modification, ModificationKind, ModificationType, RawModification},
};
use std::{cmp::Ordering, collections::BTreeSet, fmt};

/// Kind of a membership change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum MembershipChange {
    /// The process joined.
    Join = 0,
    /// The process left.
    Leave = 1,
}

impl TryFrom<u8> for MembershipChange {
    type Error = anyhow::Error;

    fn try_from(v: u8) -> anyhow::Result<Self> {
        Ok(match v {
            0 => Self::Join,
            1 => Self::Leave,
            v => anyhow::bail!("unknown membership change {v}"),
        })
    }
}

/// A view of the process group: the set of membership changes it has gone through.
///
/// Views are ordered by strict inclusion, so two views may be incomparable:
/// `a < b` iff `a != b` and every change of `a` is in `b`.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct View {
    changes: BTreeSet<(ProcessId, MembershipChange)>,
}

impl View {
    /// Builds a view from changes.
    pub fn new(changes: impl IntoIterator<Item = (ProcessId, MembershipChange)>) -> Self {
        Self {
            changes: changes.into_iter().collect(),
        }
    }

    /// A view in which every process of `members` has joined.
    pub fn joined(members: impl IntoIterator<Item = ProcessId>) -> Self {
        Self::new(members.into_iter().map(|id| (id, MembershipChange::Join)))
    }

    /// Records a change. Returns false if it was already present.
    pub fn insert(&mut self, id: ProcessId, change: MembershipChange) -> bool {
        self.changes.insert((id, change))
    }

    /// Iterates over the changes, ordered by process id.
    pub fn changes(&self) -> impl Iterator<Item = &(ProcessId, MembershipChange)> {
        self.changes.iter()
    }

    /// Number of changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether the view has no changes.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Processes which joined and haven't left.
    pub fn members(&self) -> BTreeSet<ProcessId> {
        let left: BTreeSet<_> = self
            .changes
            .iter()
            .filter(|(_, c)| *c == MembershipChange::Leave)
            .map(|(id, _)| *id)
            .collect();
        self.changes
            .iter()
            .filter(|(id, c)| *c == MembershipChange::Join && !left.contains(id))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Whether the view contains the given change.
    pub fn has_change(&self, id: &ProcessId, change: MembershipChange) -> bool {
        self.changes.contains(&(*id, change))
    }

    /// Whether the process joined and hasn't left.
    pub fn is_member(&self, id: &ProcessId) -> bool {
        self.has_change(id, MembershipChange::Join) && !self.has_change(id, MembershipChange::Leave)
    }

    /// Number of members needed for a quorum: `n - floor((n - 1) / 3)`.
    pub fn quorum_size(&self) -> usize {
        let n = self.members().len();
        n - n.saturating_sub(1) / 3
    }

    /// Adds every change of `other`.
    pub fn merge(&mut self, other: &View) -> &mut Self {
        self.changes.extend(other.changes.iter().copied());
        self
    }

    /// Union of two views.
    pub fn merged(a: &View, b: &View) -> View {
        let mut v = a.clone();
        v.merge(b);
        v
    }

    /// Removes every change which is also in `other`.
    pub fn difference(&mut self, other: &View) -> &mut Self {
        self.changes.retain(|c| !other.changes.contains(c));
        self
    }

    /// Whether one of the views includes the other.
    pub fn are_comparable(a: &View, b: &View) -> bool {
        a.partial_cmp(b).is_some()
    }

    /// The view after applying a validated batch of membership modifications.
    /// A process which left may not join again under the same id.
    pub fn successor(
        &self,
        batch: impl IntoIterator<Item = RawModification<ProcessId>>,
    ) -> Result<View, modification::Error> {
        let mut next = self.clone();
        for Modification { modification_type, item } in modification::validate(self, batch)? {
            let change = match modification_type {
                ModificationType::Add => MembershipChange::Join,
                ModificationType::Del => MembershipChange::Leave,
            };
            next.insert(item, change);
        }
        Ok(next)
    }

    /// Encodes the view: `u16 count | repeated { process id | u8 change }`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> anyhow::Result<()> {
        codec::write_len_u16(buf, self.changes.len())?;
        for (id, change) in &self.changes {
            buf.extend_from_slice(id.as_bytes());
            buf.push(*change as u8);
        }
        Ok(())
    }

    /// Decodes a view. Duplicate changes are rejected.
    pub fn decode(r: &mut Reader) -> anyhow::Result<Self> {
        let count = r.read_u16()?;
        let mut view = Self::default();
        for _ in 0..count {
            let id = r.read_public_key()?;
            let change = r.read_u8()?.try_into()?;
            anyhow::ensure!(view.insert(id, change), "duplicate change in view");
        }
        Ok(view)
    }
}

impl PartialOrd for View {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.changes == other.changes {
            Some(Ordering::Equal)
        } else if self.changes.is_subset(&other.changes) {
            Some(Ordering::Less)
        } else if self.changes.is_superset(&other.changes) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl ModificationKind for View {
    type Item = ProcessId;
    type Id = ProcessId;
    const NAME: &'static str = "process";

    fn id(item: &ProcessId) -> ProcessId {
        *item
    }

    fn is_member(&self, id: &ProcessId) -> bool {
        View::is_member(self, id)
    }

    fn can_add(&self, id: &ProcessId) -> bool {
        !self.has_change(id, MembershipChange::Join)
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (id, change)) in self.changes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            let sign = match change {
                MembershipChange::Join => '+',
                MembershipChange::Leave => '-',
            };
            write!(f, "{sign}{id}")?;
        }
        f.write_str("]")
    }
}
