use super::View;
use crate::codec::{self, Reader};
use fastfinality_crypto::sha3_256::Hash256;

/// A chain of mutually comparable views in strictly ascending order.
/// Greater index means more recent view.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sequence {
    views: Vec<View>,
}

impl Sequence {
    /// Views, least recent first.
    pub fn views(&self) -> &[View] {
        &self.views
    }

    /// Number of views.
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Whether the sequence has no views.
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// The least recent view, if any.
    pub fn maybe_least_recent(&self) -> Option<&View> {
        self.views.first()
    }

    /// The most recent view, if any.
    pub fn maybe_most_recent(&self) -> Option<&View> {
        self.views.last()
    }

    /// Index at which `view` would be inserted, if it is comparable with every view
    /// of the sequence and equal to none of them.
    pub fn can_insert(&self, view: &View) -> Option<usize> {
        let mut index = self.views.len();
        for (i, v) in self.views.iter().enumerate().rev() {
            match view.partial_cmp(v)? {
                std::cmp::Ordering::Equal => return None,
                std::cmp::Ordering::Less => index = i,
                std::cmp::Ordering::Greater => {}
            }
        }
        Some(index)
    }

    /// Whether `view` is strictly more recent than the most recent view.
    pub fn can_append(&self, view: &View) -> bool {
        self.maybe_most_recent().map_or(true, |last| view > last)
    }

    /// Whether every view of `other` is strictly more recent than every view of `self`.
    pub fn can_append_sequence(&self, other: &Sequence) -> bool {
        match (self.maybe_most_recent(), other.maybe_least_recent()) {
            (Some(last), Some(first)) => last < first,
            _ => true,
        }
    }

    /// Whether every view of `other` is already in `self` or can be inserted into it.
    pub fn can_merge(&self, other: &Sequence) -> bool {
        other
            .views
            .iter()
            .all(|v| self.views.contains(v) || self.can_insert(v).is_some())
    }

    /// Inserts `view` at its place. Returns the index, or `None` if the view doesn't fit.
    pub fn try_insert(&mut self, view: View) -> Option<usize> {
        let index = self.can_insert(&view)?;
        self.views.insert(index, view);
        Some(index)
    }

    /// Appends `view` if it is strictly more recent than the most recent view.
    /// Otherwise leaves the sequence unchanged.
    pub fn try_append(&mut self, view: View) -> bool {
        let ok = self.can_append(&view);
        if ok {
            self.views.push(view);
        }
        ok
    }

    /// Appends all views of `other` if they are all more recent than the most recent view.
    pub fn try_append_sequence(&mut self, other: &Sequence) -> bool {
        let ok = self.can_append_sequence(other);
        if ok {
            self.views.extend(other.views.iter().cloned());
        }
        ok
    }

    /// Merges `other` into `self`, if [`Self::can_merge`] allows it.
    pub fn try_merge(&mut self, other: &Sequence) -> bool {
        if !self.can_merge(other) {
            return false;
        }
        for view in &other.views {
            // Views already present are skipped.
            let _ = self.try_insert(view.clone());
        }
        true
    }

    /// Removes `view`. Returns whether it was present.
    pub fn try_erase(&mut self, view: &View) -> bool {
        let Some(index) = self.views.iter().position(|v| v == view) else {
            return false;
        };
        self.views.remove(index);
        true
    }

    /// Whether the views are in strictly ascending order.
    pub fn is_valid_sequence(views: &[View]) -> bool {
        views.windows(2).all(|w| w[0] < w[1])
    }

    /// Builds a sequence from views, if they form a valid one.
    pub fn from_views(views: Vec<View>) -> Option<Self> {
        Self::is_valid_sequence(&views).then_some(Self { views })
    }

    /// Encodes the sequence: `u16 count | repeated view`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> anyhow::Result<()> {
        codec::write_len_u16(buf, self.views.len())?;
        for view in &self.views {
            view.encode(buf)?;
        }
        Ok(())
    }

    /// Decodes the views of an encoded sequence without checking that they form one.
    pub fn decode_views(r: &mut Reader) -> anyhow::Result<Vec<View>> {
        let count = r.read_u16()?;
        (0..count).map(|_| View::decode(r)).collect()
    }

    /// Decodes a sequence, rejecting views which do not form one.
    pub fn decode(r: &mut Reader) -> anyhow::Result<Self> {
        let views = Self::decode_views(r)?;
        Self::from_views(views).ok_or_else(|| anyhow::format_err!("views do not form a sequence"))
    }

    /// Hash of the encoded sequence.
    pub fn hash(&self) -> anyhow::Result<Hash256> {
        let mut buf = vec![];
        self.encode(&mut buf)?;
        Ok(Hash256::new(&buf))
    }
}
