//! In-memory cache of view sequences.
//!
//! The committed state is an immutable [`CacheState`] behind an `Arc`. Readers clone the `Arc`
//! and never observe partial writes. A writer stages its changes on a [`Delta`], which holds the
//! writer lock until it is committed or dropped.
use crate::{
    entry::{MessageHashEntry, ViewSequenceEntry},
    metrics,
};
use fastfinality_crypto::sha3_256::Hash256;
use fastfinality_roles::{chain::Height, dbrb::View};
use std::{
    ops,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError},
};

#[cfg(test)]
mod tests;

type HeightIndex = im::OrdMap<Height, im::HashSet<Hash256>>;

/// Snapshot of the cache content.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheState {
    pub(crate) entries: im::HashMap<Hash256, ViewSequenceEntry>,
    pub(crate) billing: HeightIndex,
    pub(crate) removal: HeightIndex,
    pub(crate) latest: Option<MessageHashEntry>,
}

impl CacheState {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an entry.
    pub fn find(&self, hash: &Hash256) -> Option<&ViewSequenceEntry> {
        self.entries.get(hash)
    }

    /// Whether an entry is present.
    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    /// Iterates over all entries, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ViewSequenceEntry> {
        self.entries.values()
    }

    /// Calls `f` for every entry due for billing at `height`.
    pub fn for_each_billing(&self, height: Height, mut f: impl FnMut(&ViewSequenceEntry)) {
        let Some(hashes) = self.billing.get(&height) else {
            return;
        };
        for hash in hashes {
            if let Some(entry) = self.entries.get(hash) {
                f(entry);
            }
        }
    }

    /// Hashes of the entries marked for removal at `height`.
    pub fn removals_at(&self, height: Height) -> impl Iterator<Item = &Hash256> {
        self.removal.get(&height).into_iter().flatten()
    }

    /// The pointer to the entry with the globally most recent view.
    pub fn latest(&self) -> Option<&MessageHashEntry> {
        self.latest.as_ref()
    }

    /// The most recent view of the entry referenced by the latest pointer.
    /// Empty if there is no pointer, or it points to a missing entry.
    pub fn get_latest_view(&self) -> View {
        self.latest
            .and_then(|latest| self.entries.get(&latest.hash))
            .and_then(|entry| entry.sequence().maybe_most_recent())
            .cloned()
            .unwrap_or_default()
    }
}

/// Cache of view sequences with a single writer and snapshot readers.
#[derive(Debug, Default)]
pub struct ViewSequenceCache {
    committed: RwLock<Arc<CacheState>>,
    writer: Mutex<()>,
}

impl ViewSequenceCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache initialized with a loaded state.
    pub fn from_state(state: CacheState) -> Self {
        metrics::CACHE.entries.set(state.len() as u64);
        Self {
            committed: RwLock::new(Arc::new(state)),
            writer: Mutex::default(),
        }
    }

    /// Read-only snapshot of the committed state.
    pub fn view(&self) -> Arc<CacheState> {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Starts a write. Blocks while another delta is alive.
    pub fn create_delta(&self) -> Delta<'_> {
        let guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.delta(guard)
    }

    /// Starts a write, unless another delta is alive.
    pub fn try_create_delta(&self) -> Option<Delta<'_>> {
        let guard = match self.writer.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(err)) => err.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(self.delta(guard))
    }

    fn delta<'a>(&'a self, guard: MutexGuard<'a, ()>) -> Delta<'a> {
        Delta {
            cache: self,
            _guard: guard,
            state: self.view().as_ref().clone(),
        }
    }
}

/// Staged changes of a [`ViewSequenceCache`]. Dropping the delta discards them.
#[derive(Debug)]
pub struct Delta<'a> {
    cache: &'a ViewSequenceCache,
    _guard: MutexGuard<'a, ()>,
    state: CacheState,
}

impl ops::Deref for Delta<'_> {
    type Target = CacheState;

    fn deref(&self) -> &CacheState {
        &self.state
    }
}

impl Delta<'_> {
    /// Inserts a new entry.
    pub fn insert(&mut self, entry: ViewSequenceEntry) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.state.contains(entry.hash()),
            "entry {} already exists",
            entry.hash()
        );
        self.state.entries.insert(*entry.hash(), entry);
        Ok(())
    }

    /// Applies `f` to an existing entry. Returns `None` if the entry is missing.
    pub fn modify<R>(
        &mut self,
        hash: &Hash256,
        f: impl FnOnce(&mut ViewSequenceEntry) -> R,
    ) -> Option<R> {
        self.state.entries.get_mut(hash).map(f)
    }

    /// Removes an entry, returning it.
    pub fn remove(&mut self, hash: &Hash256) -> Option<ViewSequenceEntry> {
        self.state.entries.remove(hash)
    }

    /// Marks an entry as due for billing at `height`.
    pub fn add_billing(&mut self, height: Height, hash: Hash256) {
        self.state.billing.entry(height).or_default().insert(hash);
    }

    /// Calls `f` for every entry due for billing at `height`, and clears the billing marks
    /// of `height`. Returns the number of billed entries.
    pub fn bill(&mut self, height: Height, mut f: impl FnMut(&ViewSequenceEntry)) -> usize {
        let Some(hashes) = self.state.billing.remove(&height) else {
            return 0;
        };
        let mut billed = 0;
        for hash in hashes {
            if let Some(entry) = self.state.entries.get(&hash) {
                f(entry);
                billed += 1;
            }
        }
        billed
    }

    /// Marks an entry for removal at `height`.
    pub fn add_removal(&mut self, height: Height, hash: Hash256) {
        self.state.removal.entry(height).or_default().insert(hash);
    }

    /// Points the latest pointer at an existing entry.
    pub fn set_latest(&mut self, hash: Hash256) -> anyhow::Result<()> {
        anyhow::ensure!(self.state.contains(&hash), "entry {hash} does not exist");
        self.state.latest = Some(MessageHashEntry { hash });
        Ok(())
    }

    /// Deletes the entries marked for removal at `height` which end at `height`.
    /// Entries of version 3 and above are exempt. Returns the hashes of the deleted entries.
    pub fn prune(&mut self, height: Height) -> Vec<Hash256> {
        let Some(marked) = self.state.removal.remove(&height) else {
            return vec![];
        };
        let mut pruned = vec![];
        for hash in marked {
            let prunable = self
                .state
                .entries
                .get(&hash)
                .is_some_and(|entry| entry.end() == height && entry.is_prunable());
            if prunable {
                self.state.entries.remove(&hash);
                pruned.push(hash);
            }
        }
        if !pruned.is_empty() {
            tracing::debug!("pruned {} view sequences at {height:?}", pruned.len());
            metrics::CACHE.pruned.inc_by(pruned.len() as u64);
        }
        pruned
    }

    /// Publishes the staged changes to new readers.
    pub fn commit(self) {
        metrics::CACHE.entries.set(self.state.len() as u64);
        *self
            .cache
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(self.state);
    }
}
