//! Storage of the DBRB view sequences.
//!
//! [`ViewSequenceCache`] keeps the entries in memory with copy-on-write snapshots: readers
//! work on a stable [`CacheState`], while a single [`Delta`] stages changes which become
//! visible on commit. [`RocksDbStore`] persists committed states.

mod cache;
mod entry;
mod metrics;
mod rocksdb;
pub mod testonly;

pub use crate::{
    cache::{CacheState, Delta, ViewSequenceCache},
    entry::{LoadError, MessageHashEntry, ViewSequenceEntry},
    rocksdb::RocksDbStore,
};
