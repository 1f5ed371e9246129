//! Blocks and the positions in the chain.

mod block;
pub mod testonly;
#[cfg(test)]
mod tests;
mod transaction;

pub use block::*;
pub use transaction::*;

use fastfinality_concurrency::time;
use std::fmt;

/// Height of a block in the chain. The genesis block has height 1.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Height(pub u64);

impl Height {
    /// Height of the genesis block.
    pub const GENESIS: Self = Self(1);

    /// Next height.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Previous height, saturating at zero.
    pub fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl fmt::Debug for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for Height {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Network time: milliseconds since the unix epoch.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Converts wall-clock time. Times before the epoch map to zero.
    pub fn from_utc(t: time::Utc) -> Self {
        let millis = (t - time::UNIX_EPOCH).whole_milliseconds();
        Self(u64::try_from(millis).unwrap_or(0))
    }

    /// Converts to wall-clock time.
    pub fn to_utc(self) -> time::Utc {
        time::UNIX_EPOCH + time::Duration::milliseconds(i64::try_from(self.0).unwrap_or(i64::MAX))
    }

    /// Timestamp `millis` milliseconds later.
    pub fn add_millis(self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Milliseconds elapsed since `earlier`, zero if `earlier` is not earlier.
    pub fn millis_since(self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
