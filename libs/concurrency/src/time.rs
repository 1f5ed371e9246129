//! Time types shared by the node.
//!
//! Monotonic time comes from tokio, so that tests running on a paused runtime
//! control every deadline in the system. Wall-clock time is derived from the
//! monotonic clock by the context (see [`crate::ctx::Ctx::now_utc`]).

/// A signed duration.
pub type Duration = time::Duration;

/// Monotonic clock time.
pub type Instant = tokio::time::Instant;

/// Wall-clock time.
pub type Utc = time::OffsetDateTime;

/// Start of the unix epoch.
pub const UNIX_EPOCH: Utc = time::OffsetDateTime::UNIX_EPOCH;

/// An optional deadline.
/// By the derived ordering `Finite(_) < Infinite`, so `min` picks the tighter deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Deadline {
    /// Finite deadline.
    Finite(Instant),
    /// No deadline.
    Infinite,
}

impl From<Instant> for Deadline {
    fn from(t: Instant) -> Self {
        Self::Finite(t)
    }
}

/// Converts a signed duration into a `std` one, clamping negative values to zero.
pub fn to_std(d: Duration) -> std::time::Duration {
    d.try_into().unwrap_or_default()
}

/// Shifts a monotonic instant by a signed duration.
pub fn shift(t: Instant, d: Duration) -> Instant {
    if d.is_negative() {
        t.checked_sub(to_std(-d)).unwrap_or(t)
    } else {
        t + to_std(d)
    }
}
