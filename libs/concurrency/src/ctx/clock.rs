use crate::time;

/// Maps the monotonic clock onto wall-clock time.
///
/// Both readings are taken once, when the clock is constructed; afterwards wall-clock time
/// advances exactly as fast as the monotonic clock. Phase deadlines are expressed in network
/// time, so this keeps them consistent with `tokio::time` (and thus with paused test runtimes).
#[derive(Debug, Clone, Copy)]
pub struct NetworkClock {
    anchor: time::Instant,
    anchor_utc: time::Utc,
}

impl NetworkClock {
    /// Clock anchored at the current system time.
    pub fn system() -> Self {
        Self::anchored_at(time::Utc::now_utc())
    }

    /// Clock reporting `utc` right now.
    pub fn anchored_at(utc: time::Utc) -> Self {
        Self {
            anchor: time::Instant::now(),
            anchor_utc: utc,
        }
    }

    /// Wall-clock time corresponding to the monotonic instant `t`.
    pub fn utc_at(&self, t: time::Instant) -> time::Utc {
        if t >= self.anchor {
            self.anchor_utc + (t - self.anchor)
        } else {
            self.anchor_utc - (self.anchor - t)
        }
    }

    /// Monotonic instant corresponding to the wall-clock time `t`.
    pub fn instant_at(&self, t: time::Utc) -> time::Instant {
        time::shift(self.anchor, t - self.anchor_utc)
    }
}
