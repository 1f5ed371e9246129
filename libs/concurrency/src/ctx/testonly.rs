use super::{rng, Ctx, NetworkClock};
use crate::time;

/// Seed of the RNG stream of test contexts.
const TEST_SEED: u64 = 0x6661_7374;

/// Wall-clock time reported by a fresh test context: 2024-01-01T00:00:00Z.
pub const TEST_EPOCH_MILLIS: i64 = 1_704_067_200_000;

/// Returns a root context with a deterministic RNG and a network clock starting at
/// [`TEST_EPOCH_MILLIS`]. Combine with a paused tokio runtime to control time.
pub fn test_root() -> Ctx {
    let epoch = time::UNIX_EPOCH + time::Duration::milliseconds(TEST_EPOCH_MILLIS);
    Ctx::new(NetworkClock::anchored_at(epoch), rng::Provider::seeded(TEST_SEED))
}
