use rand::{rngs::StdRng, Rng as _, SeedableRng as _};
use std::sync::{Mutex, PoisonError};

/// Source of RNGs handed out by the context.
#[derive(Debug)]
pub(super) enum Provider {
    /// Every RNG is seeded from OS entropy.
    Os,
    /// Every RNG is seeded from a deterministic stream.
    Seeded(Mutex<StdRng>),
}

impl Provider {
    pub(super) fn os() -> Self {
        Self::Os
    }

    pub(super) fn seeded(seed: u64) -> Self {
        Self::Seeded(Mutex::new(StdRng::seed_from_u64(seed)))
    }

    pub(super) fn rng(&self) -> StdRng {
        match self {
            Self::Os => StdRng::from_entropy(),
            Self::Seeded(seeds) => {
                let seed: u64 = seeds.lock().unwrap_or_else(PoisonError::into_inner).gen();
                StdRng::seed_from_u64(seed)
            }
        }
    }
}
