//! Execution context: a cancellation token bundled with a deadline, a clock and an RNG source.
//!
//! Every blocking call of the node awaits "the operation OR the context getting canceled",
//! which gives a uniform shutdown path and turns phase deadlines into plain contexts
//! (see [`Ctx::with_deadline`]).
use crate::{signal, time};
use std::{fmt, future::Future, sync::Arc};

pub mod channel;
mod clock;
mod rng;
mod testonly;

pub use clock::NetworkClock;
pub use testonly::*;

/// Execution context. Cheap to pass by reference; not `Clone` outside of this crate.
pub struct Ctx(Arc<Inner>);

struct Inner {
    clock: Arc<NetworkClock>,
    rng_provider: Arc<rng::Provider>,
    canceled: Arc<signal::Once>,
    /// Whether `canceled` was created for this context (as opposed to being shared with the parent).
    owns_signal: bool,
    deadline: time::Deadline,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Wakes the propagation task spawned by `fork()`, so that it doesn't outlive the context.
        if self.owns_signal {
            self.canceled.send();
        }
    }
}

/// Error returned when a blocking operation was interrupted because the context got canceled
/// or its deadline passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("canceled")]
pub struct Canceled;

/// Result of a cancellable operation.
pub type OrCanceled<T> = std::result::Result<T, Canceled>;

/// Handle canceling the context returned together with it by [`Ctx::fork`].
#[derive(Debug)]
pub struct Canceller(Arc<signal::Once>);

impl Canceller {
    /// Cancels the forked context and everything derived from it.
    pub fn cancel(&self) {
        self.0.send();
    }
}

/// Constructs a top-level context backed by the system clock and OS entropy.
/// Should be called once, at the start of `main()`.
pub fn root() -> Ctx {
    Ctx::new(NetworkClock::system(), rng::Provider::os())
}

impl fmt::Debug for Ctx {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Ctx")
            .field("deadline", &self.0.deadline)
            .finish_non_exhaustive()
    }
}

impl Ctx {
    fn new(clock: NetworkClock, rng_provider: rng::Provider) -> Self {
        Self(Arc::new(Inner {
            clock: Arc::new(clock),
            rng_provider: Arc::new(rng_provider),
            canceled: Arc::new(signal::Once::new()),
            owns_signal: true,
            deadline: time::Deadline::Infinite,
        }))
    }

    /// Constructs a sub-context with deadline `d` (or the parent's deadline, whichever is earlier).
    /// The sub-context is canceled together with its parent.
    pub fn with_deadline(&self, d: time::Deadline) -> Self {
        Self(Arc::new(Inner {
            clock: self.0.clock.clone(),
            rng_provider: self.0.rng_provider.clone(),
            canceled: self.0.canceled.clone(),
            owns_signal: false,
            deadline: self.0.deadline.min(d),
        }))
    }

    /// Constructs a sub-context with deadline `now() + d`.
    pub fn with_timeout(&self, d: time::Duration) -> Self {
        self.with_deadline(time::shift(self.now(), d).into())
    }

    /// Constructs a sub-context which can be canceled independently of its parent.
    /// Cancellation of the parent still propagates to the fork.
    /// Requires a tokio runtime.
    pub fn fork(&self) -> (Self, Canceller) {
        let parent = self.0.canceled.clone();
        let child = Arc::new(signal::Once::new());
        let fork = Self(Arc::new(Inner {
            clock: self.0.clock.clone(),
            rng_provider: self.0.rng_provider.clone(),
            canceled: child.clone(),
            owns_signal: true,
            deadline: self.0.deadline,
        }));
        let propagate = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = parent.recv() => propagate.send(),
                () = propagate.recv() => {}
            }
        });
        (fork, Canceller(child))
    }

    /// Awaits until this context gets canceled or its deadline passes.
    pub async fn canceled(&self) {
        let deadline = self.0.deadline;
        tokio::select! {
            () = self.0.canceled.recv() => {}
            () = sleep_until_deadline(deadline) => {}
        }
    }

    /// Checks if this context is still active, i.e. neither canceled nor past its deadline.
    pub fn is_active(&self) -> bool {
        if self.0.canceled.try_recv() {
            return false;
        }
        match self.0.deadline {
            time::Deadline::Finite(t) => self.now() < t,
            time::Deadline::Infinite => true,
        }
    }

    /// The time at which this context will be canceled at the latest.
    pub fn deadline(&self) -> time::Deadline {
        self.0.deadline
    }

    /// Awaits `fut` unless the context gets canceled first. `fut` has to be cancel-safe.
    pub async fn wait<F: Future>(&self, fut: F) -> OrCanceled<F::Output> {
        tokio::select! {
            output = fut => Ok(output),
            () = self.canceled() => Err(Canceled),
        }
    }

    /// Current monotonic time.
    pub fn now(&self) -> time::Instant {
        time::Instant::now()
    }

    /// Current wall-clock time, as seen by the network.
    pub fn now_utc(&self) -> time::Utc {
        self.0.clock.utc_at(self.now())
    }

    /// Converts a wall-clock time into the monotonic instant at which it will occur.
    pub fn instant_at(&self, t: time::Utc) -> time::Instant {
        self.0.clock.instant_at(t)
    }

    /// Sleeps for `d`.
    pub async fn sleep(&self, d: time::Duration) -> OrCanceled<()> {
        self.sleep_until(time::shift(self.now(), d)).await
    }

    /// Sleeps until `t`.
    pub async fn sleep_until(&self, t: time::Instant) -> OrCanceled<()> {
        self.wait(tokio::time::sleep_until(t)).await
    }

    /// Sleeps until the wall-clock time `t`.
    pub async fn sleep_until_utc(&self, t: time::Utc) -> OrCanceled<()> {
        self.sleep_until(self.instant_at(t)).await
    }

    /// Returns a fresh random number generator: seeded from OS entropy in production
    /// and deterministically in tests. Create a new one per computation instead of storing it.
    pub fn rng(&self) -> rand::rngs::StdRng {
        self.0.rng_provider.rng()
    }
}

async fn sleep_until_deadline(deadline: time::Deadline) {
    match deadline {
        time::Deadline::Finite(t) => tokio::time::sleep_until(t).await,
        time::Deadline::Infinite => std::future::pending().await,
    }
}

/// `anyhow::Error` extended with an explicit cancellation variant.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Context has been canceled before the call completed.
    #[error(transparent)]
    Canceled(#[from] Canceled),
    /// Any other failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result with [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl crate::error::Wrap for Error {
    fn with_wrap<C: fmt::Display + Send + Sync + 'static, F: FnOnce() -> C>(self, f: F) -> Self {
        match self {
            Error::Internal(err) => Error::Internal(err.context(f())),
            err => err,
        }
    }
}
