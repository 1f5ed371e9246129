//! One-shot broadcast signal. Backbone of context cancellation.
use tokio::sync::watch;

/// A flag which can be raised exactly once and awaited by any number of tasks.
#[derive(Debug)]
pub struct Once(watch::Sender<bool>);

impl Default for Once {
    fn default() -> Self {
        Self::new()
    }
}

impl Once {
    /// Constructs a lowered signal.
    pub fn new() -> Self {
        Self(watch::channel(false).0)
    }

    /// Raises the signal. Subsequent calls are no-ops.
    pub fn send(&self) {
        self.0.send_if_modified(|raised| !std::mem::replace(raised, true));
    }

    /// Checks whether the signal has been raised.
    pub fn try_recv(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until the signal is raised. Cancel-safe.
    pub async fn recv(&self) {
        let mut recv = self.0.subscribe();
        // The sender lives in `self`, so `wait_for` can only return once the flag is raised.
        let _ = recv.wait_for(|raised| *raised).await;
    }
}
