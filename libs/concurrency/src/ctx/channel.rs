//! Unbounded MPSC channel with context-aware receiving.
use super::{Ctx, OrCanceled};
use tokio::sync::mpsc;

/// Sending half. Sending never blocks; messages sent after the receiver is dropped are discarded.
#[derive(Debug)]
pub struct UnboundedSender<T>(mpsc::UnboundedSender<T>);

impl<T> Clone for UnboundedSender<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Receiving half.
#[derive(Debug)]
pub struct UnboundedReceiver<T>(mpsc::UnboundedReceiver<T>);

/// Creates a new unbounded channel.
pub fn unbounded<T>() -> (UnboundedSender<T>, UnboundedReceiver<T>) {
    let (send, recv) = mpsc::unbounded_channel();
    (UnboundedSender(send), UnboundedReceiver(recv))
}

impl<T> UnboundedSender<T> {
    /// Enqueues a message.
    pub fn send(&self, v: T) {
        let _ = self.0.send(v);
    }
}

impl<T> UnboundedReceiver<T> {
    /// Awaits the next message. If every sender is gone this blocks until the context is canceled.
    pub async fn recv(&mut self, ctx: &Ctx) -> OrCanceled<T> {
        if let Some(v) = ctx.wait(self.0.recv()).await? {
            return Ok(v);
        }
        ctx.canceled().await;
        Err(super::Canceled)
    }

    /// Pops a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.0.try_recv().ok()
    }
}
