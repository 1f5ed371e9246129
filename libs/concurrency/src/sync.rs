//! Context-aware helpers around `tokio::sync`.
use crate::ctx;
use tokio::sync::{watch, Mutex, MutexGuard};

/// Waits until `pred` holds for the value in `recv`, and returns a reference to that value.
/// Returns `Canceled` if the context is canceled first, or if the sender is dropped
/// (the value can then never change, so this waits for cancellation instead).
pub async fn wait_for<'a, T>(
    ctx: &ctx::Ctx,
    recv: &'a mut watch::Receiver<T>,
    pred: impl Fn(&T) -> bool,
) -> ctx::OrCanceled<watch::Ref<'a, T>> {
    match ctx.wait(recv.wait_for(pred)).await? {
        Ok(v) => Ok(v),
        Err(_) => {
            ctx.canceled().await;
            Err(ctx::Canceled)
        }
    }
}

/// Waits until the value in `recv` changes. Marks the new value as seen.
pub async fn changed<T>(ctx: &ctx::Ctx, recv: &mut watch::Receiver<T>) -> ctx::OrCanceled<()> {
    if ctx.wait(recv.changed()).await?.is_err() {
        ctx.canceled().await;
        return Err(ctx::Canceled);
    }
    Ok(())
}

/// Locks an async mutex, unless the context is canceled first.
pub async fn lock<'a, T>(ctx: &ctx::Ctx, mutex: &'a Mutex<T>) -> ctx::OrCanceled<MutexGuard<'a, T>> {
    ctx.wait(mutex.lock()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time;

    #[tokio::test(start_paused = true)]
    async fn wait_for_observes_updates() {
        let ctx = &ctx::test_root();
        let (send, mut recv) = watch::channel(0u32);
        tokio::spawn(async move {
            for i in 1..=5 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                send.send_replace(i);
            }
            // Keep the sender alive so that the receiver doesn't observe closure.
            std::future::pending::<()>().await;
        });
        let got = *wait_for(ctx, &mut recv, |v| *v >= 3).await.unwrap();
        assert!(got >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_closed_channel_waits_for_cancellation() {
        let ctx = &ctx::test_root();
        let (send, mut recv) = watch::channel(0u32);
        drop(send);
        let ctx = &ctx.with_timeout(time::Duration::seconds(1));
        assert!(wait_for(ctx, &mut recv, |v| *v > 0).await.is_err());
        assert!(!ctx.is_active());
    }
}
