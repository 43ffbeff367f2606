//! Monotonic-clock timing helpers for the recipe executor and valve
//! auto-close scheduling. Step and purge durations are minimums: a sleep
//! never returns before `duration`, but may run long under cancellation
//! or scheduling latency — no attempt is made to correct for drift.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Sleeps for at least `duration`, unless `cancel` fires first.
///
/// Returns `true` if the sleep ran to completion, `false` if interrupted by
/// cancellation. Used by the recipe executor so `stop_recipe` can cut a
/// step's sleep short instead of waiting it out.
pub async fn cancellable_sleep(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return false;
    }
    let deadline = Instant::now() + duration;
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => true,
        _ = cancel.changed() => false,
    }
}

/// A handle that can be dropped or explicitly aborted to cancel a
/// previously spawned deferred task (valve auto-close, purge release).
pub struct DeferredHandle {
    abort: tokio::task::AbortHandle,
}

impl DeferredHandle {
    pub fn abort(&self) {
        self.abort.abort();
    }
}

/// Spawns `action` to run after `delay`, returning a handle that cancels it
/// if dropped-and-aborted by the caller (e.g. on process shutdown).
pub fn spawn_after<F>(delay: Duration, action: F) -> DeferredHandle
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let join = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        action.await;
    });
    DeferredHandle { abort: join.abort_handle() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_completes_when_not_cancelled() {
        let (_tx, mut rx) = watch::channel(false);
        let start = Instant::now();
        let completed = cancellable_sleep(Duration::from_millis(20), &mut rx).await;
        assert!(completed);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn sleep_is_interrupted_by_cancellation() {
        let (tx, mut rx) = watch::channel(false);
        let sleeper = tokio::spawn(async move {
            cancellable_sleep(Duration::from_secs(5), &mut rx).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        let completed = sleeper.await.unwrap();
        assert!(!completed);
    }
}
