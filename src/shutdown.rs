use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Drain window applied to every task after the root token is cancelled
/// (spec.md §9: "bounded 1-second drain on shutdown").
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Waits for Ctrl+C (or the token being cancelled by some other path, e.g.
/// a fatal startup error) and cancels the shared root token exactly once.
pub async fn wait_for_shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = ?e, "failed to install ctrl+c handler");
            }
            info!("ctrl+c received, shutting down");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}

/// Joins every spawned task, giving each at most `DRAIN_TIMEOUT` to finish
/// once cancellation has propagated. A task that doesn't finish in time is
/// abandoned, not aborted — it will be dropped along with the process.
pub async fn drain(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
            tracing::warn!("task did not finish within the drain window");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelling_token_directly_unblocks_wait() {
        let cancel = CancellationToken::new();
        let waiter = cancel.clone();
        cancel.cancel();
        tokio::time::timeout(Duration::from_millis(100), wait_for_shutdown_signal(waiter))
            .await
            .expect("wait_for_shutdown_signal should return once the token is already cancelled");
    }

    #[tokio::test]
    async fn drain_waits_for_fast_tasks() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
        });
        drain(vec![handle]).await;
    }

    #[tokio::test]
    async fn drain_does_not_hang_on_slow_tasks() {
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let start = std::time::Instant::now();
        drain(vec![handle]).await;
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
