//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default time to wait for connection tasks before giving up.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Signals every gateway task to stop and waits for tracked tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, close `tracker` to new tasks, and wait up to
    /// `timeout` for its tasks to finish. Returns `false` on timeout.
    pub async fn graceful_shutdown(&self, tracker: &TaskTracker, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = tracker.close();
        info!(
            task_count = tracker.len(),
            timeout_ms = timeout.as_millis(),
            "waiting for connection tasks to complete"
        );

        if tokio::time::timeout(timeout, tracker.wait()).await.is_err() {
            warn!(remaining = tracker.len(), "shutdown timed out after {timeout:?}");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        assert!(!ShutdownCoordinator::new().is_shutting_down());
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let tracker = TaskTracker::new();
        let token = coord.token();
        let _ = tracker.spawn(async move { token.cancelled().await });

        assert!(coord.graceful_shutdown(&tracker, None).await);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let tracker = TaskTracker::new();
        let _ = tracker.spawn(tokio::time::sleep(Duration::from_secs(300)));

        let drained = coord
            .graceful_shutdown(&tracker, Some(Duration::from_millis(50)))
            .await;
        assert!(!drained);
        assert_eq!(tracker.len(), 1);
    }
}
