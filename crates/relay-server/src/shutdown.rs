//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time to wait for the server task before giving up.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Signals the listener and the dispatcher to stop.
///
/// Connection loops are not cancelled; they end when their transport does.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Cancel the token and wait up to `timeout` for `handle` to finish.
    ///
    /// Returns `false` if the task was still running when the timeout hit.
    pub async fn graceful_shutdown(&self, handle: JoinHandle<()>, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(timeout_secs = timeout.as_secs(), "waiting for server to stop");

        if tokio::time::timeout(timeout, handle).await.is_ok() {
            true
        } else {
            warn!("shutdown timed out after {timeout:?}");
            false
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
