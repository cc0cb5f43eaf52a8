//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::timer::DelayScheduler;

/// Default upper bound on shutdown draining.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates shutdown of the listener, the sweeper, and pending relay jobs.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the given drain timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// Get a clone of the cancellation token.
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

    /// Cancel the token, wait for `tasks`, then let pending relay jobs finish.
    ///
    /// The whole sequence is bounded by the coordinator's timeout. Returns
    /// `true` if everything finished in time.
    pub async fn graceful_shutdown(&self, tasks: Vec<JoinHandle<()>>, jobs: &DelayScheduler) -> bool {
        let deadline = Instant::now() + self.timeout;
        self.shutdown();
        info!(
            task_count = tasks.len(),
            pending_jobs = jobs.pending(),
            timeout_secs = self.timeout.as_secs(),
            "draining before exit"
        );

        let tasks_done = tokio::time::timeout_at(deadline, futures::future::join_all(tasks))
            .await
            .is_ok();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let jobs_done = jobs.drain(remaining).await;

        if !(tasks_done && jobs_done) {
            warn!(
                pending_jobs = jobs.pending(),
                "shutdown timed out after {:?}, abandoning remaining work", self.timeout
            );
        }
        tasks_done && jobs_done
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}
