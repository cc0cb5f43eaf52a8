//! Delayed job scheduling.
//!
//! Every job runs as its own tokio task, tracked so shutdown can wait for
//! in-flight work. Delays use `tokio::time`, so paused-clock tests can
//! advance through them.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Handle to one scheduled job.
#[derive(Clone, Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    deadline: Instant,
}

impl ScheduledTask {
    /// Prevent the job from running if its delay has not elapsed.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// When the job becomes due.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Spawns tracked immediate and delayed jobs.
#[derive(Clone, Debug, Default)]
pub struct DelayScheduler {
    tracker: TaskTracker,
}

impl DelayScheduler {
    /// Create a scheduler with no jobs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` now as a tracked task.
    pub fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _ = self.tracker.spawn(job);
    }

    /// Run `job` after `delay` unless cancelled first.
    pub fn schedule<F>(&self, delay: Duration, job: F) -> ScheduledTask
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let deadline = Instant::now() + delay;
        let task = ScheduledTask {
            token: token.clone(),
            deadline,
        };
        let _ = self.tracker.spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    debug!("scheduled job cancelled before its deadline");
                }
                () = tokio::time::sleep_until(deadline) => job.await,
            }
        });
        task
    }

    /// Jobs spawned and not yet finished.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `timeout` for every job to finish.
    ///
    /// Returns `true` if all jobs finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let _ = self.tracker.close();
        let finished = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        let _ = self.tracker.reopen();
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn job_runs_after_delay() {
        let scheduler = DelayScheduler::new();
        let runs = counter();
        let r = Arc::clone(&runs);
        let _task = scheduler.schedule(Duration::from_secs(1), async move {
            let _ = r.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_job_never_runs() {
        let scheduler = DelayScheduler::new();
        let runs = counter();
        let r = Arc::clone(&runs);
        let task = scheduler.schedule(Duration::from_secs(1), async move {
            let _ = r.fetch_add(1, Ordering::SeqCst);
        });
        task.cancel();
        assert!(task.is_cancelled());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_reflects_delay() {
        let scheduler = DelayScheduler::new();
        let start = Instant::now();
        let task = scheduler.schedule(Duration::from_millis(1500), async {});
        assert_eq!(task.deadline() - start, Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_pending_jobs() {
        let scheduler = DelayScheduler::new();
        let runs = counter();
        for _ in 0..3 {
            let r = Arc::clone(&runs);
            let _ = scheduler.schedule(Duration::from_secs(2), async move {
                let _ = r.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(scheduler.pending(), 3);
        assert!(scheduler.drain(Duration::from_secs(10)).await);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_times_out_on_slow_jobs() {
        let scheduler = DelayScheduler::new();
        let _ = scheduler.schedule(Duration::from_secs(300), async {});
        assert!(!scheduler.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn spawn_runs_immediately() {
        let scheduler = DelayScheduler::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        scheduler.spawn(async move {
            let _ = tx.send(7);
        });
        assert_eq!(rx.await.unwrap(), 7);
    }
}
