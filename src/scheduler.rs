//! Cancellable periodic worker for the pull job.
//!
//! [`PullScheduler`] owns at most one background tokio task bound to a
//! [`CancellationToken`]. The worker runs the job once immediately, then
//! waits the configured interval measured from the *end* of the previous run
//! (a drifting schedule), so two cycles can never overlap and an overrunning
//! cycle is never queued behind itself.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs one job at a fixed period until stopped.
pub struct PullScheduler {
    worker: Option<(CancellationToken, JoinHandle<()>)>,
}

impl PullScheduler {
    /// Create a scheduler with no running worker.
    pub fn new() -> Self {
        Self { worker: None }
    }

    /// Whether a worker is currently scheduled.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start running `job` now and then every `interval`.
    ///
    /// Any previous worker is stopped first, so calling `start` again is the
    /// reconfiguration path and can never double-schedule.
    pub async fn start<F, Fut>(&mut self, interval: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.stop().await;

        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            info!("pull worker started, interval {interval:?}");
            loop {
                job().await;
                tokio::select! {
                    _ = worker_cancel.cancelled() => {
                        info!("pull worker stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        self.worker = Some((cancel, handle));
    }

    /// Signal termination and wait for the in-flight run (if any) to finish.
    ///
    /// No-op when nothing is running.
    pub async fn stop(&mut self) {
        let Some((cancel, handle)) = self.worker.take() else {
            return;
        };

        cancel.cancel();
        if let Err(e) = handle.await {
            warn!("pull worker did not shut down cleanly: {e}");
        }
    }
}

impl Default for PullScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn first_run_is_immediate() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let mut scheduler = PullScheduler::new();
        scheduler
            .start(Duration::from_secs(3600), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn repeats_at_interval_until_stopped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let mut scheduler = PullScheduler::new();
        scheduler
            .start(Duration::from_millis(10), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        let after_stop = runs.load(Ordering::SeqCst);
        assert!(after_stop >= 3, "expected several runs, got {after_stop}");

        // No further runs after stop returns.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn runs_never_overlap() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let in_flight_job = Arc::clone(&in_flight);
        let max_seen_job = Arc::clone(&max_seen);

        let mut scheduler = PullScheduler::new();
        // Job takes longer than the interval; the drifting schedule must
        // still run it strictly sequentially.
        scheduler
            .start(Duration::from_millis(5), move || {
                let in_flight = Arc::clone(&in_flight_job);
                let max_seen = Arc::clone(&max_seen_job);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.stop().await;

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_run() {
        let finished = Arc::new(AtomicUsize::new(0));
        let finished_job = Arc::clone(&finished);

        let mut scheduler = PullScheduler::new();
        scheduler
            .start(Duration::from_secs(3600), move || {
                let finished = Arc::clone(&finished_job);
                async move {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        // Stop while the first run is still sleeping.
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.stop().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut scheduler = PullScheduler::new();
        scheduler.stop().await;
        scheduler
            .start(Duration::from_secs(3600), || async {})
            .await;
        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn restart_applies_new_interval() {
        let slow_runs = Arc::new(AtomicUsize::new(0));
        let fast_runs = Arc::new(AtomicUsize::new(0));

        let mut scheduler = PullScheduler::new();
        let slow_counter = Arc::clone(&slow_runs);
        scheduler
            .start(Duration::from_secs(3600), move || {
                let counter = Arc::clone(&slow_counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        // Reconfigure without an explicit stop; the old worker must die.
        let fast_counter = Arc::clone(&fast_runs);
        scheduler
            .start(Duration::from_millis(10), move || {
                let counter = Arc::clone(&fast_counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;

        assert_eq!(slow_runs.load(Ordering::SeqCst), 1, "old worker ran only its immediate tick");
        assert!(fast_runs.load(Ordering::SeqCst) >= 3);
    }
}
