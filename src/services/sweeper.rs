use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::queue::JobQueue;

/// Periodically returns abandoned claims to the queue.
pub struct ReclamationSweeper {
    queue: Arc<JobQueue>,
    interval: Duration,
    timeout: Duration,
}

impl ReclamationSweeper {
    pub fn new(queue: Arc<JobQueue>, interval: Duration, timeout: Duration) -> Self {
        Self {
            queue,
            interval,
            timeout,
        }
    }

    /// Run a single sweep, logging instead of returning errors.
    pub async fn sweep_once(&self) -> u64 {
        match self.queue.cleanup_stale_jobs(self.timeout).await {
            Ok(report) => report.reclaimed(),
            Err(e) => {
                tracing::error!(error = %e, "Reclamation sweep failed, will retry next tick");
                0
            }
        }
    }

    /// Sweep forever on a fixed interval.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            policy = ?self.queue.reclaim_policy(),
            "Reclamation sweeper started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::NewJob;
    use crate::services::clock::ManualClock;
    use crate::services::memory_store::MemoryJobStore;

    #[tokio::test]
    async fn sweep_once_reports_reclaimed_count() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryJobStore::with_clock(clock.clone()));
        let queue = Arc::new(JobQueue::new(store));
        queue.submit(NewJob::new("/a.wav")).await.unwrap();
        queue.claim_next_job("w1", None).await.unwrap().unwrap();

        let sweeper = ReclamationSweeper::new(
            queue.clone(),
            Duration::from_secs(30),
            Duration::from_secs(60),
        );
        assert_eq!(sweeper.sweep_once().await, 0);

        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(sweeper.sweep_once().await, 1);
        assert_eq!(sweeper.sweep_once().await, 0);
    }
}
