use std::sync::Arc;
use std::time::Duration;

use crate::models::job::{ClaimedJob, GenerationMode, Job, JobOutput, NewJob, UNKNOWN_WORKER_TYPE};
use crate::models::outcome::{FailOutcome, QueueStats, ReclaimPolicy, ReclaimReport};
use crate::services::store::{JobStore, StoreError};

/// Claims older than this are presumed abandoned.
pub const DEFAULT_RECLAIM_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Generation job queue shared by the API server, workers and the sweeper.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    reclaim_policy: ReclaimPolicy,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            reclaim_policy: ReclaimPolicy::default(),
        }
    }

    pub fn with_reclaim_policy(mut self, policy: ReclaimPolicy) -> Self {
        self.reclaim_policy = policy;
        self
    }

    pub fn reclaim_policy(&self) -> ReclaimPolicy {
        self.reclaim_policy
    }

    /// Submit a new generation job.
    pub async fn submit(&self, job: NewJob) -> Result<Job, QueueError> {
        let job = self.store.submit(job).await?;
        metrics::counter!("canvas_jobs_submitted_total").increment(1);
        tracing::info!(job_id = %job.id, priority = job.priority, "Job submitted");
        Ok(job)
    }

    /// Hand the next eligible job to a worker.
    ///
    /// An empty queue is `Ok(None)`, not an error.
    pub async fn claim_next_job(
        &self,
        worker_id: &str,
        worker_type: Option<&str>,
    ) -> Result<Option<ClaimedJob>, QueueError> {
        let worker_id = normalize_worker_id(worker_id)?;
        let worker_type = worker_type
            .map(str::trim)
            .filter(|kind| !kind.is_empty())
            .unwrap_or(UNKNOWN_WORKER_TYPE);

        let claimed = self.store.claim(worker_id, worker_type).await?;
        match &claimed {
            Some(job) => {
                metrics::counter!("canvas_jobs_claimed_total").increment(1);
                tracing::info!(
                    job_id = %job.id,
                    worker_id,
                    worker_type,
                    attempt = job.attempt,
                    priority = job.priority,
                    "Job claimed"
                );
            }
            None => tracing::trace!(worker_id, "No jobs available"),
        }
        Ok(claimed)
    }

    /// Progress report from the worker holding the job.
    pub async fn record_progress(
        &self,
        job_id: &str,
        worker_id: &str,
        progress: i32,
        message: &str,
        generation_mode: Option<GenerationMode>,
    ) -> Result<(), QueueError> {
        let worker_id = normalize_worker_id(worker_id)?;
        self.store
            .update_progress(job_id, worker_id, progress, message, generation_mode)
            .await?;
        tracing::debug!(job_id, worker_id, progress, status_message = message, "Job progress");
        Ok(())
    }

    /// Success report from the worker holding the job.
    pub async fn record_success(
        &self,
        job_id: &str,
        worker_id: &str,
        output: &JobOutput,
    ) -> Result<(), QueueError> {
        let worker_id = normalize_worker_id(worker_id)?;
        self.store.complete(job_id, worker_id, output).await?;
        metrics::counter!("canvas_jobs_completed_total").increment(1);
        tracing::info!(
            job_id,
            worker_id,
            quality_score = ?output.quality_score,
            loop_score = ?output.loop_score,
            "Job completed"
        );
        Ok(())
    }

    /// Failure report from the worker holding the job.
    pub async fn record_failure(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
    ) -> Result<FailOutcome, QueueError> {
        let worker_id = normalize_worker_id(worker_id)?;
        let outcome = self.store.fail(job_id, worker_id, error).await?;
        metrics::counter!("canvas_jobs_failed_total").increment(1);
        match outcome {
            FailOutcome::Requeued {
                attempt,
                max_attempts,
            } => {
                tracing::warn!(job_id, worker_id, attempt, max_attempts, error, "Job failed, re-queued for retry");
            }
            FailOutcome::DeadLettered { attempt } => {
                metrics::counter!("canvas_jobs_dead_total").increment(1);
                tracing::error!(job_id, worker_id, attempt, error, "Job failed after max attempts");
            }
        }
        Ok(outcome)
    }

    /// Return abandoned claims to the queue.
    pub async fn cleanup_stale_jobs(&self, timeout: Duration) -> Result<ReclaimReport, QueueError> {
        let report = self.store.reclaim_stale(timeout, self.reclaim_policy).await?;
        if report.reclaimed() > 0 {
            metrics::counter!("canvas_jobs_reclaimed_total").increment(report.reclaimed());
            metrics::counter!("canvas_jobs_dead_total").increment(report.dead_lettered);
            tracing::warn!(
                requeued = report.requeued,
                dead_lettered = report.dead_lettered,
                timeout_secs = timeout.as_secs(),
                "Reclaimed stale jobs"
            );
        }
        Ok(report)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, QueueError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::Store(StoreError::NotFound(job_id.to_string())))
    }

    /// Counts per status, also published as gauges.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let stats = self.store.stats().await?;
        metrics::gauge!("canvas_queue_depth").set(stats.queued as f64);
        metrics::gauge!("canvas_jobs_in_flight").set(stats.in_flight() as f64);
        Ok(stats)
    }

    /// Check store connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        self.store.ping().await?;
        Ok(())
    }
}

/// Worker ids are compared exactly against `claimed_by`, so every write
/// trims them the same way the claim does.
fn normalize_worker_id(worker_id: &str) -> Result<&str, QueueError> {
    let worker_id = worker_id.trim();
    if worker_id.is_empty() {
        return Err(QueueError::InvalidRequest(
            "worker_id must not be empty".to_string(),
        ));
    }
    Ok(worker_id)
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
