//! Storage seam for the job queue.
//!
//! Every operation is a single all-or-nothing step against the backing
//! store; none of them is held open across a worker's generation run.

use std::time::Duration;

use async_trait::async_trait;

use crate::models::job::{ClaimedJob, GenerationMode, Job, JobOutput, NewJob};
use crate::models::outcome::{FailOutcome, QueueStats, ReclaimPolicy, ReclaimReport};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `queued`.
    async fn submit(&self, job: NewJob) -> Result<Job, StoreError>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Move the best queued job to `claimed` for `worker_id`.
    ///
    /// Best is the smallest `(priority, created_at)`, insertion order
    /// breaking ties. Returns `None` when nothing is queued. Concurrent
    /// callers never receive the same job and never wait on each other's
    /// candidate.
    async fn claim(
        &self,
        worker_id: &str,
        worker_type: &str,
    ) -> Result<Option<ClaimedJob>, StoreError>;

    /// Record progress on a job held by `worker_id`, moving it to
    /// `generating`.
    async fn update_progress(
        &self,
        job_id: &str,
        worker_id: &str,
        progress: i32,
        message: &str,
        generation_mode: Option<GenerationMode>,
    ) -> Result<(), StoreError>;

    /// Mark a job held by `worker_id` as `complete`.
    async fn complete(
        &self,
        job_id: &str,
        worker_id: &str,
        output: &JobOutput,
    ) -> Result<(), StoreError>;

    /// Record a failure on a job held by `worker_id` and resolve it to
    /// `queued` or `dead`.
    async fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
    ) -> Result<FailOutcome, StoreError>;

    /// Release every claim older than `timeout`.
    async fn reclaim_stale(
        &self,
        timeout: Duration,
        policy: ReclaimPolicy,
    ) -> Result<ReclaimReport, StoreError>;

    async fn stats(&self) -> Result<QueueStats, StoreError>;

    /// Cheap liveness check of the backing store.
    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} already exists")]
    Duplicate(String),

    #[error("Job {job_id} is not claimed by worker {worker_id}")]
    NotClaimedBy { job_id: String, worker_id: String },

    #[error("Corrupt job row {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },

    #[error("Queue server unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Queue server answered {status}: {message}")]
    Remote { status: u16, message: String },
}
