use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use super::queries;
use crate::models::job::{ClaimedJob, GenerationMode, Job, JobOutput, NewJob};
use crate::models::outcome::{FailOutcome, QueueStats, ReclaimPolicy, ReclaimReport};
use crate::services::store::{JobStore, StoreError};

/// Job store shared by every worker that can reach the database.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn submit(&self, job: NewJob) -> Result<Job, StoreError> {
        queries::create_job(&self.pool, &job).await
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        queries::get_job(&self.pool, job_id).await
    }

    async fn claim(
        &self,
        worker_id: &str,
        worker_type: &str,
    ) -> Result<Option<ClaimedJob>, StoreError> {
        queries::claim_next_job(&self.pool, worker_id, worker_type).await
    }

    async fn update_progress(
        &self,
        job_id: &str,
        worker_id: &str,
        progress: i32,
        message: &str,
        generation_mode: Option<GenerationMode>,
    ) -> Result<(), StoreError> {
        queries::update_progress(&self.pool, job_id, worker_id, progress, message, generation_mode)
            .await
    }

    async fn complete(
        &self,
        job_id: &str,
        worker_id: &str,
        output: &JobOutput,
    ) -> Result<(), StoreError> {
        queries::complete_job(&self.pool, job_id, worker_id, output).await
    }

    async fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
    ) -> Result<FailOutcome, StoreError> {
        queries::fail_job(&self.pool, job_id, worker_id, error).await
    }

    async fn reclaim_stale(
        &self,
        timeout: Duration,
        policy: ReclaimPolicy,
    ) -> Result<ReclaimReport, StoreError> {
        queries::reclaim_stale_jobs(
            &self.pool,
            timeout.as_secs_f64(),
            policy == ReclaimPolicy::DeadLetterExhausted,
        )
        .await
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        queries::queue_stats(&self.pool).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
