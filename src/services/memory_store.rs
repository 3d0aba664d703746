//! In-process job store.
//!
//! One mutex guards the whole table, so picking a candidate and claiming it
//! happen under the same lock and no two claimants can ever see the same
//! queued job. Suitable when the queue does not have to span processes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::job::{
    ClaimInfo, ClaimedJob, GenerationMode, Job, JobOutput, JobStatus, NewJob,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY,
};
use crate::models::outcome::{
    FailOutcome, QueueStats, ReclaimPolicy, ReclaimReport, RECLAIMED_DEAD_MESSAGE,
    RECLAIMED_MESSAGE,
};
use crate::services::clock::{Clock, SystemClock};
use crate::services::store::{JobStore, StoreError};

struct Entry {
    job: Job,
    /// Insertion order, the last tie-break in service order.
    seq: u64,
}

#[derive(Default)]
struct Table {
    jobs: HashMap<String, Entry>,
    next_seq: u64,
}

impl Table {
    /// The job, provided `worker_id` currently holds it.
    fn held_by(&mut self, job_id: &str, worker_id: &str) -> Result<&mut Job, StoreError> {
        let entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        let job = &mut entry.job;
        let owned = job.status.is_claimed()
            && job
                .claim
                .as_ref()
                .is_some_and(|claim| claim.claimed_by == worker_id);
        if !owned {
            return Err(StoreError::NotClaimedBy {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
            });
        }
        Ok(job)
    }
}

pub struct MemoryJobStore {
    table: Mutex<Table>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            clock,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn submit(&self, new_job: NewJob) -> Result<Job, StoreError> {
        let now = self.clock.now();
        let id = new_job.resolved_id();
        let mut table = self.table.lock().await;
        if table.jobs.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }

        let job = Job {
            id: id.clone(),
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            input: new_job.input(),
            claim: None,
            progress: 0,
            message: String::new(),
            generation_mode: new_job.generation_mode.unwrap_or_default(),
            output: None,
            attempt: 0,
            max_attempts: new_job.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
            error: None,
            priority: new_job.priority.unwrap_or(DEFAULT_PRIORITY),
        };

        let seq = table.next_seq;
        table.next_seq += 1;
        table.jobs.insert(
            id,
            Entry {
                job: job.clone(),
                seq,
            },
        );
        Ok(job)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let table = self.table.lock().await;
        Ok(table.jobs.get(job_id).map(|entry| entry.job.clone()))
    }

    async fn claim(
        &self,
        worker_id: &str,
        worker_type: &str,
    ) -> Result<Option<ClaimedJob>, StoreError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;

        let Some(entry) = table
            .jobs
            .values_mut()
            .filter(|entry| entry.job.status == JobStatus::Queued)
            .min_by_key(|entry| (entry.job.priority, entry.job.created_at, entry.seq))
        else {
            return Ok(None);
        };

        let job = &mut entry.job;
        job.status = JobStatus::Claimed;
        job.claim = Some(ClaimInfo {
            claimed_by: worker_id.to_string(),
            worker_type: worker_type.to_string(),
            claimed_at: now,
        });
        job.attempt = (job.attempt + 1).min(job.max_attempts);
        job.updated_at = now;

        Ok(Some(ClaimedJob::from(&*job)))
    }

    async fn update_progress(
        &self,
        job_id: &str,
        worker_id: &str,
        progress: i32,
        message: &str,
        generation_mode: Option<GenerationMode>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let job = table.held_by(job_id, worker_id)?;

        job.status = JobStatus::Generating;
        job.progress = progress.clamp(0, 100);
        job.message = message.to_string();
        if let Some(mode) = generation_mode {
            job.generation_mode = mode;
        }
        job.updated_at = now;
        Ok(())
    }

    async fn complete(
        &self,
        job_id: &str,
        worker_id: &str,
        output: &JobOutput,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let job = table.held_by(job_id, worker_id)?;

        job.status = JobStatus::Complete;
        job.claim = None;
        job.progress = 100;
        job.message = "Generation complete".to_string();
        job.output = Some(output.clone());
        job.updated_at = now;
        Ok(())
    }

    async fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
    ) -> Result<FailOutcome, StoreError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let job = table.held_by(job_id, worker_id)?;

        let outcome = FailOutcome::resolve(job.attempt, job.max_attempts);
        job.status = outcome.status();
        job.claim = None;
        job.error = Some(error.to_string());
        job.message = outcome.message(error);
        job.updated_at = now;
        Ok(outcome)
    }

    async fn reclaim_stale(
        &self,
        timeout: Duration,
        policy: ReclaimPolicy,
    ) -> Result<ReclaimReport, StoreError> {
        let now = self.clock.now();
        let Some(cutoff) = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
        else {
            return Ok(ReclaimReport::default());
        };
        let mut table = self.table.lock().await;
        let mut report = ReclaimReport::default();

        for entry in table.jobs.values_mut() {
            let job = &mut entry.job;
            let stale = job.status.is_claimed()
                && job
                    .claim
                    .as_ref()
                    .is_some_and(|claim| claim.claimed_at < cutoff);
            if !stale {
                continue;
            }

            job.claim = None;
            job.updated_at = now;
            if policy == ReclaimPolicy::DeadLetterExhausted && job.attempt >= job.max_attempts {
                job.status = JobStatus::Dead;
                job.message = RECLAIMED_DEAD_MESSAGE.to_string();
                report.dead_lettered += 1;
            } else {
                job.status = JobStatus::Queued;
                job.message = RECLAIMED_MESSAGE.to_string();
                report.requeued += 1;
            }
        }

        Ok(report)
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let table = self.table.lock().await;
        let mut stats = QueueStats::default();
        let mut quality = Vec::new();
        let mut looping = Vec::new();

        for entry in table.jobs.values() {
            let job = &entry.job;
            stats.add(job.status, 1);
            if job.status != JobStatus::Complete {
                continue;
            }
            if let Some(output) = &job.output {
                quality.extend(output.quality_score);
                looping.extend(output.loop_score);
            }
        }

        stats.avg_quality_score = average(&quality);
        stats.avg_loop_score = average(&looping);
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
