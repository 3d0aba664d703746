use serde::{Deserialize, Serialize};

use super::job::JobStatus;

/// How a reported failure was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FailOutcome {
    /// Attempts remain; the job is eligible for `claim` again.
    #[serde(rename = "queued")]
    Requeued { attempt: i32, max_attempts: i32 },
    /// Retry budget exhausted.
    #[serde(rename = "dead")]
    DeadLettered { attempt: i32 },
}

impl FailOutcome {
    /// Resolve a failure on the given attempt against the ceiling.
    pub fn resolve(attempt: i32, max_attempts: i32) -> Self {
        if attempt >= max_attempts {
            FailOutcome::DeadLettered { attempt }
        } else {
            FailOutcome::Requeued {
                attempt,
                max_attempts,
            }
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            FailOutcome::Requeued { .. } => JobStatus::Queued,
            FailOutcome::DeadLettered { .. } => JobStatus::Dead,
        }
    }

    pub fn attempt(&self) -> i32 {
        match self {
            FailOutcome::Requeued { attempt, .. } | FailOutcome::DeadLettered { attempt } => {
                *attempt
            }
        }
    }

    /// Message stored on the job alongside the error.
    pub fn message(&self, error: &str) -> String {
        match self {
            FailOutcome::Requeued {
                attempt,
                max_attempts,
            } => format!("Retry {attempt}/{max_attempts}: {error}"),
            FailOutcome::DeadLettered { attempt } => {
                format!("Failed after {attempt} attempts: {error}")
            }
        }
    }
}

/// What the sweeper does with a stale claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPolicy {
    /// Always put the job back in the queue. Stalls never count against the
    /// attempt ceiling.
    #[default]
    Requeue,
    /// Requeue, unless the job has already used its last attempt, in which
    /// case it is dead-lettered.
    DeadLetterExhausted,
}

/// Message stored on jobs returned to the queue by a sweep.
pub const RECLAIMED_MESSAGE: &str = "Re-queued: worker timed out";

/// Message stored on jobs dead-lettered by a sweep.
pub const RECLAIMED_DEAD_MESSAGE: &str = "Dead: worker timed out on final attempt";

/// Result of one reclamation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimReport {
    pub requeued: u64,
    pub dead_lettered: u64,
}

impl ReclaimReport {
    /// Number of stale claims released by the sweep.
    pub fn reclaimed(&self) -> u64 {
        self.requeued + self.dead_lettered
    }
}

/// Aggregate view of the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: i64,
    pub queued: i64,
    pub claimed: i64,
    pub generating: i64,
    pub complete: i64,
    pub failed: i64,
    pub dead: i64,
    pub avg_quality_score: Option<f64>,
    pub avg_loop_score: Option<f64>,
}

impl QueueStats {
    pub fn add(&mut self, status: JobStatus, count: i64) {
        self.total += count;
        let slot = match status {
            JobStatus::Queued => &mut self.queued,
            JobStatus::Claimed => &mut self.claimed,
            JobStatus::Generating => &mut self.generating,
            JobStatus::Complete => &mut self.complete,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Dead => &mut self.dead,
        };
        *slot += count;
    }

    /// Jobs currently held by workers.
    pub fn in_flight(&self) -> i64 {
        self.claimed + self.generating
    }
}
