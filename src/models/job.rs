use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Priority given to jobs submitted without one. Lower is served first.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Attempt ceiling given to jobs submitted without one.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Worker kind recorded when a claimant does not say what it is.
pub const UNKNOWN_WORKER_TYPE: &str = "unknown";

/// Status of a canvas generation job in the queue.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Claimed,
    Generating,
    Complete,
    /// Transient: always resolved to `Queued` or `Dead` in the same update.
    Failed,
    Dead,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Claimed,
        JobStatus::Generating,
        JobStatus::Complete,
        JobStatus::Failed,
        JobStatus::Dead,
    ];

    /// Statuses in which a worker holds the job.
    pub fn is_claimed(self) -> bool {
        matches!(self, JobStatus::Claimed | JobStatus::Generating)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Dead)
    }
}

/// Rendering path the worker used (or should use) for a job.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GenerationMode {
    /// Keyframe diffusion followed by video diffusion.
    #[default]
    Full,
    /// Pan-and-zoom over a still.
    Fast,
}

/// Immutable input of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobInput {
    /// Local path to the uploaded audio.
    pub input_path: String,
    /// Public URL for remote workers.
    pub input_url: Option<String>,
    pub direction: Option<serde_json::Value>,
    pub emotional_dna: Option<serde_json::Value>,
    pub params: serde_json::Value,
}

/// Who holds a job and since when.
///
/// Kept as one value so the three claim fields can only be set or cleared
/// together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimInfo {
    pub claimed_by: String,
    pub worker_type: String,
    pub claimed_at: DateTime<Utc>,
}

/// Results reported by a worker on success.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Validate)]
pub struct JobOutput {
    #[garde(length(max = 2048))]
    pub output_url: Option<String>,
    #[garde(length(max = 2048))]
    pub output_dir: Option<String>,
    #[garde(range(min = 0.0))]
    pub quality_score: Option<f64>,
    #[garde(range(min = 0.0))]
    pub loop_score: Option<f64>,
}

/// A canvas generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(flatten)]
    pub input: JobInput,

    #[serde(flatten)]
    pub claim: Option<ClaimInfo>,

    pub progress: i32,
    pub message: String,
    pub generation_mode: GenerationMode,

    /// Present only once the job is `complete`.
    #[serde(flatten)]
    pub output: Option<JobOutput>,

    pub attempt: i32,
    pub max_attempts: i32,
    pub error: Option<String>,
    pub priority: i32,
}

/// What a worker receives from a successful claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimedJob {
    pub id: String,
    #[serde(flatten)]
    pub input: JobInput,
    pub priority: i32,
    pub attempt: i32,
    pub max_attempts: i32,
    pub generation_mode: GenerationMode,
}

impl From<&Job> for ClaimedJob {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            input: job.input.clone(),
            priority: job.priority,
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            generation_mode: job.generation_mode,
        }
    }
}

/// Submission of a new job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct NewJob {
    /// Caller-chosen id; a UUID is generated when absent.
    #[garde(length(min = 1, max = 128))]
    pub id: Option<String>,

    #[garde(length(min = 1, max = 2048))]
    pub input_path: String,

    #[garde(length(min = 1, max = 2048))]
    pub input_url: Option<String>,

    #[garde(skip)]
    pub direction: Option<serde_json::Value>,

    #[garde(skip)]
    pub emotional_dna: Option<serde_json::Value>,

    #[garde(skip)]
    pub params: Option<serde_json::Value>,

    #[garde(skip)]
    pub priority: Option<i32>,

    #[garde(range(min = 1, max = 20))]
    pub max_attempts: Option<i32>,

    #[garde(skip)]
    pub generation_mode: Option<GenerationMode>,
}

impl NewJob {
    pub fn new(input_path: impl Into<String>) -> Self {
        Self {
            input_path: input_path.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn resolved_id(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn resolved_params(&self) -> serde_json::Value {
        self.params
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
    }

    pub fn input(&self) -> JobInput {
        JobInput {
            input_path: self.input_path.clone(),
            input_url: self.input_url.clone(),
            direction: self.direction.clone(),
            emotional_dna: self.emotional_dna.clone(),
            params: self.resolved_params(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn status_round_trips_through_strings() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::from_str(status.as_ref()).unwrap(), status);
        }
        assert_eq!(JobStatus::Generating.to_string(), "generating");
    }

    #[test]
    fn claimed_and_terminal_sets() {
        assert!(JobStatus::Claimed.is_claimed());
        assert!(JobStatus::Generating.is_claimed());
        assert!(!JobStatus::Queued.is_claimed());
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Dead.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
    }

    #[test]
    fn new_job_defaults() {
        let job = NewJob::new("/uploads/track.wav");
        assert!(job.validate().is_ok());
        assert_eq!(job.resolved_params(), serde_json::json!({}));
        assert_ne!(job.resolved_id(), job.resolved_id());
        assert_eq!(job.with_id("abc").resolved_id(), "abc");
    }

    #[test]
    fn new_job_rejects_empty_input() {
        assert!(NewJob::new("").validate().is_err());
        assert!(NewJob::new("/a.wav").with_max_attempts(0).validate().is_err());
    }

    #[test]
    fn serialized_job_exposes_claim_fields_flat() {
        let now = Utc::now();
        let job = Job {
            id: "j1".into(),
            status: JobStatus::Claimed,
            created_at: now,
            updated_at: now,
            input: NewJob::new("/a.wav").input(),
            claim: Some(ClaimInfo {
                claimed_by: "colab-001".into(),
                worker_type: "colab".into(),
                claimed_at: now,
            }),
            progress: 0,
            message: String::new(),
            generation_mode: GenerationMode::Full,
            output: None,
            attempt: 1,
            max_attempts: 3,
            error: None,
            priority: 10,
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["claimed_by"], "colab-001");
        assert_eq!(value["worker_type"], "colab");
        assert_eq!(value["status"], "claimed");
        assert_eq!(value["input_path"], "/a.wav");

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back.claim, job.claim);
        assert_eq!(back.input, job.input);
    }
}
