use garde::Validate;
use serde::{Deserialize, Serialize};

use super::job::{ClaimedJob, GenerationMode, JobOutput, JobStatus};
use super::outcome::{FailOutcome, QueueStats, ReclaimReport};

/// Worker asks for the next job.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ClaimRequest {
    #[garde(length(min = 1, max = 128))]
    pub worker_id: String,

    #[garde(length(min = 1, max = 64))]
    pub worker_type: Option<String>,

    /// GPU model reported by the worker, logged only.
    #[garde(skip)]
    pub gpu: Option<String>,
}

/// Response to a claim. `job` is null when the queue has nothing eligible.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub job: Option<ClaimedJob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Progress report from the worker holding a job.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ProgressRequest {
    #[garde(length(min = 1, max = 128))]
    pub job_id: String,

    #[garde(length(min = 1, max = 128))]
    pub worker_id: String,

    #[garde(range(min = 0, max = 100))]
    pub progress: i32,

    #[garde(length(max = 1000))]
    #[serde(default)]
    pub message: String,

    #[garde(skip)]
    pub generation_mode: Option<GenerationMode>,
}

/// Success report from the worker holding a job.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CompleteRequest {
    #[garde(length(min = 1, max = 128))]
    pub job_id: String,

    #[garde(length(min = 1, max = 128))]
    pub worker_id: String,

    #[garde(dive)]
    #[serde(flatten)]
    pub output: JobOutput,
}

/// Failure report from the worker holding a job.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct FailRequest {
    #[garde(length(min = 1, max = 128))]
    pub job_id: String,

    #[garde(length(min = 1, max = 128))]
    pub worker_id: String,

    #[garde(length(max = 4000))]
    pub error: Option<String>,
}

/// Response to a failure report: where the job ended up, as `status`,
/// `attempt` and (when requeued) `max_attempts`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FailResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: FailOutcome,
}

/// Manual sweep request.
#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct CleanupRequest {
    #[garde(range(min = 1, max = 10_080))]
    pub timeout_minutes: Option<u64>,
}

/// Response to a manual sweep.
#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub reclaimed: u64,
    #[serde(flatten)]
    pub report: ReclaimReport,
}

/// Response after submitting a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub job_id: String,
    pub status: JobStatus,
    pub queue_stats: QueueStats,
}

/// Generic acknowledgement.
#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_request_requires_worker_id() {
        let req: ClaimRequest = serde_json::from_str(r#"{"worker_id": ""}"#).unwrap();
        assert!(req.validate().is_err());

        let req: ClaimRequest =
            serde_json::from_str(r#"{"worker_id": "colab-001", "worker_type": "colab", "gpu": "T4"}"#)
                .unwrap();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn progress_must_be_a_percentage() {
        let req: ProgressRequest = serde_json::from_str(
            r#"{"job_id": "j1", "worker_id": "w1", "progress": 140}"#,
        )
        .unwrap();
        assert!(req.validate().is_err());
        assert!(req.message.is_empty());
    }

    #[test]
    fn complete_request_reads_flat_output_fields() {
        let req: CompleteRequest = serde_json::from_str(
            r#"{"job_id": "j1", "worker_id": "w1", "output_dir": "/out/j1", "quality_score": 9.5, "loop_score": 0.95}"#,
        )
        .unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.output.output_dir.as_deref(), Some("/out/j1"));
        assert_eq!(req.output.loop_score, Some(0.95));
        assert!(req.output.output_url.is_none());
    }

    #[test]
    fn fail_response_keeps_flat_status_fields() {
        let resp = FailResponse {
            success: true,
            outcome: FailOutcome::resolve(2, 3),
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["status"], "queued");
        assert_eq!(value["attempt"], 2);
        assert_eq!(value["max_attempts"], 3);

        let back: FailResponse = serde_json::from_value(value).unwrap();
        assert_eq!(back.outcome.status(), JobStatus::Queued);
    }
}
