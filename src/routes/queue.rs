use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::job::{Job, NewJob};
use crate::models::outcome::QueueStats;
use crate::models::queue::{
    AckResponse, CleanupRequest, CleanupResponse, ClaimRequest, ClaimResponse, CompleteRequest,
    FailRequest, FailResponse, ProgressRequest, SubmitResponse,
};
use crate::services::queue::DEFAULT_RECLAIM_TIMEOUT;

use super::ApiError;

/// POST /api/v2/queue/submit: enqueue a generation job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<NewJob>,
) -> Result<Json<SubmitResponse>, ApiError> {
    req.validate()?;
    let job = state.queue.submit(req).await?;
    let queue_stats = state.queue.stats().await?;

    Ok(Json(SubmitResponse {
        success: true,
        job_id: job.id,
        status: job.status,
        queue_stats,
    }))
}

/// POST /api/v2/queue/claim: hand the next job to a polling worker.
pub async fn claim_job(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, ApiError> {
    req.validate()?;
    if let Some(gpu) = &req.gpu {
        tracing::debug!(worker_id = %req.worker_id, gpu = %gpu, "Claim request");
    }

    let job = state
        .queue
        .claim_next_job(&req.worker_id, req.worker_type.as_deref())
        .await?;
    let message = job.is_none().then(|| "No jobs available".to_string());

    Ok(Json(ClaimResponse { job, message }))
}

/// POST /api/v2/queue/progress
pub async fn report_progress(
    State(state): State<AppState>,
    Json(req): Json<ProgressRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    req.validate()?;
    state
        .queue
        .record_progress(
            &req.job_id,
            &req.worker_id,
            req.progress,
            &req.message,
            req.generation_mode,
        )
        .await?;
    Ok(Json(AckResponse { success: true }))
}

/// POST /api/v2/queue/complete
pub async fn complete_job(
    State(state): State<AppState>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    req.validate()?;
    state
        .queue
        .record_success(&req.job_id, &req.worker_id, &req.output)
        .await?;
    Ok(Json(AckResponse { success: true }))
}

/// POST /api/v2/queue/fail: record a failure; the job is re-queued or
/// dead-lettered depending on its attempts.
pub async fn fail_job(
    State(state): State<AppState>,
    Json(req): Json<FailRequest>,
) -> Result<Json<FailResponse>, ApiError> {
    req.validate()?;
    let error = req.error.as_deref().unwrap_or("Unknown error");
    let outcome = state
        .queue
        .record_failure(&req.job_id, &req.worker_id, error)
        .await?;

    Ok(Json(FailResponse {
        success: true,
        outcome,
    }))
}

/// GET /api/v2/queue/stats
pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.queue.stats().await?))
}

/// POST /api/v2/queue/cleanup: run a reclamation sweep now.
pub async fn cleanup_stale(
    State(state): State<AppState>,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;
    let timeout = req
        .timeout_minutes
        .map(|mins| Duration::from_secs(mins.saturating_mul(60)))
        .unwrap_or(DEFAULT_RECLAIM_TIMEOUT);

    let report = state.queue.cleanup_stale_jobs(timeout).await?;
    Ok(Json(CleanupResponse {
        reclaimed: report.reclaimed(),
        report,
    }))
}

/// GET /api/v2/status/{job_id}: full job record.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.queue.get_job(&job_id).await?))
}
