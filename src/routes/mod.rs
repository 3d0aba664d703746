pub mod health;
pub mod metrics;
pub mod queue;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::app_state::AppState;
use crate::services::queue::QueueError;
use crate::services::store::StoreError;

/// Health, queue and status endpoints. `/metrics` is mounted separately
/// because it carries its own state.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/v2/queue/submit", post(queue::submit_job))
        .route("/api/v2/queue/claim", post(queue::claim_job))
        .route("/api/v2/queue/progress", post(queue::report_progress))
        .route("/api/v2/queue/complete", post(queue::complete_job))
        .route("/api/v2/queue/fail", post(queue::fail_job))
        .route("/api/v2/queue/stats", get(queue::queue_stats))
        .route("/api/v2/queue/cleanup", post(queue::cleanup_stale))
        .route("/api/v2/status/{job_id}", get(queue::job_status))
        .with_state(state)
}

/// Error returned by queue handlers, rendered as `{"error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        Self::Validation(report.to_string())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Queue(QueueError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            Self::Queue(QueueError::Store(err)) => match err {
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::Duplicate(_) | StoreError::NotClaimedBy { .. } => StatusCode::CONFLICT,
                StoreError::Database(sqlx::Error::PoolTimedOut)
                | StoreError::Database(sqlx::Error::PoolClosed) => StatusCode::SERVICE_UNAVAILABLE,
                StoreError::Database(_) | StoreError::Corrupt { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                StoreError::Http(_) | StoreError::Remote { .. } => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: StoreError) -> StatusCode {
        ApiError::from(QueueError::from(err)).status()
    }

    #[test]
    fn store_errors_map_to_http_statuses() {
        assert_eq!(status_of(StoreError::NotFound("j".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(StoreError::Duplicate("j".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(StoreError::NotClaimedBy {
                job_id: "j".into(),
                worker_id: "w".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(StoreError::Database(sqlx::Error::PoolTimedOut)),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(StoreError::Corrupt {
                job_id: "j".into(),
                reason: "bad status".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(StoreError::Remote {
                status: 500,
                message: "boom".into()
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn invalid_requests_are_client_errors() {
        let err = ApiError::from(QueueError::InvalidRequest("worker_id must not be empty".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
    }
}
