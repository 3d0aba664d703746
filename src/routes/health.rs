use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "live" when the queue store answers, "down" otherwise. The supervisor
    /// and remote workers only look at the status code.
    pub gpu: &'static str,
    pub version: &'static str,
    pub store: ComponentHealth,
}

#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    pub latency_ms: Option<u64>,
}

/// GET /api/health: liveness of the compute server and its job store.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();

    let (status_code, gpu, store) = match state.queue.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            "live",
            ComponentHealth {
                status: "ok",
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Job store health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "down",
                ComponentHealth {
                    status: "error",
                    latency_ms: None,
                },
            )
        }
    };

    let response = HealthResponse {
        gpu,
        version: env!("CARGO_PKG_VERSION"),
        store,
    };

    (status_code, Json(response))
}
