//! HTTP surface of the queue, served over the in-memory store.

use std::sync::Arc;

use canvas_dispatch::{
    app_state::AppState,
    routes,
    services::{memory_store::MemoryJobStore, queue::JobQueue},
};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

struct TestServer {
    base: String,
    http: Client,
}

impl TestServer {
    async fn start() -> Self {
        let queue = Arc::new(JobQueue::new(Arc::new(MemoryJobStore::new())));
        let app = routes::api_router(AppState::new(queue));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            http: Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .http
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self
            .http
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }
}

#[tokio::test]
async fn health_reports_live() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["gpu"], "live");
}

#[tokio::test]
async fn worker_round_trip() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post(
            "/api/v2/queue/submit",
            json!({"id": "job-1", "input_path": "/uploads/song.wav", "params": {"style": "noir"}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], "job-1");
    assert_eq!(body["status"], "queued");
    assert_eq!(body["queue_stats"]["queued"], 1);

    let (status, body) = server
        .post(
            "/api/v2/queue/claim",
            json!({"worker_id": "colab-1", "worker_type": "colab", "gpu": "T4"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["id"], "job-1");
    assert_eq!(body["job"]["input_path"], "/uploads/song.wav");
    assert_eq!(body["job"]["params"]["style"], "noir");
    assert_eq!(body["job"]["attempt"], 1);

    let (status, body) = server
        .post(
            "/api/v2/queue/progress",
            json!({"job_id": "job-1", "worker_id": "colab-1", "progress": 30, "message": "Rendering", "generation_mode": "fast"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = server.get("/api/v2/status/job-1").await;
    assert_eq!(body["status"], "generating");
    assert_eq!(body["claimed_by"], "colab-1");
    assert_eq!(body["generation_mode"], "fast");
    assert_eq!(body["progress"], 30);

    let (status, _) = server
        .post(
            "/api/v2/queue/complete",
            json!({"job_id": "job-1", "worker_id": "colab-1", "output_url": "https://cdn.example/1.mp4", "quality_score": 0.7}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = server.get("/api/v2/status/job-1").await;
    assert_eq!(body["status"], "complete");
    assert_eq!(body["output_url"], "https://cdn.example/1.mp4");
    assert!(body.get("claimed_by").is_none());

    let (_, stats) = server.get("/api/v2/queue/stats").await;
    assert_eq!(stats["complete"], 1);
    assert_eq!(stats["avg_quality_score"], 0.7);
}

#[tokio::test]
async fn empty_queue_claim_returns_null_job() {
    let server = TestServer::start().await;
    let (status, body) = server
        .post("/api/v2/queue/claim", json!({"worker_id": "w1"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["job"].is_null());
    assert_eq!(body["message"], "No jobs available");
}

#[tokio::test]
async fn fail_reports_where_the_job_went() {
    let server = TestServer::start().await;
    server
        .post(
            "/api/v2/queue/submit",
            json!({"id": "j", "input_path": "/in.wav", "max_attempts": 1}),
        )
        .await;
    server
        .post("/api/v2/queue/claim", json!({"worker_id": "w1"}))
        .await;

    let (status, body) = server
        .post(
            "/api/v2/queue/fail",
            json!({"job_id": "j", "worker_id": "w1", "error": "OOM"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "dead");
    assert_eq!(body["attempt"], 1);
}

#[tokio::test]
async fn errors_map_to_status_codes() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post("/api/v2/queue/claim", json!({"worker_id": ""}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = server.get("/api/v2/status/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    server
        .post("/api/v2/queue/submit", json!({"id": "j", "input_path": "/in.wav"}))
        .await;
    let (status, _) = server
        .post("/api/v2/queue/submit", json!({"id": "j", "input_path": "/in.wav"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    server
        .post("/api/v2/queue/claim", json!({"worker_id": "w1"}))
        .await;
    let (status, _) = server
        .post(
            "/api/v2/queue/progress",
            json!({"job_id": "j", "worker_id": "w2", "progress": 10}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = server
        .post(
            "/api/v2/queue/progress",
            json!({"job_id": "j", "worker_id": "w1", "progress": 150}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cleanup_without_body_uses_default_timeout() {
    let server = TestServer::start().await;
    let resp = server
        .http
        .post(format!("{}/api/v2/queue/cleanup", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reclaimed"], 0);
    assert_eq!(body["requeued"], 0);
}
