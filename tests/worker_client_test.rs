//! A worker-side queue that talks to a queue server over HTTP.

use std::sync::Arc;
use std::time::Duration;

use canvas_dispatch::{
    app_state::AppState,
    models::job::{JobOutput, JobStatus, NewJob},
    models::outcome::FailOutcome,
    routes,
    services::{
        http_store::HttpJobStore,
        memory_store::MemoryJobStore,
        queue::{JobQueue, QueueError},
        store::StoreError,
    },
};

/// Server-side queue plus a remote queue pointed at it.
async fn remote_pair() -> (Arc<JobQueue>, JobQueue) {
    let server_queue = Arc::new(JobQueue::new(Arc::new(MemoryJobStore::new())));
    let app = routes::api_router(AppState::new(server_queue.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let store = HttpJobStore::new(&format!("http://{addr}"))
        .unwrap()
        .with_gpu(Some("T4".to_string()));
    (server_queue, JobQueue::new(Arc::new(store)))
}

#[tokio::test]
async fn remote_worker_claims_reports_and_completes() {
    let (server, remote) = remote_pair().await;
    server
        .submit(NewJob::new("/uploads/song.wav").with_id("job-1"))
        .await
        .unwrap();

    let job = remote
        .claim_next_job("colab-1 ", Some("colab"))
        .await
        .unwrap()
        .expect("a queued job");
    assert_eq!(job.id, "job-1");
    assert_eq!(job.input.input_path, "/uploads/song.wav");

    remote
        .record_progress("job-1", "colab-1", 40, "Generating keyframes", None)
        .await
        .unwrap();
    let seen = server.get_job("job-1").await.unwrap();
    assert_eq!(seen.status, JobStatus::Generating);
    assert_eq!(seen.progress, 40);
    assert_eq!(seen.claim.unwrap().claimed_by, "colab-1");

    let output = JobOutput {
        output_url: Some("https://cdn/job-1.mp4".to_string()),
        quality_score: Some(8.5),
        ..Default::default()
    };
    remote.record_success("job-1", "colab-1", &output).await.unwrap();

    let done = remote.get_job("job-1").await.unwrap();
    assert_eq!(done.status, JobStatus::Complete);
    assert_eq!(done.output.unwrap().output_url.as_deref(), Some("https://cdn/job-1.mp4"));

    let stats = remote.stats().await.unwrap();
    assert_eq!(stats.complete, 1);
    assert!(remote.health_check().await.is_ok());
}

#[tokio::test]
async fn empty_remote_queue_is_none() {
    let (_server, remote) = remote_pair().await;
    assert!(remote.claim_next_job("colab-1", None).await.unwrap().is_none());
}

#[tokio::test]
async fn remote_failures_resolve_like_local_ones() {
    let (server, remote) = remote_pair().await;
    server
        .submit(NewJob::new("/a.wav").with_id("j").with_max_attempts(2))
        .await
        .unwrap();

    remote.claim_next_job("w1", None).await.unwrap().unwrap();
    let outcome = remote.record_failure("j", "w1", "OOM").await.unwrap();
    assert_eq!(
        outcome,
        FailOutcome::Requeued {
            attempt: 1,
            max_attempts: 2
        }
    );

    remote.claim_next_job("w1", None).await.unwrap().unwrap();
    let outcome = remote.record_failure("j", "w1", "OOM").await.unwrap();
    assert_eq!(outcome, FailOutcome::DeadLettered { attempt: 2 });

    let job = remote.get_job("j").await.unwrap();
    assert_eq!(job.status, JobStatus::Dead);
    assert!(job.output.is_none());
}

#[tokio::test]
async fn remote_errors_keep_their_meaning() {
    let (server, remote) = remote_pair().await;
    server.submit(NewJob::new("/a.wav").with_id("j")).await.unwrap();
    remote.claim_next_job("w1", None).await.unwrap().unwrap();

    let err = remote
        .record_progress("j", "w2", 10, "", None)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Store(StoreError::NotClaimedBy { .. })));

    let err = remote.get_job("missing").await.unwrap_err();
    assert!(matches!(err, QueueError::Store(StoreError::NotFound(_))));

    let err = remote
        .submit(NewJob::new("/a.wav").with_id("j"))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Store(StoreError::Duplicate(_))));
}

#[tokio::test]
async fn remote_cleanup_runs_on_the_server() {
    let (_server, remote) = remote_pair().await;
    let report = remote
        .cleanup_stale_jobs(Duration::from_secs(90))
        .await
        .unwrap();
    assert_eq!(report.reclaimed(), 0);
}

#[tokio::test]
async fn unreachable_server_is_an_http_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let remote = JobQueue::new(Arc::new(
        HttpJobStore::new(&format!("http://{addr}")).unwrap(),
    ));
    let err = remote.claim_next_job("w1", None).await.unwrap_err();
    assert!(matches!(err, QueueError::Store(StoreError::Http(_))));
}
