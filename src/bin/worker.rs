use std::sync::Arc;

use canvas_dispatch::{
    config::{WorkerBackend, WorkerConfig},
    db::{self, PgJobStore},
    services::{
        generation::{GenerationCommand, ProgressUpdate},
        http_store::HttpJobStore,
        queue::JobQueue,
        store::JobStore,
    },
};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

struct Worker {
    queue: JobQueue,
    worker_id: String,
    worker_type: String,
    command: GenerationCommand,
}

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration
    let config = WorkerConfig::from_env().expect("Failed to load configuration");
    let worker_id = config.resolved_worker_id();

    tracing::info!(worker_id = %worker_id, worker_type = %config.worker_type, "Starting canvas generation worker");

    let store: Arc<dyn JobStore> = match config.backend().expect("Invalid configuration") {
        WorkerBackend::Http(url) => {
            tracing::info!(server_url = %url, "Claiming jobs through the queue API");
            Arc::new(
                HttpJobStore::new(&url)
                    .expect("Invalid SERVER_URL")
                    .with_gpu(config.gpu.clone()),
            )
        }
        WorkerBackend::Postgres(url) => {
            tracing::info!("Connecting to PostgreSQL");
            let db_pool = db::init_pool(&url)
                .await
                .expect("Failed to connect to database");
            Arc::new(PgJobStore::new(db_pool))
        }
    };

    let worker = Worker {
        queue: JobQueue::new(store),
        worker_id,
        worker_type: config.worker_type.clone(),
        command: GenerationCommand::new(
            config.generation_command.clone(),
            config.generation_args.clone(),
        )
        .with_timeout(config.generation_timeout()),
    };

    tracing::info!("Worker ready, starting job polling loop");

    // Main processing loop
    loop {
        match process_next_job(&worker).await {
            Ok(true) => {
                // Job processed, poll again immediately
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(config.poll_interval()).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, will retry");
                sleep(config.poll_interval()).await;
            }
        }
    }
}

/// Claim and run the next job.
/// Returns Ok(true) if a job was processed, Ok(false) if none was available.
async fn process_next_job(worker: &Worker) -> Result<bool, Box<dyn std::error::Error>> {
    let job = match worker
        .queue
        .claim_next_job(&worker.worker_id, Some(&worker.worker_type))
        .await?
    {
        Some(job) => job,
        None => return Ok(false),
    };

    tracing::info!(
        job_id = %job.id,
        attempt = job.attempt,
        max_attempts = job.max_attempts,
        input_path = %job.input.input_path,
        "Processing generation job"
    );

    worker
        .queue
        .record_progress(
            &job.id,
            &worker.worker_id,
            0,
            "Starting generation",
            Some(job.generation_mode),
        )
        .await?;

    let queue = &worker.queue;
    let job_id = job.id.as_str();
    let worker_id = worker.worker_id.as_str();
    let on_progress = move |update: ProgressUpdate| async move {
        if let Err(e) = queue
            .record_progress(
                job_id,
                worker_id,
                update.progress,
                &update.message,
                update.generation_mode,
            )
            .await
        {
            tracing::warn!(job_id, error = %e, "Progress report failed");
        }
    };

    let start = std::time::Instant::now();
    match worker.command.run(&job, on_progress).await {
        Ok(output) => {
            worker
                .queue
                .record_success(&job.id, &worker.worker_id, &output)
                .await?;
            tracing::info!(
                job_id = %job.id,
                duration_ms = start.elapsed().as_millis() as u64,
                "Job completed successfully"
            );
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "Generation failed");
            let outcome = worker
                .queue
                .record_failure(&job.id, &worker.worker_id, &e.to_string())
                .await?;
            tracing::info!(job_id = %job.id, status = %outcome.status(), "Failure recorded");
        }
    }

    Ok(true)
}
