use std::sync::Arc;

use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use canvas_dispatch::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgJobStore},
    routes,
    services::{
        memory_store::MemoryJobStore, queue::JobQueue, store::JobStore,
        sweeper::ReclamationSweeper,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing canvas dispatch server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("canvas_jobs_submitted_total", "Total generation jobs submitted");
    metrics::describe_counter!("canvas_jobs_claimed_total", "Total jobs handed to workers");
    metrics::describe_counter!("canvas_jobs_completed_total", "Total jobs completed");
    metrics::describe_counter!("canvas_jobs_failed_total", "Total failures reported by workers");
    metrics::describe_counter!("canvas_jobs_dead_total", "Total jobs dead-lettered");
    metrics::describe_counter!(
        "canvas_jobs_reclaimed_total",
        "Total stale claims returned by the sweeper"
    );
    metrics::describe_gauge!("canvas_queue_depth", "Current number of queued jobs");
    metrics::describe_gauge!("canvas_jobs_in_flight", "Jobs currently claimed or generating");

    // Pick the job store backend
    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL database");
            let pool = db::init_pool(url)
                .await
                .expect("Failed to connect to database");

            tracing::info!("Running database migrations");
            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");

            Arc::new(PgJobStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory job store");
            Arc::new(MemoryJobStore::new())
        }
    };

    let queue = Arc::new(JobQueue::new(store).with_reclaim_policy(config.reclaim_policy));

    // Periodic reclamation of abandoned claims
    ReclamationSweeper::new(
        Arc::clone(&queue),
        config.sweep_interval(),
        config.reclaim_timeout(),
    )
    .spawn();

    let state = AppState::new(queue);

    // Build API routes
    let app = routes::api_router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting canvas dispatch on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
