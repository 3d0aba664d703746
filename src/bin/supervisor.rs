use canvas_dispatch::supervisor::{Supervisor, SupervisorConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = SupervisorConfig::from_env().expect("Failed to load supervisor configuration");
    let units = config
        .build_units()
        .expect("Failed to build supervised units");

    tracing::info!(
        compute = %config.compute_command,
        compute_port = config.compute_port,
        relay = %config.relay_command,
        "Starting liveness supervisor"
    );

    Supervisor::new(units, config.loop_settings()).run().await;
}
