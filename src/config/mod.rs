use std::time::Duration;

use serde::Deserialize;

use crate::models::outcome::ReclaimPolicy;

/// Queue API server configuration.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8888").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Without it the queue lives in memory
    /// and only serves workers that go through this server.
    pub database_url: Option<String>,

    /// Seconds between reclamation sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Minutes after which a claim is presumed abandoned.
    #[serde(default = "default_reclaim_timeout_mins")]
    pub reclaim_timeout_mins: u64,

    /// What a sweep does with a stale job on its final attempt.
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8888".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_reclaim_timeout_mins() -> u64 {
    30
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        if config.reclaim_timeout_mins == 0 {
            return Err(ConfigError::Invalid(
                "RECLAIM_TIMEOUT_MINS must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn reclaim_timeout(&self) -> Duration {
        Duration::from_secs(self.reclaim_timeout_mins.max(1).saturating_mul(60))
    }
}

/// Worker process configuration.
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// Base URL of a queue API server (e.g. a tunnel URL). Takes precedence
    /// over `database_url`.
    pub server_url: Option<String>,

    /// PostgreSQL connection string of the shared job store.
    pub database_url: Option<String>,

    /// Stable identity of this worker; generated when unset.
    pub worker_id: Option<String>,

    /// Kind of host ("colab", "hf_spaces", "modal", "local").
    #[serde(default = "default_worker_type")]
    pub worker_type: String,

    /// GPU name reported with claims over HTTP.
    pub gpu: Option<String>,

    /// Seconds to sleep when the queue is empty.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Program that renders one job.
    pub generation_command: String,

    /// Comma-separated arguments for `generation_command`.
    #[serde(default)]
    pub generation_args: Vec<String>,

    /// Hard limit on one generation run. Keep it below the server's
    /// reclaim timeout so a hung run is abandoned before its job is
    /// handed to another worker.
    #[serde(default = "default_generation_timeout_mins")]
    pub generation_timeout_mins: u64,
}

/// Where a worker claims jobs from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerBackend {
    Http(String),
    Postgres(String),
}

fn default_worker_type() -> String {
    "local".to_string()
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_generation_timeout_mins() -> u64 {
    25
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.generation_command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "GENERATION_COMMAND must not be empty".to_string(),
            ));
        }
        self.backend().map(|_| ())
    }

    pub fn backend(&self) -> Result<WorkerBackend, ConfigError> {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        if let Some(url) = non_blank(&self.server_url) {
            return Ok(WorkerBackend::Http(url));
        }
        if let Some(url) = non_blank(&self.database_url) {
            return Ok(WorkerBackend::Postgres(url));
        }
        Err(ConfigError::Invalid(
            "either SERVER_URL or DATABASE_URL must be set".to_string(),
        ))
    }

    pub fn resolved_worker_id(&self) -> String {
        self.worker_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                format!("worker-{}", &suffix[..6])
            })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_mins.max(1).saturating_mul(60))
    }
}
