//! Runs the external generation program for one claimed job.
//!
//! The program receives the job through `CANVAS_JOB_ID`, `CANVAS_INPUT_PATH`,
//! `CANVAS_INPUT_URL`, `CANVAS_GENERATION_MODE` and `CANVAS_PARAMS` (the full
//! input bundle as JSON). While it runs it may print stage updates such as
//! `{"progress": 40, "message": "Generating keyframes"}`, one per line; its
//! last other non-blank stdout line must be a `JobOutput` JSON object.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::models::job::{ClaimedJob, GenerationMode, JobOutput};

/// Longest stderr excerpt carried into a failure message.
const STDERR_EXCERPT: usize = 500;

/// Run time allowed when no explicit limit is configured.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(25 * 60);

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Failed to run generation command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Generation exited with {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },

    #[error("Generation timed out after {secs}s")]
    TimedOut { secs: u64 },

    #[error("Generation produced no output")]
    NoOutput,

    #[error("Generation output is not valid JSON: {0}")]
    InvalidOutput(#[from] serde_json::Error),
}

/// Stage update printed by the generation program.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressUpdate {
    pub progress: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub generation_mode: Option<GenerationMode>,
}

#[derive(Debug, Clone)]
pub struct GenerationCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl GenerationCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the program for `job`, handing every stage update to
    /// `on_progress` as it is printed. The child is killed when the run
    /// exceeds the timeout.
    pub async fn run<F, Fut>(
        &self,
        job: &ClaimedJob,
        mut on_progress: F,
    ) -> Result<JobOutput, GenerationError>
    where
        F: FnMut(ProgressUpdate) -> Fut,
        Fut: Future<Output = ()>,
    {
        match tokio::time::timeout(self.timeout, self.execute(job, &mut on_progress)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::TimedOut {
                secs: self.timeout.as_secs(),
            }),
        }
    }

    async fn execute<F, Fut>(
        &self,
        job: &ClaimedJob,
        on_progress: &mut F,
    ) -> Result<JobOutput, GenerationError>
    where
        F: FnMut(ProgressUpdate) -> Fut,
        Fut: Future<Output = ()>,
    {
        let input = serde_json::to_string(&job.input)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("CANVAS_JOB_ID", &job.id)
            .env("CANVAS_INPUT_PATH", &job.input.input_path)
            .env("CANVAS_INPUT_URL", job.input.input_url.as_deref().unwrap_or(""))
            .env("CANVAS_GENERATION_MODE", job.generation_mode.to_string())
            .env("CANVAS_PARAMS", input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Drained concurrently so a chatty program never blocks on a full pipe.
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                stderr.read_to_end(&mut buf).await.ok();
            }
            buf
        });

        let mut last_line = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<ProgressUpdate>(line) {
                    Ok(mut update) => {
                        update.progress = update.progress.clamp(0, 100);
                        on_progress(update).await;
                    }
                    Err(_) => last_line = Some(line.to_string()),
                }
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            let stderr = stderr.trim();
            let excerpt: String = stderr
                .chars()
                .skip(stderr.chars().count().saturating_sub(STDERR_EXCERPT))
                .collect();
            return Err(GenerationError::ExitStatus {
                status: status.to_string(),
                stderr: excerpt,
            });
        }

        parse_output(last_line.as_deref().unwrap_or_default())
    }
}

/// Last non-blank stdout line, parsed as the job's output.
pub fn parse_output(stdout: &str) -> Result<JobOutput, GenerationError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .ok_or(GenerationError::NoOutput)?;
    Ok(serde_json::from_str(line)?)
}
