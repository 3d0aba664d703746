//! Supervised units backed by real OS processes.
//!
//! Detection, termination and launch all go through `tokio::process` with
//! explicit argument vectors; nothing is passed through a shell.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::process::Command;

use super::probe::HttpHealthProbe;
use super::unit::UnitControl;
use super::SupervisorError;

/// Upper bound for helper commands (`pgrep`, `pkill`, `fuser`).
const HELPER_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the loopback connect used to detect a bound port.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// How a unit's process is recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessMatcher {
    /// Something accepts connections on this local TCP port.
    Port(u16),
    /// Some process command line matches this extended regex.
    Pattern(String),
}

impl ProcessMatcher {
    /// Matches exactly `program args...` as `pgrep -f` sees it, with regex
    /// metacharacters escaped. Processes that merely mention the program
    /// name do not match.
    pub fn command_line(program: &str, args: &[String]) -> Self {
        let line = std::iter::once(program)
            .chain(args.iter().map(String::as_str))
            .map(escape_regex)
            .collect::<Vec<_>>()
            .join(" ");
        Self::Pattern(format!("^{line}$"))
    }
}

fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '\\' | '.' | '^' | '$' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Fixed launch configuration of a unit.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Stdout and stderr are appended here; discarded when unset.
    pub log_file: Option<PathBuf>,
}

/// Startup and shutdown timings.
#[derive(Debug, Clone, Copy)]
pub struct RestartTimings {
    /// Pause between termination and relaunch.
    pub grace: Duration,
    /// How long a relaunched process has to bind its resource.
    pub startup_wait: Duration,
    /// Interval between bind checks during startup.
    pub poll_step: Duration,
}

impl Default for RestartTimings {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(2),
            startup_wait: Duration::from_secs(20),
            poll_step: Duration::from_secs(1),
        }
    }
}

pub struct ProcessUnit {
    name: String,
    matcher: ProcessMatcher,
    launch: LaunchSpec,
    health: Option<HttpHealthProbe>,
    timings: RestartTimings,
}

impl ProcessUnit {
    pub fn new(name: impl Into<String>, matcher: ProcessMatcher, launch: LaunchSpec) -> Self {
        Self {
            name: name.into(),
            matcher,
            launch,
            health: None,
            timings: RestartTimings::default(),
        }
    }

    pub fn with_health(mut self, probe: HttpHealthProbe) -> Self {
        self.health = Some(probe);
        self
    }

    pub fn with_timings(mut self, timings: RestartTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Signal every process holding the unit's resource.
    async fn terminate(&self, force: bool) {
        let signal = if force { "-KILL" } else { "-TERM" };
        let mut cmd = match &self.matcher {
            ProcessMatcher::Port(port) => {
                let target = format!("{port}/tcp");
                let mut cmd = Command::new("fuser");
                cmd.args(["-k", signal, target.as_str()]);
                cmd
            }
            ProcessMatcher::Pattern(pattern) => {
                let mut cmd = Command::new("pkill");
                cmd.args([signal, "-f", pattern.as_str()]);
                cmd
            }
        };
        cmd.stdout(Stdio::null()).stderr(Stdio::null());

        match tokio::time::timeout(HELPER_TIMEOUT, cmd.status()).await {
            // Exit status 1 means nothing matched, which is fine here.
            Ok(Ok(_)) => tracing::debug!(unit = %self.name, force, "Termination signal sent"),
            Ok(Err(e)) => tracing::warn!(unit = %self.name, error = %e, "Could not run termination helper"),
            Err(_) => tracing::warn!(unit = %self.name, "Termination helper timed out"),
        }
    }

    fn spawn(&self) -> Result<(), SupervisorError> {
        let spawn_err = |source: std::io::Error| SupervisorError::Spawn {
            unit: self.name.clone(),
            source,
        };

        let mut cmd = Command::new(&self.launch.program);
        cmd.args(&self.launch.args)
            .envs(self.launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        if let Some(dir) = &self.launch.working_dir {
            cmd.current_dir(dir);
        }
        match &self.launch.log_file {
            Some(path) => {
                let log = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(spawn_err)?;
                let log_err = log.try_clone().map_err(spawn_err)?;
                cmd.stdout(log).stderr(log_err);
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        // The child outlives this handle; dropping it does not kill it.
        let child = cmd.spawn().map_err(spawn_err)?;
        tracing::info!(unit = %self.name, pid = ?child.id(), program = %self.launch.program, "Unit launched");
        Ok(())
    }

    async fn wait_until_bound(&self) -> Result<(), SupervisorError> {
        let started = Instant::now();
        while started.elapsed() < self.timings.startup_wait {
            if self.process_alive().await {
                tracing::info!(
                    unit = %self.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Unit is up"
                );
                return Ok(());
            }
            tokio::time::sleep(self.timings.poll_step).await;
        }
        Err(SupervisorError::StartupTimeout {
            unit: self.name.clone(),
            waited_secs: self.timings.startup_wait.as_secs(),
        })
    }
}

#[async_trait]
impl UnitControl for ProcessUnit {
    async fn process_alive(&self) -> bool {
        match &self.matcher {
            ProcessMatcher::Port(port) => matches!(
                tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", *port))).await,
                Ok(Ok(_))
            ),
            ProcessMatcher::Pattern(pattern) => {
                let status = Command::new("pgrep")
                    .args(["-f", pattern.as_str()])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
                matches!(
                    tokio::time::timeout(HELPER_TIMEOUT, status).await,
                    Ok(Ok(status)) if status.success()
                )
            }
        }
    }

    async fn probe_health(&self) -> bool {
        match &self.health {
            Some(probe) => probe.check().await,
            // No contract to check beyond the process itself.
            None => true,
        }
    }

    async fn restart(&self, force: bool) -> Result<(), SupervisorError> {
        tracing::info!(unit = %self.name, force, "Restarting unit");
        self.terminate(force).await;
        tokio::time::sleep(self.timings.grace).await;
        self.spawn()?;
        self.wait_until_bound().await
    }
}
