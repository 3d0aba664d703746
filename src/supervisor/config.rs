use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::probe::HttpHealthProbe;
use crate::config::ConfigError;
use super::process::{LaunchSpec, ProcessMatcher, ProcessUnit, RestartTimings};
use super::unit::SupervisedUnit;
use super::{LoopSettings, SupervisorError};

/// Supervisor configuration, read from `SUPERVISOR_*` variables.
///
/// | Variable                         | Default | Description                                 |
/// |----------------------------------|---------|---------------------------------------------|
/// | `SUPERVISOR_INTERVAL_SECS`       | `15`    | Sleep between cycles                        |
/// | `SUPERVISOR_MAX_FAILURES`        | `3`     | Consecutive health failures before a kill   |
/// | `SUPERVISOR_STARTUP_WAIT_SECS`   | `20`    | Time a relaunched unit has to bind          |
/// | `SUPERVISOR_RELAY_HEALTH_EVERY`  | `4`     | Probe relay health every Nth cycle          |
/// | `SUPERVISOR_STATUS_EVERY`        | `40`    | Log a status summary every Nth cycle        |
/// | `SUPERVISOR_COMPUTE_COMMAND`     | --      | Program serving the queue and generation    |
/// | `SUPERVISOR_RELAY_COMMAND`       | --      | Tunnel program exposing the compute unit    |
#[derive(Debug, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_startup_wait_secs")]
    pub startup_wait_secs: u64,
    #[serde(default = "default_relay_health_every")]
    pub relay_health_every: u64,
    #[serde(default = "default_status_every")]
    pub status_every: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    pub compute_command: String,
    #[serde(default)]
    pub compute_args: Vec<String>,
    pub compute_workdir: Option<PathBuf>,
    /// `KEY=VALUE` pairs, comma separated.
    #[serde(default)]
    pub compute_env: Vec<String>,
    #[serde(default = "default_compute_port")]
    pub compute_port: u16,
    /// Defaults to `http://127.0.0.1:<port>/api/health`.
    pub compute_health_url: Option<String>,
    pub compute_log: Option<PathBuf>,

    pub relay_command: String,
    #[serde(default)]
    pub relay_args: Vec<String>,
    pub relay_workdir: Option<PathBuf>,
    #[serde(default)]
    pub relay_env: Vec<String>,
    /// `pgrep -f` regex identifying the relay. Defaults to the exact,
    /// escaped relay command line.
    pub relay_pattern: Option<String>,
    /// Public health URL through the tunnel. Without it only the relay
    /// process is watched.
    pub relay_health_url: Option<String>,
    pub relay_log: Option<PathBuf>,
}

fn default_interval_secs() -> u64 {
    15
}

fn default_max_failures() -> u32 {
    3
}

fn default_startup_wait_secs() -> u64 {
    20
}

fn default_relay_health_every() -> u64 {
    4
}

fn default_status_every() -> u64 {
    40
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_grace_secs() -> u64 {
    2
}

fn default_compute_port() -> u16 {
    8888
}

impl SupervisorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::prefixed("SUPERVISOR_").from_env()?)
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            interval: Duration::from_secs(self.interval_secs.max(1)),
            max_failures: self.max_failures.max(1),
            status_every: self.status_every.max(1),
        }
    }

    fn timings(&self) -> RestartTimings {
        RestartTimings {
            grace: Duration::from_secs(self.grace_secs),
            startup_wait: Duration::from_secs(self.startup_wait_secs),
            ..Default::default()
        }
    }

    fn probe(&self, url: &str) -> HttpHealthProbe {
        HttpHealthProbe::new(url, Duration::from_secs(self.probe_timeout_secs.max(1)))
    }

    fn relay_matcher(&self) -> ProcessMatcher {
        match &self.relay_pattern {
            Some(pattern) => ProcessMatcher::Pattern(pattern.clone()),
            None => ProcessMatcher::command_line(&self.relay_command, &self.relay_args),
        }
    }

    /// Compute unit first, relay second: the order each cycle checks them.
    pub fn build_units(&self) -> Result<Vec<SupervisedUnit>, SupervisorError> {
        let compute_health = self
            .compute_health_url
            .clone()
            .unwrap_or_else(|| format!("http://127.0.0.1:{}/api/health", self.compute_port));
        let compute = ProcessUnit::new(
            "compute",
            ProcessMatcher::Port(self.compute_port),
            LaunchSpec {
                program: self.compute_command.clone(),
                args: self.compute_args.clone(),
                working_dir: self.compute_workdir.clone(),
                env: parse_env_pairs(&self.compute_env)?,
                log_file: self.compute_log.clone(),
            },
        )
        .with_health(self.probe(&compute_health))
        .with_timings(self.timings());

        let mut relay = ProcessUnit::new(
            "relay",
            self.relay_matcher(),
            LaunchSpec {
                program: self.relay_command.clone(),
                args: self.relay_args.clone(),
                working_dir: self.relay_workdir.clone(),
                env: parse_env_pairs(&self.relay_env)?,
                log_file: self.relay_log.clone(),
            },
        )
        .with_timings(self.timings());
        if let Some(url) = &self.relay_health_url {
            relay = relay.with_health(self.probe(url));
        }

        Ok(vec![
            SupervisedUnit::new("compute", Box::new(compute)),
            SupervisedUnit::new("relay", Box::new(relay))
                .with_health_every(self.relay_health_every),
        ])
    }
}

/// Split `KEY=VALUE` entries.
pub fn parse_env_pairs(entries: &[String]) -> Result<Vec<(String, String)>, SupervisorError> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(SupervisorError::Config(format!(
                "environment entry '{entry}' is not KEY=VALUE"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_match_the_documented_cadence() {
        let cfg: SupervisorConfig = envy::prefixed("SUPERVISOR_")
            .from_iter(vars(&[
                ("SUPERVISOR_COMPUTE_COMMAND", "python3"),
                ("SUPERVISOR_RELAY_COMMAND", "cloudflared"),
            ]))
            .unwrap();
        let settings = cfg.loop_settings();
        assert_eq!(settings.interval, Duration::from_secs(15));
        assert_eq!(settings.max_failures, 3);
        assert_eq!(settings.status_every, 40);
        assert_eq!(cfg.relay_health_every, 4);
        assert_eq!(cfg.startup_wait_secs, 20);
        assert_eq!(cfg.compute_port, 8888);
    }

    #[test]
    fn zero_cadence_values_are_clamped() {
        let cfg: SupervisorConfig = envy::prefixed("SUPERVISOR_")
            .from_iter(vars(&[
                ("SUPERVISOR_COMPUTE_COMMAND", "python3"),
                ("SUPERVISOR_RELAY_COMMAND", "cloudflared"),
                ("SUPERVISOR_INTERVAL_SECS", "0"),
                ("SUPERVISOR_MAX_FAILURES", "0"),
                ("SUPERVISOR_STATUS_EVERY", "0"),
                ("SUPERVISOR_PROBE_TIMEOUT_SECS", "0"),
            ]))
            .unwrap();
        let settings = cfg.loop_settings();
        assert_eq!(settings.interval, Duration::from_secs(1));
        assert_eq!(settings.max_failures, 1);
        assert_eq!(settings.status_every, 1);
        assert_eq!(cfg.probe("http://127.0.0.1:1/").timeout(), Duration::from_secs(1));
    }

    #[test]
    fn builds_compute_then_relay() {
        let cfg: SupervisorConfig = envy::prefixed("SUPERVISOR_")
            .from_iter(vars(&[
                ("SUPERVISOR_COMPUTE_COMMAND", "python3"),
                ("SUPERVISOR_COMPUTE_ARGS", "server.py"),
                ("SUPERVISOR_COMPUTE_ENV", "PORT=8888,PYTHONUNBUFFERED=1"),
                ("SUPERVISOR_RELAY_COMMAND", "cloudflared"),
                ("SUPERVISOR_RELAY_ARGS", "tunnel,run"),
            ]))
            .unwrap();
        let units = cfg.build_units().unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name()).collect();
        assert_eq!(names, vec!["compute", "relay"]);
    }

    #[test]
    fn relay_is_matched_by_its_full_command_line() {
        let cfg: SupervisorConfig = envy::prefixed("SUPERVISOR_")
            .from_iter(vars(&[
                ("SUPERVISOR_COMPUTE_COMMAND", "python3"),
                ("SUPERVISOR_RELAY_COMMAND", "lt"),
                ("SUPERVISOR_RELAY_ARGS", "--port,8888"),
            ]))
            .unwrap();
        assert_eq!(
            cfg.relay_matcher(),
            ProcessMatcher::Pattern("^lt --port 8888$".to_string())
        );

        let cfg: SupervisorConfig = envy::prefixed("SUPERVISOR_")
            .from_iter(vars(&[
                ("SUPERVISOR_COMPUTE_COMMAND", "python3"),
                ("SUPERVISOR_RELAY_COMMAND", "lt"),
                ("SUPERVISOR_RELAY_PATTERN", "lt --port"),
            ]))
            .unwrap();
        assert_eq!(
            cfg.relay_matcher(),
            ProcessMatcher::Pattern("lt --port".to_string())
        );
    }

    #[test]
    fn env_pairs_must_have_a_key() {
        let parsed = parse_env_pairs(&["A=1".to_string(), "B=x=y".to_string()]).unwrap();
        assert_eq!(parsed[1], ("B".to_string(), "x=y".to_string()));
        assert!(parse_env_pairs(&["=1".to_string()]).is_err());
        assert!(parse_env_pairs(&["NOVALUE".to_string()]).is_err());
    }
}
