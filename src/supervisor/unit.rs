use async_trait::async_trait;
use serde::Serialize;

use super::SupervisorError;

/// Control surface of one supervised process.
#[async_trait]
pub trait UnitControl: Send + Sync {
    /// Is a process bound to the unit's port or matching its signature?
    async fn process_alive(&self) -> bool;

    /// Does the unit's health endpoint answer with success in time?
    async fn probe_health(&self) -> bool;

    /// Terminate whatever holds the unit's resource and launch it again.
    /// `force` kills instead of asking politely.
    async fn restart(&self, force: bool) -> Result<(), SupervisorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartReason {
    ProcessMissing,
    HealthFailures(u32),
}

/// What happened to a unit during one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    Healthy,
    /// Health passed again after `failures` consecutive failures.
    Recovered { failures: u32 },
    /// Health failed; `failures` in a row so far.
    Degraded { failures: u32 },
    /// Process present, health not due this cycle.
    HealthSkipped,
    Restarted { reason: RestartReason },
    RestartFailed { reason: RestartReason, error: String },
}

/// A supervised process plus its loop-local health bookkeeping.
pub struct SupervisedUnit {
    name: String,
    control: Box<dyn UnitControl>,
    /// Probe health every this many cycles.
    health_every: u64,
    failures: u32,
    restarts: u64,
}

impl SupervisedUnit {
    pub fn new(name: impl Into<String>, control: Box<dyn UnitControl>) -> Self {
        Self {
            name: name.into(),
            control,
            health_every: 1,
            failures: 0,
            restarts: 0,
        }
    }

    pub fn with_health_every(mut self, cycles: u64) -> Self {
        self.health_every = cycles.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Run this unit's share of a cycle.
    pub async fn check(&mut self, cycle: u64, max_failures: u32) -> UnitOutcome {
        if !self.control.process_alive().await {
            tracing::warn!(unit = %self.name, "Process not found, restarting");
            self.failures = 0;
            return self.restart(RestartReason::ProcessMissing, false).await;
        }

        if cycle % self.health_every != 0 {
            return UnitOutcome::HealthSkipped;
        }

        if self.control.probe_health().await {
            let previous = std::mem::take(&mut self.failures);
            if previous > 0 {
                tracing::info!(unit = %self.name, failures = previous, "Health recovered");
                return UnitOutcome::Recovered { failures: previous };
            }
            return UnitOutcome::Healthy;
        }

        self.failures += 1;
        tracing::warn!(
            unit = %self.name,
            failures = self.failures,
            max_failures,
            "Health check failed"
        );
        if self.failures < max_failures {
            return UnitOutcome::Degraded {
                failures: self.failures,
            };
        }

        let failures = std::mem::take(&mut self.failures);
        tracing::error!(unit = %self.name, failures, "Too many health failures, force restarting");
        self.restart(RestartReason::HealthFailures(failures), true).await
    }

    async fn restart(&mut self, reason: RestartReason, force: bool) -> UnitOutcome {
        self.restarts += 1;
        metrics::counter!("supervisor_restarts_total", "unit" => self.name.clone()).increment(1);
        match self.control.restart(force).await {
            Ok(()) => {
                tracing::info!(unit = %self.name, ?reason, force, "Unit restarted");
                UnitOutcome::Restarted { reason }
            }
            Err(e) => {
                tracing::error!(unit = %self.name, ?reason, error = %e, "Restart failed, will retry next cycle");
                UnitOutcome::RestartFailed {
                    reason,
                    error: e.to_string(),
                }
            }
        }
    }
}
