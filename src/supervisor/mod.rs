//! Liveness supervisor for the compute and relay units.
//!
//! A strictly sequential loop: each cycle walks the units in order, checking
//! the process and then (when due) the health endpoint of each, and applies
//! the escalation policy. A slow probe delays the next cycle; cycles never
//! overlap. Failure counters live in the units owned by the loop.

pub mod config;
pub mod probe;
pub mod process;
pub mod unit;

use std::time::Duration;

pub use config::SupervisorConfig;
pub use unit::{RestartReason, SupervisedUnit, UnitControl, UnitOutcome};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to launch {unit}: {source}")]
    Spawn {
        unit: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{unit} did not come up within {waited_secs}s")]
    StartupTimeout { unit: String, waited_secs: u64 },

    #[error("Invalid supervisor configuration: {0}")]
    Config(String),
}

/// Loop-wide knobs.
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub interval: Duration,
    /// Consecutive health failures that trigger a forced restart.
    pub max_failures: u32,
    /// Log a status summary every this many cycles.
    pub status_every: u64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            max_failures: 3,
            status_every: 40,
        }
    }
}

/// Outcomes of one cycle, in unit order.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcomes: Vec<(String, UnitOutcome)>,
}

impl CycleReport {
    pub fn outcome(&self, unit: &str) -> Option<&UnitOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == unit)
            .map(|(_, outcome)| outcome)
    }
}

pub struct Supervisor {
    units: Vec<SupervisedUnit>,
    settings: LoopSettings,
    cycle: u64,
}

impl Supervisor {
    pub fn new(units: Vec<SupervisedUnit>, settings: LoopSettings) -> Self {
        Self {
            units,
            settings,
            cycle: 0,
        }
    }

    pub fn units(&self) -> &[SupervisedUnit] {
        &self.units
    }

    /// Run one cycle over every unit.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        let cycle = self.cycle;

        let mut outcomes = Vec::with_capacity(self.units.len());
        for unit in &mut self.units {
            let outcome = unit.check(cycle, self.settings.max_failures).await;
            outcomes.push((unit.name().to_string(), outcome));
        }

        if cycle % self.settings.status_every == 0 {
            self.log_status();
        }

        CycleReport { cycle, outcomes }
    }

    /// Supervise until the process is killed.
    pub async fn run(mut self) {
        tracing::info!(
            units = self.units.len(),
            interval_secs = self.settings.interval.as_secs(),
            max_failures = self.settings.max_failures,
            "Supervisor started"
        );
        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.settings.interval).await;
        }
    }

    fn log_status(&self) {
        for unit in &self.units {
            tracing::info!(
                cycle = self.cycle,
                unit = %unit.name(),
                failures = unit.failures(),
                restarts = unit.restarts(),
                "Supervisor status"
            );
        }
    }
}
