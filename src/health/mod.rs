// src/health/mod.rs

//! Health evaluation.
//!
//! [`rules`] turns a metrics snapshot plus liveness and resource signals into
//! a [`HealthReport`]; it is pure and does no IO. [`monitor`] is the polling
//! task that feeds it, and [`resources`] samples cpu/memory/disk.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod monitor;
pub mod resources;
pub mod rules;

pub use monitor::{HealthHandle, HealthMonitor, LivenessFlag, LivenessProbe, PidProbe};
pub use resources::{ResourceSampler, ResourceSnapshot};
pub use rules::{HealthEvaluator, HealthPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    ServiceDown,
    LowSuccessRate,
    Stale,
    HighCpu,
    HighMemory,
    HighDisk,
    FailedCyclesHigh,
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertCondition::ServiceDown => "service_down",
            AlertCondition::LowSuccessRate => "low_success_rate",
            AlertCondition::Stale => "stale",
            AlertCondition::HighCpu => "high_cpu",
            AlertCondition::HighMemory => "high_memory",
            AlertCondition::HighDisk => "high_disk",
            AlertCondition::FailedCyclesHigh => "failed_cycles_high",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub condition: AlertCondition,
    pub severity: Severity,
    /// The measured value that tripped the rule.
    pub value: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
    pub message: String,
}

/// Whether the pipeline process is alive, as seen at `observed_at`.
///
/// `observed_at` doubles as the evaluation instant, keeping
/// [`HealthEvaluator::evaluate`] free of clock reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub service_alive: bool,
    pub observed_at: DateTime<Utc>,
}

impl Liveness {
    pub fn alive_at(observed_at: DateTime<Utc>) -> Self {
        Self {
            service_alive: true,
            observed_at,
        }
    }

    pub fn down_at(observed_at: DateTime<Utc>) -> Self {
        Self {
            service_alive: false,
            observed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub evaluated_at: DateTime<Utc>,
    pub service_alive: bool,
    /// Windowed or lifetime success rate; `None` before any completed cycle.
    pub success_rate: Option<f64>,
    /// Number of completed cycles `success_rate` was computed over.
    pub success_rate_cycles: u64,
    /// Seconds since the last success (or since start when none yet).
    pub staleness_secs: f64,
    pub resources: Option<ResourceSnapshot>,
    pub alerts: Vec<Alert>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn worst_severity(&self) -> Option<Severity> {
        self.alerts.iter().map(|a| a.severity).max()
    }
}
