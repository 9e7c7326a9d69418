// src/engine/cycle.rs

//! One pipeline attempt and how it ended.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::StageResult;
use crate::types::FailureKind;

/// Why a cycle was cut short without being counted as a failure.
///
/// A plain shutdown request never aborts a cycle; the loop stops after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The grace period ran out, or a second request forced the exit.
    Forced,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Forced => write!(f, "Forced"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Succeeded,
    Failed {
        stage: String,
        kind: FailureKind,
        message: String,
    },
    Aborted {
        /// The stage that was skipped or interrupted, if any.
        stage: Option<String>,
        reason: AbortReason,
    },
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Succeeded)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, CycleOutcome::Failed { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, CycleOutcome::Aborted { .. })
    }
}

/// A completed (or aborted) cycle. Folded into the metrics and dropped.
#[derive(Debug, Clone)]
pub struct Cycle {
    pub index: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Monotonic wall time of the whole cycle.
    pub duration: Duration,
    /// Results of the stages that actually ran, in order.
    pub stages: Vec<StageResult>,
    pub outcome: CycleOutcome,
    /// Items reported by the final stage; zero unless the cycle succeeded.
    pub items_processed: u64,
}

/// External trigger handed to stage 0 as its input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trigger {
    pub cycle: u64,
    pub at: DateTime<Utc>,
}
