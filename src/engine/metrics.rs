// src/engine/metrics.rs

//! Process-wide counters, single writer / many readers.
//!
//! The orchestrator owns the only [`MetricsStore`]. Every completed cycle
//! produces a fresh immutable [`MetricsSnapshot`] that is published through a
//! `tokio::sync::watch` channel; readers clone an `Arc` and never block the
//! writer.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::engine::cycle::{Cycle, CycleOutcome};
use crate::types::{FailureKind, FailureState};

/// Default length of the recent-outcome window when none is configured.
pub const DEFAULT_OUTCOME_WINDOW: usize = 100;

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Duration aggregate for one stage, across every run of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDurationStats {
    pub runs: u64,
    pub total_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub last_ms: u64,
}

impl StageDurationStats {
    fn observe(&mut self, d: Duration) {
        let ms = millis(d);
        self.min_ms = if self.runs == 0 { ms } else { self.min_ms.min(ms) };
        self.max_ms = self.max_ms.max(ms);
        self.runs += 1;
        self.total_ms = self.total_ms.saturating_add(ms);
        self.last_ms = ms;
    }

    pub fn mean_ms(&self) -> Option<u64> {
        (self.runs > 0).then(|| self.total_ms / self.runs)
    }
}

/// The most recent cycle failure, for `status` and `logs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastFailure {
    pub cycle: u64,
    pub stage: String,
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Completed cycles: `cycles_success + cycles_failed`.
    pub cycles_total: u64,
    pub cycles_success: u64,
    pub cycles_failed: u64,
    /// Cycles cut short by shutdown. Not part of `cycles_total`.
    pub cycles_aborted: u64,
    pub consecutive_failures: u32,
    pub failure_state: FailureState,
    pub items_processed_total: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_cycle_index: Option<u64>,
    pub last_cycle_duration_ms: Option<u64>,
    /// Sum of all cycle durations, aborted ones included.
    pub total_cycle_time_ms: u64,
    pub stage_durations: BTreeMap<String, StageDurationStats>,
    /// Newest last; `true` for success. Completed cycles only.
    pub recent_outcomes: VecDeque<bool>,
    pub last_failure: Option<LastFailure>,
}

impl MetricsSnapshot {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            updated_at: None,
            cycles_total: 0,
            cycles_success: 0,
            cycles_failed: 0,
            cycles_aborted: 0,
            consecutive_failures: 0,
            failure_state: FailureState::Normal,
            items_processed_total: 0,
            last_success_at: None,
            last_cycle_index: None,
            last_cycle_duration_ms: None,
            total_cycle_time_ms: 0,
            stage_durations: BTreeMap::new(),
            recent_outcomes: VecDeque::new(),
            last_failure: None,
        }
    }

    /// Lifetime success rate; `None` before the first completed cycle.
    pub fn success_rate(&self) -> Option<f64> {
        (self.cycles_total > 0).then(|| self.cycles_success as f64 / self.cycles_total as f64)
    }

    /// Success rate over the trailing `window` completed cycles, with the
    /// number of cycles it was computed over.
    pub fn windowed_success_rate(&self, window: usize) -> Option<(f64, u64)> {
        let n = self.recent_outcomes.len().min(window);
        if n == 0 {
            return None;
        }
        let ok = self.recent_outcomes.iter().rev().take(n).filter(|s| **s).count();
        Some((ok as f64 / n as f64, n as u64))
    }

    pub fn average_cycle_duration_ms(&self) -> Option<u64> {
        let cycles = self.cycles_total + self.cycles_aborted;
        (cycles > 0).then(|| self.total_cycle_time_ms / cycles)
    }

    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }
}

/// Write side. Not `Clone`: there is exactly one writer.
#[derive(Debug)]
pub struct MetricsStore {
    current: MetricsSnapshot,
    window: usize,
    tx: watch::Sender<Arc<MetricsSnapshot>>,
}

/// Read side. Cheap to clone and hand to other tasks.
#[derive(Debug, Clone)]
pub struct MetricsReader {
    rx: watch::Receiver<Arc<MetricsSnapshot>>,
}

impl MetricsStore {
    pub fn new(started_at: DateTime<Utc>, window: usize) -> Self {
        let current = MetricsSnapshot::new(started_at);
        let (tx, _rx) = watch::channel(Arc::new(current.clone()));
        Self {
            current,
            window: window.max(1),
            tx,
        }
    }

    pub fn reader(&self) -> MetricsReader {
        MetricsReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn snapshot(&self) -> Arc<MetricsSnapshot> {
        self.tx.borrow().clone()
    }

    /// Fold a finished cycle in and publish the new snapshot.
    ///
    /// `consecutive_failures` and `failure_state` come from the failure
    /// controller, which has already seen the same cycle.
    pub fn record_cycle(
        &mut self,
        cycle: &Cycle,
        consecutive_failures: u32,
        failure_state: FailureState,
    ) -> Arc<MetricsSnapshot> {
        let m = &mut self.current;

        for stage in cycle.stages.iter() {
            m.stage_durations
                .entry(stage.stage.clone())
                .or_default()
                .observe(stage.duration());
        }

        m.last_cycle_index = Some(cycle.index);
        m.last_cycle_duration_ms = Some(millis(cycle.duration));
        m.total_cycle_time_ms = m.total_cycle_time_ms.saturating_add(millis(cycle.duration));
        m.consecutive_failures = consecutive_failures;
        m.failure_state = failure_state;
        m.updated_at = Some(cycle.ended_at);

        match cycle.outcome {
            CycleOutcome::Succeeded => {
                m.cycles_total += 1;
                m.cycles_success += 1;
                m.items_processed_total = m
                    .items_processed_total
                    .saturating_add(cycle.items_processed);
                m.last_success_at = Some(cycle.ended_at);
                push_bounded(&mut m.recent_outcomes, true, self.window);
            }
            CycleOutcome::Failed {
                ref stage,
                kind,
                ref message,
            } => {
                m.cycles_total += 1;
                m.cycles_failed += 1;
                m.last_failure = Some(LastFailure {
                    cycle: cycle.index,
                    stage: stage.clone(),
                    kind,
                    message: message.clone(),
                    at: cycle.ended_at,
                });
                push_bounded(&mut m.recent_outcomes, false, self.window);
            }
            CycleOutcome::Aborted { .. } => {
                m.cycles_aborted += 1;
            }
        }

        let snapshot = Arc::new(m.clone());
        self.tx.send_replace(snapshot.clone());
        snapshot
    }
}

fn push_bounded(q: &mut VecDeque<bool>, value: bool, cap: usize) {
    q.push_back(value);
    while q.len() > cap {
        q.pop_front();
    }
}

impl MetricsReader {
    /// Latest published snapshot. Never blocks on the writer.
    pub fn snapshot(&self) -> Arc<MetricsSnapshot> {
        self.rx.borrow().clone()
    }

    /// Wait for the next publication. Errors once the store is dropped.
    pub async fn changed(&mut self) -> Result<Arc<MetricsSnapshot>, watch::error::RecvError> {
        self.rx.changed().await?;
        Ok(self.rx.borrow_and_update().clone())
    }
}
