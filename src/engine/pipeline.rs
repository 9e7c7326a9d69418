// src/engine/pipeline.rs

//! Sequential stage chain: one call to [`PipelineRunner::run_cycle`] is one
//! cycle.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::cycle::{AbortReason, Cycle, CycleOutcome, Trigger};
use crate::engine::failure::{FailureController, Transition};
use crate::engine::metrics::{MetricsReader, MetricsSnapshot, MetricsStore};
use crate::engine::shutdown::ShutdownCoordinator;
use crate::errors::{PipeloopError, Result};
use crate::stage::result::{StageResult, StageTiming};
use crate::stage::{Stage, StageExecutor};
use crate::types::{FailureKind, FailureState, Payload};

/// Owns the stage list plus the state a cycle updates: metrics and the
/// failure controller.
#[derive(Debug)]
pub struct PipelineRunner {
    stages: Vec<Arc<dyn Stage>>,
    executor: StageExecutor,
    items_key: String,
    metrics: MetricsStore,
    failures: FailureController,
    next_index: u64,
}

impl PipelineRunner {
    /// Rejects an empty list, duplicate names and zero timeouts.
    pub fn new(
        stages: Vec<Arc<dyn Stage>>,
        items_key: impl Into<String>,
        metrics: MetricsStore,
        failures: FailureController,
    ) -> Result<Self> {
        validate_stages(&stages)?;
        Ok(Self {
            stages,
            executor: StageExecutor::new(),
            items_key: items_key.into(),
            metrics,
            failures,
            next_index: 1,
        })
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    pub fn metrics_reader(&self) -> MetricsReader {
        self.metrics.reader()
    }

    pub fn snapshot(&self) -> Arc<MetricsSnapshot> {
        self.metrics.snapshot()
    }

    pub fn failure_state(&self) -> FailureState {
        self.failures.state()
    }

    pub fn failures(&self) -> &FailureController {
        &self.failures
    }

    /// Run every stage in order, feeding each output to the next stage.
    ///
    /// Stops at the first failed stage. A shutdown request does not stop the
    /// chain; a forced shutdown abandons the in-flight stage and marks the
    /// cycle aborted. Metrics and the failure controller are updated exactly
    /// once, whatever the outcome. `Err` is returned only for a fatal stage
    /// fault, in which case nothing is recorded.
    pub async fn run_cycle(&mut self, shutdown: &ShutdownCoordinator) -> Result<Cycle> {
        let index = self.next_index;
        self.next_index += 1;

        let started_at = Utc::now();
        let start = Instant::now();
        let trigger = Trigger {
            cycle: index,
            at: started_at,
        };
        let mut input: Payload = serde_json::to_value(&trigger)?;
        let mut results = Vec::with_capacity(self.stages.len());
        let mut outcome = CycleOutcome::Succeeded;

        info!(cycle = index, stages = self.stages.len(), "cycle starting");

        for stage in self.stages.iter() {
            // A graceful request lets the cycle finish; only an expired grace
            // period (or a second request) cuts it short.
            if shutdown.is_forced() {
                warn!(cycle = index, stage = %stage.name(), "forced shutdown; skipping remaining stages");
                outcome = CycleOutcome::Aborted {
                    stage: Some(stage.name().to_string()),
                    reason: AbortReason::Forced,
                };
                break;
            }

            let timing = StageTiming::begin();
            let run = self.executor.run(stage.clone(), input, stage.timeout());
            let result = tokio::select! {
                res = run => res?,
                _ = shutdown.forced() => {
                    warn!(cycle = index, stage = %stage.name(), "forced shutdown; abandoning in-flight stage");
                    results.push(StageResult::failed(
                        stage.name(),
                        timing.finish(),
                        FailureKind::StageError,
                        "abandoned at forced shutdown",
                    ));
                    outcome = CycleOutcome::Aborted {
                        stage: Some(stage.name().to_string()),
                        reason: AbortReason::Forced,
                    };
                    input = Payload::Null;
                    break;
                }
            };

            match (&result.output, &result.failure) {
                (Some(output), _) => {
                    input = output.clone();
                    results.push(result);
                }
                (None, failure) => {
                    let (kind, message) = failure
                        .as_ref()
                        .map(|f| (f.kind, f.message.clone()))
                        .unwrap_or((FailureKind::StageError, String::new()));
                    warn!(
                        cycle = index,
                        stage = %result.stage,
                        kind = %kind,
                        error = %message,
                        "stage failed; aborting cycle"
                    );
                    outcome = CycleOutcome::Failed {
                        stage: result.stage.clone(),
                        kind,
                        message,
                    };
                    results.push(result);
                    input = Payload::Null;
                    break;
                }
            }
        }

        let items_processed = if outcome.is_success() {
            count_items(&input, &self.items_key)
        } else {
            0
        };

        let cycle = Cycle {
            index,
            started_at,
            ended_at: Utc::now(),
            duration: start.elapsed(),
            stages: results,
            outcome,
            items_processed,
        };

        match self.failures.record(&cycle.outcome) {
            Some(Transition::EnteredBackoff {
                consecutive_failures,
            }) => warn!(
                cycle = index,
                consecutive_failures,
                backoff_ms = self.failures.backoff_delay().as_millis() as u64,
                "failure threshold reached; entering backoff"
            ),
            Some(Transition::Recovered { after_failures }) => info!(
                cycle = index,
                after_failures, "cycle succeeded; leaving backoff"
            ),
            None => {}
        }

        self.metrics.record_cycle(
            &cycle,
            self.failures.consecutive_failures(),
            self.failures.state(),
        );

        debug!(
            cycle = index,
            elapsed_ms = cycle.duration.as_millis() as u64,
            outcome = ?cycle.outcome,
            "cycle recorded"
        );

        Ok(cycle)
    }
}

fn validate_stages(stages: &[Arc<dyn Stage>]) -> Result<()> {
    if stages.is_empty() {
        return Err(PipeloopError::InvalidPipeline(
            "pipeline needs at least one stage".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for stage in stages {
        if !seen.insert(stage.name()) {
            return Err(PipeloopError::InvalidPipeline(format!(
                "duplicate stage name '{}'",
                stage.name()
            )));
        }
        if stage.timeout().is_zero() {
            return Err(PipeloopError::InvalidPipeline(format!(
                "stage '{}' has a zero timeout",
                stage.name()
            )));
        }
    }
    Ok(())
}

/// Items reported by a final payload: an integer at `key` of an object, or
/// the length of an array. Anything else counts as zero.
pub fn count_items(output: &Payload, key: &str) -> u64 {
    match output {
        Payload::Object(map) => map.get(key).and_then(Payload::as_u64).unwrap_or(0),
        Payload::Array(items) => items.len() as u64,
        _ => 0,
    }
}
