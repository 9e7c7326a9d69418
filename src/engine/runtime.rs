// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::cycle::{AbortReason, Cycle, CycleOutcome};
use crate::engine::metrics::{MetricsReader, MetricsSnapshot};
use crate::engine::pipeline::PipelineRunner;
use crate::engine::scheduler::{CycleScheduler, Drift, ScheduledWait};
use crate::engine::shutdown::ShutdownCoordinator;
use crate::errors::{PipeloopError, Result};
use crate::types::ExitStatus;

/// How the main loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Shutdown requested and the in-flight cycle drained in time.
    Drained,
    /// The grace period ran out (or a second signal arrived).
    Forced,
    /// `max_cycles` cycles completed.
    CycleLimit,
}

impl RunExit {
    pub fn exit_status(self) -> ExitStatus {
        match self {
            RunExit::Drained | RunExit::CycleLimit => ExitStatus::Clean,
            RunExit::Forced => ExitStatus::Forced,
        }
    }
}

/// One loop iteration: the cycle that ran and the wait before the next one.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub cycle: Cycle,
    pub scheduled: ScheduledWait,
    /// `scheduled.delay`, unless the failure controller is in backoff.
    pub next_wait: Duration,
}

/// Hook for side effects of the loop (status file, activity journal).
///
/// Called on the orchestrator task between cycles; implementations should be
/// quick and must not fail the loop.
pub trait RunObserver: Send {
    fn on_start(&mut self, _snapshot: &MetricsSnapshot) {}
    fn on_cycle(&mut self, report: &StepReport, snapshot: &MetricsSnapshot);
    /// `exit` carries the fatal error when the loop stopped on one.
    fn on_exit(
        &mut self,
        exit: std::result::Result<RunExit, &PipeloopError>,
        snapshot: &MetricsSnapshot,
    );
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after this many cycles (aborted ones included).
    pub max_cycles: Option<u64>,
    /// Log a one-line summary every N cycles; 0 disables.
    pub status_report_every: u64,
}

/// The main loop: cycle, record, wait, repeat until shutdown.
pub struct Orchestrator {
    name: String,
    runner: PipelineRunner,
    scheduler: CycleScheduler,
    shutdown: ShutdownCoordinator,
    options: RunOptions,
    observers: Vec<Box<dyn RunObserver>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("name", &self.name)
            .field("runner", &self.runner)
            .field("scheduler", &self.scheduler)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        name: impl Into<String>,
        runner: PipelineRunner,
        scheduler: CycleScheduler,
        shutdown: ShutdownCoordinator,
        options: RunOptions,
    ) -> Self {
        Self {
            name: name.into(),
            runner,
            scheduler,
            shutdown,
            options,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: impl RunObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn metrics_reader(&self) -> MetricsReader {
        self.runner.metrics_reader()
    }

    pub fn snapshot(&self) -> Arc<MetricsSnapshot> {
        self.runner.snapshot()
    }

    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Run one cycle and work out the wait that should follow it.
    pub async fn step(&mut self) -> Result<StepReport> {
        let cycle = self.runner.run_cycle(&self.shutdown).await?;
        let scheduled = self.scheduler.wait_after(cycle.duration);
        let next_wait = self.runner.failures().next_wait(scheduled.delay);

        match scheduled.drift {
            Some(Drift::Overrun {
                elapsed_secs,
                target_secs,
            }) => warn!(
                cycle = cycle.index,
                elapsed_ms = (elapsed_secs * 1000.0) as u64,
                target_ms = (target_secs * 1000.0) as u64,
                "cycle overran twice its interval; starting next cycle immediately"
            ),
            Some(Drift::ClockSkew { elapsed_secs }) => info!(
                cycle = cycle.index,
                elapsed_secs, "negative elapsed time clamped to zero"
            ),
            None => {}
        }

        match cycle.outcome {
            CycleOutcome::Succeeded => info!(
                cycle = cycle.index,
                elapsed_ms = cycle.duration.as_millis() as u64,
                items = cycle.items_processed,
                next_wait_ms = next_wait.as_millis() as u64,
                "cycle succeeded"
            ),
            CycleOutcome::Failed {
                ref stage,
                kind,
                ref message,
            } => warn!(
                cycle = cycle.index,
                stage = %stage,
                kind = %kind,
                error = %message,
                elapsed_ms = cycle.duration.as_millis() as u64,
                next_wait_ms = next_wait.as_millis() as u64,
                "cycle failed"
            ),
            CycleOutcome::Aborted { ref stage, reason } => info!(
                cycle = cycle.index,
                stage = ?stage,
                reason = %reason,
                "cycle aborted"
            ),
        }

        Ok(StepReport {
            cycle,
            scheduled,
            next_wait,
        })
    }

    /// Drive cycles until shutdown or the cycle limit.
    ///
    /// Returns `Err` only for a fatal stage fault; observers still get a
    /// final `on_exit` with the last snapshot.
    pub async fn run(mut self) -> Result<RunExit> {
        info!(
            pipeline = %self.name,
            stages = self.runner.stages().len(),
            interval_ms = self.scheduler.target().as_millis() as u64,
            "orchestrator started"
        );

        let snapshot = self.runner.snapshot();
        for observer in self.observers.iter_mut() {
            observer.on_start(&snapshot);
        }

        let result = self.run_loop().await;

        let snapshot = self.runner.snapshot();
        let exit = result.as_ref().copied();
        for observer in self.observers.iter_mut() {
            observer.on_exit(exit, &snapshot);
        }

        match result {
            Ok(exit) => info!(
                pipeline = %self.name,
                ?exit,
                cycles_total = snapshot.cycles_total,
                cycles_aborted = snapshot.cycles_aborted,
                "orchestrator stopped"
            ),
            Err(ref e) => warn!(pipeline = %self.name, error = %e, "orchestrator stopped on fatal error"),
        }
        result
    }

    async fn run_loop(&mut self) -> Result<RunExit> {
        let mut cycles_run: u64 = 0;

        loop {
            // Checked before starting the next cycle.
            if self.shutdown.is_requested() {
                return Ok(self.shutdown_exit());
            }

            let report = self.step().await?;
            cycles_run += 1;

            let snapshot = self.runner.snapshot();
            for observer in self.observers.iter_mut() {
                observer.on_cycle(&report, &snapshot);
            }

            if let CycleOutcome::Aborted {
                reason: AbortReason::Forced,
                ..
            } = report.cycle.outcome
            {
                return Ok(RunExit::Forced);
            }

            let every = self.options.status_report_every;
            if every > 0 && cycles_run % every == 0 {
                log_summary(&self.name, &snapshot);
            }

            if let Some(max) = self.options.max_cycles {
                if cycles_run >= max {
                    info!(cycles_run, "cycle limit reached");
                    return Ok(RunExit::CycleLimit);
                }
            }

            // Checked before the wait begins; the wait itself is interruptible.
            if self.shutdown.is_requested() {
                return Ok(self.shutdown_exit());
            }

            debug!(wait_ms = report.next_wait.as_millis() as u64, "waiting for next cycle");
            tokio::select! {
                _ = tokio::time::sleep(report.next_wait) => {}
                _ = self.shutdown.requested() => {
                    info!("shutdown requested during wait");
                }
            }
        }
    }

    fn shutdown_exit(&self) -> RunExit {
        if self.shutdown.is_forced() {
            RunExit::Forced
        } else {
            RunExit::Drained
        }
    }
}

fn log_summary(name: &str, m: &MetricsSnapshot) {
    info!(
        pipeline = %name,
        cycles_total = m.cycles_total,
        cycles_success = m.cycles_success,
        cycles_failed = m.cycles_failed,
        consecutive_failures = m.consecutive_failures,
        items_processed_total = m.items_processed_total,
        success_rate = m.success_rate().unwrap_or(0.0),
        avg_cycle_ms = m.average_cycle_duration_ms().unwrap_or(0),
        state = %m.failure_state,
        "status report"
    );
}
