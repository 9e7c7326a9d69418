// src/control/recorder.rs

//! Writes the status file and journal as the orchestrator runs.

use std::path::PathBuf;

use chrono::Utc;
use tokio::sync::watch;
use tracing::warn;

use crate::control::journal::{Journal, JournalEntry, JournalEvent};
use crate::control::status::{StatusDocument, write_status};
use crate::engine::{CycleOutcome, MetricsSnapshot, RunExit, RunObserver, StepReport};
use crate::errors::{PipeloopError, Result};
use crate::health::{HealthReport, LivenessFlag};
use crate::types::FailureState;

/// [`RunObserver`] backing the `status` and `logs` commands.
///
/// IO errors are logged and otherwise ignored; bookkeeping never stops the
/// pipeline.
#[derive(Debug)]
pub struct ControlRecorder {
    journal: Journal,
    status_path: PathBuf,
    pid: u32,
    pipeline: String,
    interval_ms: u64,
    stages: Vec<String>,
    health: Option<watch::Receiver<Option<HealthReport>>>,
    liveness: Option<LivenessFlag>,
    last_state: FailureState,
}

impl ControlRecorder {
    pub fn new(
        journal: Journal,
        status_path: impl Into<PathBuf>,
        pipeline: impl Into<String>,
        interval_ms: u64,
        stages: Vec<String>,
    ) -> Self {
        Self {
            journal,
            status_path: status_path.into(),
            pid: std::process::id(),
            pipeline: pipeline.into(),
            interval_ms,
            stages,
            health: None,
            liveness: None,
            last_state: FailureState::Normal,
        }
    }

    /// Include the monitor's latest report in the status file.
    pub fn with_health(mut self, reports: watch::Receiver<Option<HealthReport>>) -> Self {
        self.health = Some(reports);
        self
    }

    /// Flag to clear when the loop exits.
    pub fn with_liveness(mut self, flag: LivenessFlag) -> Self {
        self.liveness = Some(flag);
        self
    }

    fn document(
        &self,
        running: bool,
        snapshot: &MetricsSnapshot,
        exit: Option<String>,
        exit_error: Option<String>,
    ) -> StatusDocument {
        StatusDocument {
            pid: self.pid,
            running,
            updated_at: Utc::now(),
            pipeline: self.pipeline.clone(),
            interval_ms: self.interval_ms,
            stages: self.stages.clone(),
            metrics: snapshot.clone(),
            health: self.health.as_ref().and_then(|rx| rx.borrow().clone()),
            exit,
            exit_error,
        }
    }

    fn journal(&mut self, entry: JournalEntry) {
        if let Err(e) = self.journal.append(&entry) {
            warn!(path = %self.journal.path().display(), error = %e, "failed to append journal entry");
        }
    }

    fn publish(&self, doc: &StatusDocument) {
        if let Err(e) = write_status(&self.status_path, doc) {
            warn!(path = %self.status_path.display(), error = %e, "failed to write status file");
        }
    }
}

fn cycle_entry(report: &StepReport) -> JournalEntry {
    let cycle = &report.cycle;
    let elapsed = u64::try_from(cycle.duration.as_millis()).unwrap_or(u64::MAX);
    let entry = match cycle.outcome {
        CycleOutcome::Succeeded => JournalEntry::new(JournalEvent::CycleSucceeded)
            .items(cycle.items_processed),
        CycleOutcome::Failed {
            ref stage,
            kind,
            ref message,
        } => JournalEntry::new(JournalEvent::CycleFailed)
            .stage(stage)
            .failure(kind, message),
        CycleOutcome::Aborted { ref stage, reason } => {
            let entry = JournalEntry::new(JournalEvent::CycleAborted).message(reason.to_string());
            match stage {
                Some(stage) => entry.stage(stage),
                None => entry,
            }
        }
    };
    entry.cycle(cycle.index).elapsed_ms(elapsed)
}

impl RunObserver for ControlRecorder {
    fn on_start(&mut self, snapshot: &MetricsSnapshot) {
        self.journal(JournalEntry::new(JournalEvent::Started).message(self.pipeline.clone()));
        let doc = self.document(true, snapshot, None, None);
        self.publish(&doc);
    }

    fn on_cycle(&mut self, report: &StepReport, snapshot: &MetricsSnapshot) {
        self.journal(cycle_entry(report));

        if snapshot.failure_state != self.last_state {
            let event = match snapshot.failure_state {
                FailureState::Backoff => JournalEvent::BackoffEntered,
                FailureState::Normal => JournalEvent::BackoffLeft,
            };
            self.journal(
                JournalEntry::new(event)
                    .cycle(report.cycle.index)
                    .message(format!("next wait {}ms", report.next_wait.as_millis())),
            );
            self.last_state = snapshot.failure_state;
        }

        let doc = self.document(true, snapshot, None, None);
        self.publish(&doc);
    }

    fn on_exit(
        &mut self,
        exit: std::result::Result<RunExit, &PipeloopError>,
        snapshot: &MetricsSnapshot,
    ) {
        if let Some(ref flag) = self.liveness {
            flag.set(false);
        }
        let (label, entry, error) = match exit {
            Ok(exit) => {
                let label = match exit {
                    RunExit::Drained => "drained",
                    RunExit::Forced => "forced",
                    RunExit::CycleLimit => "cycle_limit",
                };
                (label, JournalEntry::new(JournalEvent::Stopped).message(label), None)
            }
            Err(PipeloopError::StageFatal { stage, message }) => (
                "fatal",
                JournalEntry::new(JournalEvent::Stopped)
                    .stage(stage)
                    .message(format!("fatal: {message}")),
                Some(format!("stage '{stage}': {message}")),
            ),
            Err(e) => (
                "fatal",
                JournalEntry::new(JournalEvent::Stopped).message(format!("fatal: {e}")),
                Some(e.to_string()),
            ),
        };
        self.journal(entry);
        let doc = self.document(false, snapshot, Some(label.to_string()), error);
        self.publish(&doc);
    }
}

/// Open the journal and build a recorder for the given paths.
pub fn recorder_for(
    paths: &crate::control::ControlPaths,
    journal_entries: usize,
    pipeline: &str,
    interval_ms: u64,
    stages: Vec<String>,
) -> Result<ControlRecorder> {
    let journal = Journal::open(&paths.journal_file, journal_entries)?;
    Ok(ControlRecorder::new(
        journal,
        &paths.status_file,
        pipeline,
        interval_ms,
        stages,
    ))
}
