// src/engine/failure.rs

//! Consecutive-failure tracking and backoff.

use std::time::Duration;

use crate::engine::cycle::CycleOutcome;
use crate::types::FailureState;

/// A state change produced by [`FailureController::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    EnteredBackoff { consecutive_failures: u32 },
    Recovered { after_failures: u32 },
}

/// `Normal`/`Backoff` state machine.
///
/// Pure and synchronous; the orchestrator owns the only instance.
#[derive(Debug, Clone)]
pub struct FailureController {
    threshold: u32,
    backoff_delay: Duration,
    consecutive: u32,
    state: FailureState,
}

impl FailureController {
    /// `threshold` is clamped to at least 1.
    pub fn new(threshold: u32, backoff_delay: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            backoff_delay,
            consecutive: 0,
            state: FailureState::Normal,
        }
    }

    pub fn state(&self) -> FailureState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn backoff_delay(&self) -> Duration {
        self.backoff_delay
    }

    /// Fold one cycle outcome in. Aborted cycles change nothing.
    pub fn record(&mut self, outcome: &CycleOutcome) -> Option<Transition> {
        match outcome {
            CycleOutcome::Aborted { .. } => None,
            CycleOutcome::Succeeded => {
                let after = self.consecutive;
                self.consecutive = 0;
                match self.state {
                    FailureState::Backoff => {
                        self.state = FailureState::Normal;
                        Some(Transition::Recovered {
                            after_failures: after,
                        })
                    }
                    FailureState::Normal => None,
                }
            }
            CycleOutcome::Failed { .. } => {
                self.consecutive = self.consecutive.saturating_add(1);
                if self.state == FailureState::Normal && self.consecutive >= self.threshold {
                    self.state = FailureState::Backoff;
                    Some(Transition::EnteredBackoff {
                        consecutive_failures: self.consecutive,
                    })
                } else {
                    None
                }
            }
        }
    }

    /// The scheduler's wait, or the extended delay while in backoff.
    pub fn next_wait(&self, scheduled: Duration) -> Duration {
        match self.state {
            FailureState::Normal => scheduled,
            FailureState::Backoff => self.backoff_delay,
        }
    }
}
