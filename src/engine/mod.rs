// src/engine/mod.rs

//! Orchestration engine for pipeloop.
//!
//! This module ties together:
//! - the pipeline runner (sequential stage chain, one cycle per call)
//! - the cycle scheduler (fixed cadence)
//! - the failure controller (consecutive failures, backoff)
//! - the metrics store (single writer, snapshot readers)
//! - the shutdown coordinator (drain, then force)
//!
//! The scheduler and failure controller are pure and synchronous; the async
//! shell that drives them lives in [`runtime`].

pub mod cycle;
pub mod failure;
pub mod metrics;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;
pub mod shutdown;

pub use cycle::{AbortReason, Cycle, CycleOutcome, Trigger};
pub use failure::{FailureController, Transition};
pub use metrics::{MetricsReader, MetricsSnapshot, MetricsStore, StageDurationStats};
pub use pipeline::PipelineRunner;
pub use runtime::{Orchestrator, RunExit, RunObserver, RunOptions, StepReport};
pub use scheduler::{CycleScheduler, Drift, ScheduledWait};
pub use shutdown::{ShutdownCoordinator, ShutdownState};
