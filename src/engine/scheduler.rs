// src/engine/scheduler.rs

//! Fixed-cadence wait computation.
//!
//! Pure: no clocks are read here. The orchestrator passes in how long the
//! last cycle took and gets back how long to sleep before the next one.

use std::time::Duration;

/// Informational signal that the measured elapsed time was unusual.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Drift {
    /// Elapsed was negative (clock skew); clamped to zero.
    ClockSkew { elapsed_secs: f64 },
    /// The cycle took at least twice the target interval.
    Overrun { elapsed_secs: f64, target_secs: f64 },
}

/// Result of [`CycleScheduler::wait`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledWait {
    pub delay: Duration,
    pub drift: Option<Drift>,
}

#[derive(Debug, Clone, Copy)]
pub struct CycleScheduler {
    target: Duration,
}

impl CycleScheduler {
    pub fn new(target: Duration) -> Self {
        Self { target }
    }

    pub fn target(&self) -> Duration {
        self.target
    }

    /// Wait before the next cycle given the previous cycle's elapsed seconds.
    ///
    /// - `elapsed >= target` → start immediately
    /// - otherwise `target - elapsed`
    /// - negative (or NaN) elapsed counts as zero
    pub fn wait(&self, elapsed_secs: f64) -> ScheduledWait {
        let target_secs = self.target.as_secs_f64();

        if elapsed_secs.is_nan() || elapsed_secs < 0.0 {
            return ScheduledWait {
                delay: self.target,
                drift: Some(Drift::ClockSkew { elapsed_secs }),
            };
        }

        if elapsed_secs >= target_secs {
            let drift = (elapsed_secs >= 2.0 * target_secs).then_some(Drift::Overrun {
                elapsed_secs,
                target_secs,
            });
            return ScheduledWait {
                delay: Duration::ZERO,
                drift,
            };
        }

        ScheduledWait {
            delay: Duration::from_secs_f64((target_secs - elapsed_secs).max(0.0)),
            drift: None,
        }
    }

    /// Convenience for monotonic measurements, which cannot be negative.
    pub fn wait_after(&self, elapsed: Duration) -> ScheduledWait {
        self.wait(elapsed.as_secs_f64())
    }
}
