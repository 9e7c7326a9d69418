// src/stage/result.rs

//! Uniform per-stage result.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::types::{FailureKind, Payload};

/// Failure kind + message of a stage that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailureDetail {
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one stage within a cycle.
///
/// Wall-clock stamps are kept for display only; [`StageResult::duration`]
/// comes from the monotonic start/end instants.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    start: Instant,
    end: Instant,
    /// Present exactly when the stage succeeded.
    pub output: Option<Payload>,
    /// Present exactly when the stage failed.
    pub failure: Option<StageFailureDetail>,
}

/// Start/end stamps captured around a stage invocation.
#[derive(Debug, Clone, Copy)]
pub struct StageTiming {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub start: Instant,
    pub end: Instant,
}

impl StageTiming {
    /// Begin timing now. Call [`StageTiming::finish`] when the stage returns.
    pub fn begin() -> Self {
        let now = Instant::now();
        let wall = Utc::now();
        Self {
            started_at: wall,
            ended_at: wall,
            start: now,
            end: now,
        }
    }

    pub fn finish(mut self) -> Self {
        self.end = Instant::now();
        self.ended_at = Utc::now();
        self
    }
}

impl StageResult {
    pub fn succeeded(stage: impl Into<String>, timing: StageTiming, output: Payload) -> Self {
        Self {
            stage: stage.into(),
            started_at: timing.started_at,
            ended_at: timing.ended_at,
            start: timing.start,
            end: timing.end,
            output: Some(output),
            failure: None,
        }
    }

    pub fn failed(
        stage: impl Into<String>,
        timing: StageTiming,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            started_at: timing.started_at,
            ended_at: timing.ended_at,
            start: timing.start,
            end: timing.end,
            output: None,
            failure: Some(StageFailureDetail {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// `end - start` on the monotonic clock; never negative.
    pub fn duration(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn duration_matches_monotonic_span() {
        let timing = StageTiming::begin();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let timing = timing.finish();

        let result = StageResult::succeeded("fetch", timing, json!({}));
        assert_eq!(result.duration(), timing.end - timing.start);
        assert_eq!(result.duration(), Duration::from_millis(1500));
        assert!(result.is_success());
        assert!(result.ended_at >= result.started_at);
    }

    #[test]
    fn failed_result_carries_kind_and_no_output() {
        let timing = StageTiming::begin().finish();
        let result = StageResult::failed("fetch", timing, FailureKind::Timeout, "too slow");

        assert!(!result.is_success());
        assert!(result.output.is_none());
        assert_eq!(result.failure_kind(), Some(FailureKind::Timeout));
    }
}
