// src/stage/executor.rs

//! Runs one stage under its timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::{PipeloopError, Result};
use crate::stage::result::{StageResult, StageTiming};
use crate::stage::{Stage, StageFailure};
use crate::types::{FailureKind, Payload};

/// Aborts the wrapped task when dropped.
///
/// The executor future itself can be dropped mid-flight (forced shutdown
/// races it against the grace deadline), so the stage task must not outlive
/// it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Stateless stage runner.
///
/// Every way a stage can end maps onto a [`StageResult`], except
/// [`StageFailure::Fatal`], which comes back as
/// [`PipeloopError::StageFatal`] so the orchestrator can stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageExecutor;

impl StageExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run `stage` with `input`, giving up after `timeout`.
    ///
    /// - success → result with `output`
    /// - elapsed → `Timeout`; the stage task is aborted
    /// - `Failed` or a panic → `StageError`
    pub async fn run(
        &self,
        stage: Arc<dyn Stage>,
        input: Payload,
        timeout: Duration,
    ) -> Result<StageResult> {
        let name = stage.name().to_string();
        let timing = StageTiming::begin();

        debug!(stage = %name, timeout_ms = timeout.as_millis() as u64, "stage starting");

        // `execute` itself runs inside the task so a panic while building the
        // stage future is caught like any other.
        let mut task = AbortOnDrop(tokio::spawn(async move { stage.execute(input).await }));
        let joined = tokio::time::timeout(timeout, &mut task.0).await;
        let timing = timing.finish();

        let result = match joined {
            Err(_elapsed) => {
                task.0.abort();
                warn!(
                    stage = %name,
                    timeout_ms = timeout.as_millis() as u64,
                    "stage timed out"
                );
                StageResult::failed(
                    &name,
                    timing,
                    FailureKind::Timeout,
                    format!("stage '{}' exceeded its timeout of {:?}", name, timeout),
                )
            }
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "stage task was cancelled".to_string()
                };
                warn!(stage = %name, error = %message, "stage panicked");
                StageResult::failed(&name, timing, FailureKind::StageError, message)
            }
            Ok(Ok(Ok(output))) => StageResult::succeeded(&name, timing, output),
            Ok(Ok(Err(StageFailure::Failed(message)))) => {
                warn!(stage = %name, error = %message, "stage failed");
                StageResult::failed(&name, timing, FailureKind::StageError, message)
            }
            Ok(Ok(Err(StageFailure::Fatal(message)))) => {
                return Err(PipeloopError::StageFatal {
                    stage: name,
                    message,
                });
            }
        };

        debug!(
            stage = %result.stage,
            success = result.is_success(),
            duration_ms = result.duration().as_millis() as u64,
            "stage finished"
        );

        Ok(result)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("stage panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("stage panicked: {s}")
    } else {
        "stage panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::FnStage;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn arc<S: Stage + 'static>(s: S) -> Arc<dyn Stage> {
        Arc::new(s)
    }

    #[tokio::test]
    async fn success_carries_output() {
        let stage = arc(FnStage::new("echo", Duration::from_secs(1), |input| async move {
            Ok(input)
        }));
        let res = StageExecutor::new()
            .run(stage, json!({"a": 1}), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(res.is_success());
        assert_eq!(res.output, Some(json!({"a": 1})));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_timeout_and_stops_the_stage() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let stage = arc(FnStage::new("slow", Duration::from_secs(1), move |_| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(json!(null))
            }
        }));

        let res = StageExecutor::new()
            .run(stage, json!(null), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(res.failure_kind(), Some(FailureKind::Timeout));
        assert!(res.output.is_none());
        assert!(res.duration() >= Duration::from_secs(1));

        // Give the aborted task every chance to run to completion.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn reported_failure_is_stage_error() {
        let stage = arc(FnStage::new("bad", Duration::from_secs(1), |_| async {
            Err(StageFailure::failed("upstream returned 503"))
        }));
        let res = StageExecutor::new()
            .run(stage, json!(null), Duration::from_secs(1))
            .await
            .unwrap();

        let failure = res.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::StageError);
        assert_eq!(failure.message, "upstream returned 503");
    }

    #[tokio::test]
    async fn panic_is_absorbed_as_stage_error() {
        let stage = arc(FnStage::new("boom", Duration::from_secs(1), |_| async {
            if true {
                panic!("index out of range");
            }
            Ok(json!(null))
        }));
        let res = StageExecutor::new()
            .run(stage, json!(null), Duration::from_secs(1))
            .await
            .unwrap();

        let failure = res.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::StageError);
        assert!(failure.message.contains("index out of range"));
    }

    #[tokio::test]
    async fn panic_before_the_future_is_built_is_stage_error() {
        let stage = arc(FnStage::new("eager", Duration::from_secs(1), |input: Payload| {
            let n = input.as_u64().expect("input must be a number");
            async move { Ok(json!(n)) }
        }));
        let res = StageExecutor::new()
            .run(stage, json!({"not": "a number"}), Duration::from_secs(1))
            .await
            .unwrap();

        let failure = res.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::StageError);
        assert!(failure.message.contains("input must be a number"));
    }

    #[tokio::test]
    async fn fatal_failure_propagates() {
        let stage = arc(FnStage::new("broken", Duration::from_secs(1), |_| async {
            Err(StageFailure::fatal("invariant violated"))
        }));
        let err = StageExecutor::new()
            .run(stage, json!(null), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, PipeloopError::StageFatal { ref stage, .. } if stage == "broken"));
    }
}
