// tests/pipeline_e2e.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use pipeloop::engine::{
    CycleOutcome, CycleScheduler, FailureController, MetricsStore, Orchestrator, PipelineRunner,
    RunOptions, ShutdownCoordinator,
};
use pipeloop::stage::Stage;
use pipeloop::types::{FailureKind, FailureState};
use pipeloop_test_utils::fake_stage::{ScriptedStage, Step};
use pipeloop_test_utils::init_tracing;

const INTERVAL: Duration = Duration::from_secs(60);

fn orchestrator(stages: Vec<Arc<dyn Stage>>, threshold: u32) -> Orchestrator {
    let runner = PipelineRunner::new(
        stages,
        "item_count",
        MetricsStore::new(Utc::now(), 100),
        FailureController::new(threshold, INTERVAL * 5),
    )
    .unwrap();
    Orchestrator::new(
        "e2e",
        runner,
        CycleScheduler::new(INTERVAL),
        ShutdownCoordinator::new(Duration::from_secs(30)),
        RunOptions::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn third_stage_timing_out_drives_pipeline_into_backoff() {
    init_tracing();

    let stages: Vec<Arc<ScriptedStage>> = vec![
        Arc::new(ScriptedStage::echo("fetch")),
        Arc::new(ScriptedStage::echo("parse")),
        Arc::new(ScriptedStage::hanging("convert").with_timeout(Duration::from_secs(5))),
        Arc::new(ScriptedStage::echo("render")),
        Arc::new(ScriptedStage::echo("publish")),
    ];
    let dyn_stages = stages.iter().map(|s| s.clone() as Arc<dyn Stage>).collect();
    let mut orch = orchestrator(dyn_stages, 5);
    let reader = orch.metrics_reader();

    for i in 1..=4 {
        let report = orch.step().await.unwrap();
        assert!(matches!(
            report.cycle.outcome,
            CycleOutcome::Failed { ref stage, kind: FailureKind::Timeout, .. } if stage == "convert"
        ));
        assert_eq!(reader.snapshot().failure_state, FailureState::Normal, "cycle {i}");
        // Scheduler only: 60s target minus the ~5s spent timing out.
        assert!(report.next_wait <= Duration::from_secs(55));
        assert!(report.next_wait > Duration::from_secs(54));
    }

    let fifth = orch.step().await.unwrap();
    let snap = reader.snapshot();
    assert_eq!(snap.failure_state, FailureState::Backoff);
    assert_eq!(snap.consecutive_failures, 5);
    assert_eq!(fifth.next_wait, INTERVAL * 5);

    assert_eq!(snap.cycles_total, 5);
    assert_eq!(snap.cycles_failed, 5);
    assert_eq!(snap.cycles_total, snap.cycles_success + snap.cycles_failed);

    // Stages after the failing one never ran.
    assert_eq!(stages[2].call_count(), 5);
    assert_eq!(stages[3].call_count(), 0);
    assert_eq!(stages[4].call_count(), 0);
    assert_eq!(snap.stage_durations["convert"].runs, 5);
    assert!(!snap.stage_durations.contains_key("render"));
}

#[tokio::test]
async fn outputs_are_threaded_stage_to_stage() {
    let first = Arc::new(ScriptedStage::new("first", vec![Step::Succeed(json!({"n": 1}))]));
    let second = Arc::new(ScriptedStage::echo("second"));
    let third = Arc::new(ScriptedStage::new(
        "third",
        vec![Step::Succeed(json!([1, 2, 3, 4]))],
    ));

    let mut orch = orchestrator(
        vec![
            first.clone() as Arc<dyn Stage>,
            second.clone(),
            third.clone(),
        ],
        5,
    );
    let report = orch.step().await.unwrap();

    assert!(report.cycle.outcome.is_success());
    assert_eq!(second.calls().lock().unwrap()[0], json!({"n": 1}));
    assert_eq!(third.calls().lock().unwrap()[0], json!({"n": 1}));
    assert_eq!(report.cycle.items_processed, 4);
    assert_eq!(orch.snapshot().items_processed_total, 4);

    let trigger = first.calls().lock().unwrap()[0].clone();
    assert_eq!(trigger["cycle"], json!(1));
}

#[tokio::test]
async fn success_after_failures_resets_and_leaves_backoff() {
    let flaky = Arc::new(ScriptedStage::new(
        "flaky",
        vec![
            Step::Fail("a".into()),
            Step::Fail("b".into()),
            Step::Echo,
        ],
    ));
    let mut orch = orchestrator(vec![flaky.clone() as Arc<dyn Stage>], 2);

    orch.step().await.unwrap();
    let second = orch.step().await.unwrap();
    assert_eq!(second.next_wait, INTERVAL * 5);
    assert_eq!(orch.snapshot().failure_state, FailureState::Backoff);

    let third = orch.step().await.unwrap();
    assert!(third.cycle.outcome.is_success());
    let snap = orch.snapshot();
    assert_eq!(snap.consecutive_failures, 0);
    assert_eq!(snap.failure_state, FailureState::Normal);
    assert!(snap.last_success_at.is_some());
    assert_eq!(snap.last_failure.as_ref().unwrap().message, "b");
    assert_ne!(third.next_wait, INTERVAL * 5);
}

#[tokio::test]
async fn panicking_stage_fails_the_cycle_but_not_the_loop() {
    let boom = Arc::new(ScriptedStage::new(
        "boom",
        vec![Step::Panic("unexpected shape".into()), Step::Echo],
    ));
    let mut orch = orchestrator(vec![boom as Arc<dyn Stage>], 5);

    let first = orch.step().await.unwrap();
    match first.cycle.outcome {
        CycleOutcome::Failed { kind, ref message, .. } => {
            assert_eq!(kind, FailureKind::StageError);
            assert!(message.contains("unexpected shape"));
        }
        ref other => panic!("expected failure, got {other:?}"),
    }

    let second = orch.step().await.unwrap();
    assert!(second.cycle.outcome.is_success());
    assert!(second.cycle.index > first.cycle.index);
}

#[tokio::test]
async fn fatal_stage_fault_surfaces_as_error() {
    let bug = Arc::new(ScriptedStage::new("bug", vec![Step::Fatal("corrupt state".into())]));
    let orch = orchestrator(vec![bug as Arc<dyn Stage>], 5);
    let reader = orch.metrics_reader();

    let err = orch.run().await.unwrap_err();
    assert!(err.to_string().contains("corrupt state"));
    assert_eq!(reader.snapshot().cycles_total, 0);
}

#[tokio::test]
async fn failing_first_stage_short_circuits_the_rest() {
    let downstream = Arc::new(ScriptedStage::echo("downstream"));
    let mut orch = orchestrator(
        vec![ScriptedStage::failing("upstream").into_arc(), downstream.clone()],
        5,
    );

    let report = orch.step().await.unwrap();
    match report.cycle.outcome {
        CycleOutcome::Failed { ref stage, kind, ref message } => {
            assert_eq!(stage, "upstream");
            assert_eq!(kind, FailureKind::StageError);
            assert_eq!(message, "upstream failed");
        }
        ref other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.cycle.stages.len(), 1);
    assert_eq!(downstream.call_count(), 0);
    assert_eq!(orch.snapshot().consecutive_failures, 1);
}
