// tests/control_files.rs

#![cfg(unix)]

use std::time::Duration;

use tempfile::TempDir;

use pipeloop::control::commands::{evaluate_from_status, render_check, render_status, start};
use pipeloop::control::journal::tail;
use pipeloop::control::status::read_status;
use pipeloop::control::{ControlPaths, JournalEvent};
use pipeloop::health::AlertCondition;
use pipeloop::types::{ExitStatus, FailureState};
use pipeloop_test_utils::builders::{ConfigFileBuilder, StageConfigBuilder};
use pipeloop_test_utils::{init_tracing, with_timeout};

fn two_stage_config(dir: &TempDir) -> pipeloop::config::ConfigFile {
    ConfigFileBuilder::new()
        .interval(Duration::from_millis(100))
        .health_enabled(false)
        .with_stage(StageConfigBuilder::new("produce", r#"printf '{"item_count": 3}'"#).build())
        .with_stage(
            StageConfigBuilder::new("forward", "cat")
                .timeout(Duration::from_secs(10))
                .persist()
                .build(),
        )
        .base_dir(dir.path())
        .build()
}

#[tokio::test]
async fn bounded_run_leaves_consistent_control_files() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let cfg = two_stage_config(&dir);
    let paths = ControlPaths::from_config(&cfg);

    let status = with_timeout(start(&cfg, Some(2)))
        .await
        .unwrap();
    assert_eq!(status, ExitStatus::Clean);

    // The pid file is released on exit.
    assert!(!paths.pid_file.exists());

    let doc = read_status(&paths.status_file).unwrap().unwrap();
    assert!(!doc.running);
    assert_eq!(doc.exit.as_deref(), Some("cycle_limit"));
    assert_eq!(doc.stages, vec!["produce", "forward"]);
    assert_eq!(doc.metrics.cycles_total, 2);
    assert_eq!(doc.metrics.cycles_success, 2);
    assert_eq!(doc.metrics.items_processed_total, 6);
    assert_eq!(doc.metrics.failure_state, FailureState::Normal);

    // Reading twice without activity in between yields identical documents.
    let again = read_status(&paths.status_file).unwrap().unwrap();
    assert_eq!(doc, again);

    let events: Vec<_> = tail(&paths.journal_file, 10)
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert_eq!(
        events,
        vec![
            JournalEvent::Started,
            JournalEvent::CycleSucceeded,
            JournalEvent::CycleSucceeded,
            JournalEvent::Stopped,
        ]
    );

    let artifact = cfg.artifact_dir().join("forward.json");
    let persisted: serde_json::Value =
        serde_json::from_slice(&std::fs::read(artifact).unwrap()).unwrap();
    assert_eq!(persisted["item_count"], 3);

    let rendered = render_status(false, Some(&doc), &tail(&paths.journal_file, 5).unwrap());
    assert!(rendered.contains("produce"));
}

#[tokio::test]
async fn failing_stage_is_journaled_with_its_name() {
    let dir = TempDir::new().unwrap();
    let cfg = ConfigFileBuilder::new()
        .interval(Duration::from_millis(50))
        .health_enabled(false)
        .failure_threshold(2)
        .with_stage(StageConfigBuilder::new("broken", "echo nope >&2; exit 7").build())
        .base_dir(dir.path())
        .build();
    let paths = ControlPaths::from_config(&cfg);

    with_timeout(start(&cfg, Some(2)))
        .await
        .unwrap();

    let entries = tail(&paths.journal_file, 10).unwrap();
    let failed: Vec<_> = entries
        .iter()
        .filter(|e| e.event == JournalEvent::CycleFailed)
        .collect();
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0].stage.as_deref(), Some("broken"));
    assert!(failed[0].message.as_deref().unwrap_or("").contains("nope"));
    assert!(entries.iter().any(|e| e.event == JournalEvent::BackoffEntered));

    let doc = read_status(&paths.status_file).unwrap().unwrap();
    assert_eq!(doc.metrics.failure_state, FailureState::Backoff);
    assert_eq!(doc.metrics.cycles_failed, 2);

    // Stopped process: reported down regardless of the published metrics.
    let report = evaluate_from_status(&cfg, Some(&doc), false, None);
    assert!(!report.service_alive);
    assert!(
        report
            .alerts
            .iter()
            .any(|a| a.condition == AlertCondition::ServiceDown)
    );
}

#[test]
fn check_lists_every_stage_in_order() {
    let dir = TempDir::new().unwrap();
    let cfg = two_stage_config(&dir);
    let out = render_check(&cfg);
    let produce = out.find("produce").unwrap();
    let forward = out.find("forward").unwrap();
    assert!(produce < forward);
    assert!(out.contains("forward.json"));
}
