// src/control/commands.rs

//! Implementations of the `pipeloop` subcommands.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ConfigFile;
use crate::control::artifacts::{ArtifactInfo, list_artifacts, render_artifacts};
use crate::control::journal::{self, JournalEntry};
use crate::control::pidfile::{self, PidFile, TerminateOutcome};
use crate::control::recorder::recorder_for;
use crate::control::status::{StatusDocument, read_status};
use crate::control::ControlPaths;
use crate::engine::metrics::DEFAULT_OUTCOME_WINDOW;
use crate::engine::{
    CycleScheduler, FailureController, MetricsSnapshot, MetricsStore, Orchestrator,
    PipelineRunner, RunOptions, ShutdownCoordinator,
};
use crate::errors::Result;
use crate::health::{
    HealthEvaluator, HealthMonitor, HealthPolicy, HealthReport, Liveness, LivenessFlag,
    PidProbe, ResourceSampler, ResourceSnapshot,
};
use crate::stage::artifact::artifact_file;
use crate::stage::{CommandStage, PersistedStage, Stage};
use crate::types::ExitStatus;

/// Journal entries shown under "recent activity" in `status`.
const STATUS_RECENT_ENTRIES: usize = 5;

/// Build the stage list in config order.
pub fn build_stages(cfg: &ConfigFile) -> Vec<Arc<dyn Stage>> {
    let artifact_dir = cfg.artifact_dir();
    cfg.stages
        .iter()
        .map(|stage_cfg| {
            let stage: Arc<dyn Stage> = Arc::new(CommandStage::from_config(cfg, stage_cfg));
            if stage_cfg.persist {
                Arc::new(PersistedStage::new(stage, &artifact_dir)) as Arc<dyn Stage>
            } else {
                stage
            }
        })
        .collect()
}

/// Wire a ready-to-run orchestrator from config.
pub fn build_orchestrator(
    cfg: &ConfigFile,
    shutdown: ShutdownCoordinator,
    max_cycles: Option<u64>,
) -> Result<Orchestrator> {
    let window = cfg
        .health
        .success_rate_window
        .unwrap_or(DEFAULT_OUTCOME_WINDOW);
    let runner = PipelineRunner::new(
        build_stages(cfg),
        cfg.pipeline.items_key.clone(),
        MetricsStore::new(Utc::now(), window),
        FailureController::new(
            cfg.pipeline.failure_threshold,
            cfg.pipeline.effective_backoff_delay(),
        ),
    )?;

    Ok(Orchestrator::new(
        cfg.pipeline.name.clone(),
        runner,
        CycleScheduler::new(cfg.pipeline.interval),
        shutdown,
        RunOptions {
            max_cycles,
            status_report_every: cfg.pipeline.status_report_every,
        },
    ))
}

/// `pipeloop start`: run in the foreground until shutdown.
pub async fn start(cfg: &ConfigFile, max_cycles: Option<u64>) -> Result<ExitStatus> {
    let paths = ControlPaths::from_config(cfg);
    let _pid = PidFile::acquire(&paths.pid_file)?;

    let shutdown = ShutdownCoordinator::new(cfg.pipeline.shutdown_grace);
    let orchestrator = build_orchestrator(cfg, shutdown.clone(), max_cycles)?;

    let liveness = LivenessFlag::new(true);
    let stage_names = cfg.stages.iter().map(|s| s.name.clone()).collect();
    let mut recorder = recorder_for(
        &paths,
        cfg.control.journal_entries,
        &cfg.pipeline.name,
        u64::try_from(cfg.pipeline.interval.as_millis()).unwrap_or(u64::MAX),
        stage_names,
    )?
    .with_liveness(liveness.clone());

    let health = if cfg.health.enabled {
        let monitor = HealthMonitor::new(
            HealthEvaluator::new(HealthPolicy::from_config(cfg)),
            orchestrator.metrics_reader(),
            liveness,
            cfg.health.poll_interval,
        )
        .with_sampler(ResourceSampler::new(&cfg.health.disk_path));
        let handle = monitor.spawn();
        recorder = recorder.with_health(handle.subscribe());
        Some(handle)
    } else {
        debug!("health monitor disabled");
        None
    };

    let signals = shutdown.listen_for_signals();
    let result = orchestrator.with_observer(recorder).run().await;

    signals.abort();
    if let Some(handle) = health {
        handle.stop();
    }

    Ok(result?.exit_status())
}

/// `pipeloop stop`.
pub async fn stop(paths: &ControlPaths, timeout: Duration) -> Result<ExitStatus> {
    let Some(pid) = pidfile::read_pid(&paths.pid_file)? else {
        println!("pipeloop is not running (no pid file)");
        return Ok(ExitStatus::Clean);
    };

    match pidfile::terminate(pid, timeout).await? {
        TerminateOutcome::NotRunning => {
            println!("pipeloop is not running (stale pid {pid})");
            // The dead process cannot clean up after itself.
            let _ = std::fs::remove_file(&paths.pid_file);
        }
        TerminateOutcome::Exited => println!("stopped pipeloop (pid {pid})"),
        TerminateOutcome::Killed => {
            println!("pipeloop (pid {pid}) did not stop within {timeout:?}; killed");
            let _ = std::fs::remove_file(&paths.pid_file);
        }
    }
    Ok(ExitStatus::Clean)
}

/// `pipeloop restart`: stop any running instance, then start.
pub async fn restart(cfg: &ConfigFile, timeout: Duration) -> Result<ExitStatus> {
    let paths = ControlPaths::from_config(cfg);
    stop(&paths, timeout).await?;
    info!("starting pipeloop");
    start(cfg, None).await
}

/// Whether the process named in the status/pid file is alive right now.
fn process_alive(paths: &ControlPaths, doc: Option<&StatusDocument>) -> Result<bool> {
    let pid = pidfile::read_pid(&paths.pid_file)?.or(doc.map(|d| d.pid));
    Ok(pid.is_some_and(pidfile::is_pid_alive) && doc.is_none_or(|d| d.running))
}

/// `pipeloop status`. Read-only.
pub fn status(cfg: &ConfigFile, json: bool) -> Result<ExitStatus> {
    let paths = ControlPaths::from_config(cfg);
    let doc = read_status(&paths.status_file)?;
    let alive = process_alive(&paths, doc.as_ref())?;
    let recent = journal::tail(&paths.journal_file, STATUS_RECENT_ENTRIES)?;
    let artifacts = list_artifacts(cfg, SystemTime::now());

    if json {
        let value = serde_json::json!({
            "running": alive,
            "status": doc,
            "recent": recent,
            "artifacts": artifacts,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print!("{}", render_status(alive, doc.as_ref(), &recent));
        print!("{}", render_artifacts(&artifacts));
    }
    Ok(ExitStatus::Clean)
}

/// Human-readable `status` output.
pub fn render_status(
    alive: bool,
    doc: Option<&StatusDocument>,
    recent: &[JournalEntry],
) -> String {
    let mut out = String::new();
    let state = if alive { "running" } else { "stopped" };

    let Some(doc) = doc else {
        let _ = writeln!(out, "pipeloop: {state} (no status published yet)");
        return out;
    };

    let m = &doc.metrics;
    let _ = writeln!(out, "pipeline: {} ({state}, pid {})", doc.pipeline, doc.pid);
    let _ = writeln!(out, "updated:  {}", doc.updated_at.to_rfc3339());
    let _ = writeln!(out, "uptime:   {}s", m.uptime(doc.updated_at).as_secs());
    let _ = writeln!(out, "state:    {}", m.failure_state);
    let _ = writeln!(
        out,
        "cycles:   {} total, {} ok, {} failed, {} aborted",
        m.cycles_total, m.cycles_success, m.cycles_failed, m.cycles_aborted
    );
    if let Some(rate) = m.success_rate() {
        let _ = writeln!(out, "success:  {:.1}%", rate * 100.0);
    }
    let _ = writeln!(out, "streak:   {} consecutive failures", m.consecutive_failures);
    let _ = writeln!(out, "items:    {}", m.items_processed_total);
    match m.last_success_at {
        Some(at) => {
            let _ = writeln!(out, "last ok:  {}", at.to_rfc3339());
        }
        None => {
            let _ = writeln!(out, "last ok:  never");
        }
    }
    if let Some(ms) = m.last_cycle_duration_ms {
        let _ = writeln!(out, "last run: {ms}ms");
    }
    if let Some(ref f) = m.last_failure {
        let _ = writeln!(
            out,
            "last failure: cycle {} stage '{}' {}: {}",
            f.cycle, f.stage, f.kind, f.message
        );
    }
    if !m.stage_durations.is_empty() {
        let _ = writeln!(out, "stages:");
        for (name, s) in m.stage_durations.iter() {
            let _ = writeln!(
                out,
                "  {name:<16} runs {:>5}  mean {:>6}ms  max {:>6}ms",
                s.runs,
                s.mean_ms().unwrap_or(0),
                s.max_ms
            );
        }
    }
    if let Some(ref h) = doc.health {
        let _ = writeln!(out, "alerts:   {}", h.alerts.len());
        for a in h.alerts.iter() {
            let _ = writeln!(out, "  [{}] {}: {}", a.severity, a.condition, a.message);
        }
    }
    if let Some(ref exit) = doc.exit {
        match doc.exit_error {
            Some(ref err) => {
                let _ = writeln!(out, "exit:     {exit} ({err})");
            }
            None => {
                let _ = writeln!(out, "exit:     {exit}");
            }
        }
    }
    if !recent.is_empty() {
        let _ = writeln!(out, "recent activity:");
        for e in recent {
            let _ = writeln!(out, "  {}", render_entry(e));
        }
    }
    out
}

fn render_entry(e: &JournalEntry) -> String {
    let mut line = format!("{} {:?}", e.at.format("%Y-%m-%d %H:%M:%S"), e.event);
    if let Some(c) = e.cycle {
        let _ = write!(line, " cycle={c}");
    }
    if let Some(ref s) = e.stage {
        let _ = write!(line, " stage={s}");
    }
    if let Some(k) = e.kind {
        let _ = write!(line, " kind={k}");
    }
    if let Some(ms) = e.elapsed_ms {
        let _ = write!(line, " elapsed={ms}ms");
    }
    if let Some(ref m) = e.message {
        let _ = write!(line, " {m}");
    }
    line
}

/// `pipeloop logs`: newest `n` journal entries as JSON lines.
pub fn logs(paths: &ControlPaths, n: usize) -> Result<ExitStatus> {
    for entry in journal::tail(&paths.journal_file, n)? {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(ExitStatus::Clean)
}

/// `pipeloop check`: validate and print the pipeline without running it.
pub fn check(cfg: &ConfigFile) -> Result<ExitStatus> {
    // Also exercises the runner's own stage-list validation.
    PipelineRunner::new(
        build_stages(cfg),
        cfg.pipeline.items_key.clone(),
        MetricsStore::new(Utc::now(), 1),
        FailureController::new(cfg.pipeline.failure_threshold, Duration::ZERO),
    )?;
    print!("{}", render_check(cfg));
    Ok(ExitStatus::Clean)
}

pub fn render_check(cfg: &ConfigFile) -> String {
    let p = &cfg.pipeline;
    let mut out = String::new();
    let _ = writeln!(out, "pipeloop check: config OK");
    let _ = writeln!(out, "  pipeline.name = {}", p.name);
    let _ = writeln!(out, "  pipeline.interval = {:?}", p.interval);
    let _ = writeln!(out, "  pipeline.failure_threshold = {}", p.failure_threshold);
    let _ = writeln!(out, "  pipeline.backoff = {:?}", p.effective_backoff_delay());
    let _ = writeln!(out, "  pipeline.shutdown_grace = {:?}", p.shutdown_grace);
    let _ = writeln!(out, "  control.state_dir = {}", cfg.state_dir().display());
    let _ = writeln!(out, "  health.enabled = {}", cfg.health.enabled);
    let _ = writeln!(out);
    let _ = writeln!(out, "stages ({}):", cfg.stages.len());
    for (i, s) in cfg.stages.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, s.name);
        let _ = writeln!(out, "      cmd: {}", s.cmd);
        let _ = writeln!(out, "      timeout: {:?}", cfg.stage_timeout(s));
        let _ = writeln!(out, "      output: {:?}", s.output);
        if let Some(ref f) = s.output_file {
            let _ = writeln!(out, "      output_file: {f}");
        }
        if let Some(ref d) = s.cwd {
            let _ = writeln!(out, "      cwd: {d}");
        }
        if !s.env.is_empty() {
            let _ = writeln!(out, "      env: {:?}", s.env.keys().collect::<Vec<_>>());
        }
        if s.persist {
            let _ = writeln!(
                out,
                "      persist: {}",
                artifact_file(&cfg.artifact_dir(), &s.name).display()
            );
        }
    }
    out
}

/// One-shot evaluation from the published status.
pub fn evaluate_from_status(
    cfg: &ConfigFile,
    doc: Option<&StatusDocument>,
    alive: bool,
    resources: Option<&ResourceSnapshot>,
) -> HealthReport {
    let now = Utc::now();
    let metrics = match doc {
        Some(d) => d.metrics.clone(),
        None => MetricsSnapshot::new(now),
    };
    let liveness = Liveness {
        service_alive: alive,
        observed_at: now,
    };
    HealthEvaluator::new(HealthPolicy::from_config(cfg)).evaluate(&metrics, liveness, resources)
}

/// A health report plus the artifact listing, as `health` prints it.
#[derive(Debug, Serialize)]
pub struct HealthView {
    #[serde(flatten)]
    pub report: HealthReport,
    pub artifacts: Vec<ArtifactInfo>,
}

/// Evaluate once against the files the orchestrator publishes.
pub fn health_view(cfg: &ConfigFile, resources: &ResourceSnapshot) -> Result<HealthView> {
    let paths = ControlPaths::from_config(cfg);
    let doc = read_status(&paths.status_file)?;
    let pid = pidfile::read_pid(&paths.pid_file)?.or(doc.as_ref().map(|d| d.pid));
    let alive = crate::health::LivenessProbe::is_alive(&PidProbe { pid })
        && doc.as_ref().is_none_or(|d| d.running);

    Ok(HealthView {
        report: evaluate_from_status(cfg, doc.as_ref(), alive, Some(resources)),
        artifacts: list_artifacts(cfg, SystemTime::now()),
    })
}

/// `pipeloop health`. With `watch`, repeats until Ctrl-C.
pub async fn health(cfg: &ConfigFile, json: bool, watch: Option<Duration>) -> Result<ExitStatus> {
    let mut sampler = ResourceSampler::new(&cfg.health.disk_path);
    let mut resources = sampler.sample_settled().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let view = health_view(cfg, &resources)?;
        match (json, watch.is_some()) {
            // One object per line, so the stream can be piped.
            (true, true) => println!("{}", serde_json::to_string(&view)?),
            (true, false) => println!("{}", serde_json::to_string_pretty(&view)?),
            (false, true) => {
                println!("--- {}", view.report.evaluated_at.to_rfc3339());
                print!("{}", render_health_view(&view));
            }
            (false, false) => print!("{}", render_health_view(&view)),
        }

        let Some(every) = watch else { break };
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            res = &mut ctrl_c => {
                res?;
                debug!("health watch interrupted");
                break;
            }
        }
        resources = sampler.sample();
    }
    Ok(ExitStatus::Clean)
}

pub fn render_health_view(view: &HealthView) -> String {
    let mut out = render_health(&view.report);
    out.push_str(&render_artifacts(&view.artifacts));
    out
}

pub fn render_health(report: &HealthReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "service:   {}",
        if report.service_alive { "alive" } else { "down" }
    );
    match report.success_rate {
        Some(rate) => {
            let _ = writeln!(
                out,
                "success:   {:.1}% over {} cycles",
                rate * 100.0,
                report.success_rate_cycles
            );
        }
        None => {
            let _ = writeln!(out, "success:   n/a");
        }
    }
    let _ = writeln!(out, "staleness: {:.0}s", report.staleness_secs);
    if let Some(ref r) = report.resources {
        let _ = writeln!(
            out,
            "resources: cpu {:.1}%  mem {:.1}%  disk {}",
            r.cpu_percent,
            r.memory_percent,
            r.disk_percent
                .map(|d| format!("{d:.1}%"))
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
    if report.alerts.is_empty() {
        let _ = writeln!(out, "alerts:    none");
    } else {
        let _ = writeln!(out, "alerts:");
        for a in report.alerts.iter() {
            let _ = writeln!(out, "  [{}] {}: {}", a.severity, a.condition, a.message);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfigFile;
    use crate::control::journal::JournalEvent;

    fn cfg(extra: &str) -> ConfigFile {
        let raw: RawConfigFile = toml::from_str(&format!(
            r#"
[pipeline]
name = "scores"
interval = "1s"
{extra}

[[stage]]
name = "fetch"
cmd = "echo '{{}}'"

[[stage]]
name = "render"
cmd = "cat"
persist = true
"#
        ))
        .unwrap();
        ConfigFile::try_from(raw).unwrap()
    }

    #[test]
    fn build_stages_keeps_order_and_wraps_persisted() {
        let stages = build_stages(&cfg(""));
        let names: Vec<_> = stages.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["fetch", "render"]);
        assert!(format!("{:?}", stages[1]).contains("PersistedStage"));
    }

    #[test]
    fn render_check_lists_stages() {
        let text = render_check(&cfg(""));
        assert!(text.contains("1. fetch"));
        assert!(text.contains("2. render"));
        assert!(text.contains("persist:"));
    }

    #[test]
    fn render_status_without_document() {
        let text = render_status(false, None, &[]);
        assert!(text.contains("stopped"));
    }

    #[test]
    fn render_status_shows_last_failure_and_activity() {
        let mut metrics = MetricsSnapshot::new(Utc::now());
        metrics.cycles_total = 2;
        metrics.cycles_success = 1;
        metrics.cycles_failed = 1;
        metrics.last_failure = Some(crate::engine::metrics::LastFailure {
            cycle: 2,
            stage: "render".into(),
            kind: crate::types::FailureKind::Timeout,
            message: "too slow".into(),
            at: Utc::now(),
        });
        let doc = StatusDocument {
            pid: 7,
            running: true,
            updated_at: Utc::now(),
            pipeline: "scores".into(),
            interval_ms: 1000,
            stages: vec![],
            metrics,
            health: None,
            exit: None,
            exit_error: None,
        };
        let recent = vec![JournalEntry::new(JournalEvent::CycleFailed).cycle(2).stage("render")];

        let text = render_status(true, Some(&doc), &recent);
        assert!(text.contains("running"));
        assert!(text.contains("stage 'render' StageTimeout: too slow"));
        assert!(text.contains("cycle=2 stage=render"));
    }

    #[test]
    fn health_without_status_reports_service_down() {
        let report = evaluate_from_status(&cfg(""), None, false, None);
        assert!(!report.service_alive);
        assert!(render_health(&report).contains("service_down"));
    }

    #[test]
    fn health_view_lists_persisted_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(&format!(
            "\n[control]\nstate_dir = '{}'",
            dir.path().display()
        ));
        std::fs::create_dir_all(cfg.artifact_dir()).unwrap();
        std::fs::write(cfg.artifact_dir().join("render.json"), b"{\"ok\":true}").unwrap();

        let resources = ResourceSnapshot {
            cpu_percent: 5.0,
            memory_percent: 40.0,
            disk_percent: Some(50.0),
            sampled_at: Utc::now(),
        };
        let view = health_view(&cfg, &resources).unwrap();

        assert!(!view.report.service_alive);
        let [render] = view.artifacts.as_slice() else {
            panic!("expected only the persisted stage, got {:?}", view.artifacts);
        };
        assert_eq!(render.stage, "render");
        assert!(render.exists);
        assert_eq!(render.size_bytes, Some(11));

        let json = serde_json::to_value(&view).unwrap();
        assert!(json["alerts"].is_array());
        assert_eq!(json["artifacts"][0]["stage"], "render");
        assert!(render_health_view(&view).contains("render.json (11 bytes"));
    }
}
