// src/health/monitor.rs

//! Background polling task around [`HealthEvaluator`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::control::pidfile;
use crate::engine::MetricsReader;
use crate::health::{
    AlertCondition, HealthEvaluator, HealthReport, Liveness, ResourceSampler, ResourceSnapshot,
    Severity,
};

/// Answers "is the pipeline process alive?".
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self) -> bool;
}

/// In-process liveness: the orchestrator clears it when its loop exits.
#[derive(Debug, Clone)]
pub struct LivenessFlag(Arc<AtomicBool>);

impl LivenessFlag {
    pub fn new(alive: bool) -> Self {
        Self(Arc::new(AtomicBool::new(alive)))
    }

    pub fn set(&self, alive: bool) {
        self.0.store(alive, Ordering::SeqCst);
    }
}

impl LivenessProbe for LivenessFlag {
    fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Out-of-process liveness: checks whether a recorded pid still exists.
#[derive(Debug, Clone, Copy)]
pub struct PidProbe {
    pub pid: Option<u32>,
}

impl LivenessProbe for PidProbe {
    fn is_alive(&self) -> bool {
        self.pid.is_some_and(pidfile::is_pid_alive)
    }
}

/// Periodically evaluates health from the latest metrics snapshot.
pub struct HealthMonitor {
    evaluator: HealthEvaluator,
    metrics: MetricsReader,
    probe: Box<dyn LivenessProbe>,
    sampler: Option<ResourceSampler>,
    poll_interval: Duration,
}

/// Handle to a spawned monitor. Dropping it stops the task.
#[derive(Debug)]
pub struct HealthHandle {
    reports: watch::Receiver<Option<HealthReport>>,
    task: JoinHandle<()>,
}

impl HealthHandle {
    /// Latest report, `None` before the first poll.
    pub fn latest(&self) -> Option<HealthReport> {
        self.reports.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<HealthReport>> {
        self.reports.clone()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for HealthHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl HealthMonitor {
    pub fn new(
        evaluator: HealthEvaluator,
        metrics: MetricsReader,
        probe: impl LivenessProbe + 'static,
        poll_interval: Duration,
    ) -> Self {
        Self {
            evaluator,
            metrics,
            probe: Box::new(probe),
            sampler: None,
            poll_interval,
        }
    }

    pub fn with_sampler(mut self, sampler: ResourceSampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Evaluate once from the current inputs.
    ///
    /// Resource sampling reads `/proc` and the disk, so it runs on the
    /// blocking pool rather than the runtime's worker threads.
    pub async fn poll_once(&mut self) -> HealthReport {
        let resources = self.sample_resources().await;
        let liveness = Liveness {
            service_alive: self.probe.is_alive(),
            observed_at: Utc::now(),
        };
        let snapshot = self.metrics.snapshot();
        self.evaluator
            .evaluate(&snapshot, liveness, resources.as_ref())
    }

    async fn sample_resources(&mut self) -> Option<ResourceSnapshot> {
        let mut sampler = self.sampler.take()?;
        match tokio::task::spawn_blocking(move || {
            let snapshot = sampler.sample();
            (sampler, snapshot)
        })
        .await
        {
            Ok((sampler, snapshot)) => {
                self.sampler = Some(sampler);
                Some(snapshot)
            }
            Err(e) => {
                // The sampler went down with the task.
                error!(error = %e, "resource sampling failed; disabling it");
                None
            }
        }
    }

    /// Run on its own task. A panic in here ends the monitor only.
    pub fn spawn(mut self) -> HealthHandle {
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(async move {
            info!(
                poll_ms = self.poll_interval.as_millis() as u64,
                "health monitor started"
            );
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut active = BTreeSet::new();

            loop {
                ticker.tick().await;
                let report = self.poll_once().await;
                log_transitions(&mut active, &report);
                tx.send_replace(Some(report));
            }
        });

        HealthHandle { reports: rx, task }
    }
}

/// Log alerts when they are raised and when they clear, not on every poll.
fn log_transitions(active: &mut BTreeSet<AlertCondition>, report: &HealthReport) {
    let now: BTreeSet<_> = report.alerts.iter().map(|a| a.condition).collect();

    for alert in report.alerts.iter().filter(|a| !active.contains(&a.condition)) {
        match alert.severity {
            Severity::Critical => error!(
                condition = %alert.condition,
                value = alert.value,
                threshold = alert.threshold,
                "{}",
                alert.message
            ),
            Severity::Warning => warn!(
                condition = %alert.condition,
                value = alert.value,
                threshold = alert.threshold,
                "{}",
                alert.message
            ),
        }
    }
    for cleared in active.difference(&now) {
        info!(condition = %cleared, "alert cleared");
    }
    debug!(
        alerts = report.alerts.len(),
        success_rate = ?report.success_rate,
        staleness_secs = report.staleness_secs,
        "health evaluated"
    );

    *active = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MetricsStore;

    #[tokio::test(start_paused = true)]
    async fn spawned_monitor_publishes_reports() {
        let store = MetricsStore::new(Utc::now(), 10);
        let flag = LivenessFlag::new(true);
        let monitor = HealthMonitor::new(
            HealthEvaluator::default(),
            store.reader(),
            flag.clone(),
            Duration::from_secs(1),
        );
        let handle = monitor.spawn();
        let mut reports = handle.subscribe();

        reports.changed().await.unwrap();
        assert!(handle.latest().unwrap().service_alive);

        flag.set(false);
        reports.changed().await.unwrap();
        let report = handle.latest().unwrap();
        assert!(!report.service_alive);
        assert_eq!(report.worst_severity(), Some(Severity::Critical));
    }

    #[tokio::test]
    async fn poll_samples_resources_and_keeps_the_sampler() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetricsStore::new(Utc::now(), 10);
        let mut monitor = HealthMonitor::new(
            HealthEvaluator::default(),
            store.reader(),
            LivenessFlag::new(true),
            Duration::from_secs(1),
        )
        .with_sampler(ResourceSampler::new(dir.path()));

        for _ in 0..2 {
            let report = monitor.poll_once().await;
            let res = report.resources.expect("resources sampled");
            assert!((0.0..=100.0).contains(&res.memory_percent));
        }
        assert!(monitor.sampler.is_some());
    }

    #[test]
    fn pid_probe_without_pid_is_down() {
        assert!(!PidProbe { pid: None }.is_alive());
    }
}
