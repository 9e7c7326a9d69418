// src/health/rules.rs

//! Alert rules. Each rule is evaluated independently of the others.

use std::time::Duration;

use crate::config::ConfigFile;
use crate::engine::MetricsSnapshot;
use crate::health::{Alert, AlertCondition, HealthReport, Liveness, ResourceSnapshot, Severity};

/// Thresholds the rules compare against.
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Nominal cycle interval; staleness is measured in multiples of it.
    pub interval: Duration,
    pub staleness_factor: u32,
    pub success_rate_threshold: f64,
    /// Success-rate alerts stay quiet below this many observed cycles.
    pub min_cycles: u64,
    /// Trailing window for the success rate; lifetime when `None`.
    pub success_rate_window: Option<usize>,
    pub resource_threshold: f64,
    /// 0 disables the rule.
    pub failed_cycles_threshold: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            staleness_factor: 10,
            success_rate_threshold: 0.5,
            min_cycles: 5,
            success_rate_window: None,
            resource_threshold: 90.0,
            failed_cycles_threshold: 10,
        }
    }
}

impl HealthPolicy {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            interval: cfg.pipeline.interval,
            staleness_factor: cfg.health.staleness_factor,
            success_rate_threshold: cfg.health.success_rate_threshold,
            min_cycles: cfg.health.min_cycles,
            success_rate_window: cfg.health.success_rate_window,
            resource_threshold: cfg.health.resource_threshold,
            failed_cycles_threshold: cfg.health.failed_cycles_threshold,
        }
    }

    pub fn staleness_limit(&self) -> Duration {
        self.interval.saturating_mul(self.staleness_factor)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthEvaluator {
    policy: HealthPolicy,
}

impl HealthEvaluator {
    pub fn new(policy: HealthPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Derive a report. Pure: same inputs, same report.
    pub fn evaluate(
        &self,
        metrics: &MetricsSnapshot,
        liveness: Liveness,
        resources: Option<&ResourceSnapshot>,
    ) -> HealthReport {
        let now = liveness.observed_at;
        let p = &self.policy;
        let mut alerts = Vec::new();
        let mut raise = |condition, severity, value: f64, threshold: f64, message: String| {
            alerts.push(Alert {
                condition,
                severity,
                value,
                threshold,
                raised_at: now,
                message,
            });
        };

        if !liveness.service_alive {
            raise(
                AlertCondition::ServiceDown,
                Severity::Critical,
                0.0,
                1.0,
                "pipeline process is not running".to_string(),
            );
        }

        let (success_rate, observed) = match p.success_rate_window {
            Some(window) => match metrics.windowed_success_rate(window) {
                Some((rate, n)) => (Some(rate), n),
                None => (None, 0),
            },
            None => (metrics.success_rate(), metrics.cycles_total),
        };
        if let Some(rate) = success_rate {
            if observed >= p.min_cycles && rate < p.success_rate_threshold {
                raise(
                    AlertCondition::LowSuccessRate,
                    Severity::Warning,
                    rate,
                    p.success_rate_threshold,
                    format!(
                        "success rate {:.1}% over {} cycles is below {:.1}%",
                        rate * 100.0,
                        observed,
                        p.success_rate_threshold * 100.0
                    ),
                );
            }
        }

        let since = metrics.last_success_at.unwrap_or(metrics.started_at);
        let staleness_secs = (now - since).num_milliseconds().max(0) as f64 / 1000.0;
        let limit = p.staleness_limit().as_secs_f64();
        if staleness_secs > limit {
            raise(
                AlertCondition::Stale,
                Severity::Warning,
                staleness_secs,
                limit,
                match metrics.last_success_at {
                    Some(_) => format!("no successful cycle for {staleness_secs:.0}s"),
                    None => format!("no successful cycle since start ({staleness_secs:.0}s ago)"),
                },
            );
        }

        if let Some(r) = resources {
            let checks = [
                (AlertCondition::HighCpu, "cpu", Some(r.cpu_percent)),
                (AlertCondition::HighMemory, "memory", Some(r.memory_percent)),
                (AlertCondition::HighDisk, "disk", r.disk_percent),
            ];
            for (condition, label, value) in checks {
                if let Some(v) = value {
                    if v > p.resource_threshold {
                        raise(
                            condition,
                            Severity::Warning,
                            v,
                            p.resource_threshold,
                            format!("{label} usage {v:.1}% above {:.1}%", p.resource_threshold),
                        );
                    }
                }
            }
        }

        if p.failed_cycles_threshold > 0 && metrics.cycles_failed > p.failed_cycles_threshold {
            raise(
                AlertCondition::FailedCyclesHigh,
                Severity::Warning,
                metrics.cycles_failed as f64,
                p.failed_cycles_threshold as f64,
                format!("{} failed cycles since start", metrics.cycles_failed),
            );
        }

        HealthReport {
            evaluated_at: now,
            service_alive: liveness.service_alive,
            success_rate,
            success_rate_cycles: observed,
            staleness_secs,
            resources: resources.cloned(),
            alerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn snapshot(total: u64, success: u64) -> MetricsSnapshot {
        let mut m = MetricsSnapshot::new(base_time());
        m.cycles_total = total;
        m.cycles_success = success;
        m.cycles_failed = total - success;
        m.last_success_at = Some(base_time());
        m
    }

    fn alive_soon() -> Liveness {
        Liveness::alive_at(base_time() + chrono::Duration::seconds(30))
    }

    #[test]
    fn low_success_rate_raises_exactly_one_warning() {
        let report = HealthEvaluator::default().evaluate(&snapshot(10, 3), alive_soon(), None);

        assert_eq!(report.success_rate, Some(0.3));
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].condition, AlertCondition::LowSuccessRate);
        assert_eq!(report.alerts[0].severity, Severity::Warning);
    }

    #[test]
    fn service_down_is_critical_regardless() {
        let liveness = Liveness::down_at(base_time());
        let report = HealthEvaluator::default().evaluate(&snapshot(10, 10), liveness, None);

        assert!(!report.service_alive);
        assert_eq!(report.worst_severity(), Some(Severity::Critical));
        assert!(report
            .alerts
            .iter()
            .any(|a| a.condition == AlertCondition::ServiceDown));
    }

    #[test]
    fn success_rate_is_suppressed_below_min_cycles() {
        let report = HealthEvaluator::default().evaluate(&snapshot(4, 0), alive_soon(), None);
        assert!(report.is_healthy());
    }

    #[test]
    fn staleness_measured_from_start_without_any_success() {
        let mut m = MetricsSnapshot::new(base_time());
        m.last_success_at = None;
        let later = Liveness::alive_at(base_time() + chrono::Duration::seconds(601));

        let report = HealthEvaluator::default().evaluate(&m, later, None);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].condition, AlertCondition::Stale);
        assert!((report.staleness_secs - 601.0).abs() < 1e-9);
    }

    #[test]
    fn resource_rules_fire_per_resource() {
        let resources = ResourceSnapshot {
            cpu_percent: 95.0,
            memory_percent: 40.0,
            disk_percent: Some(91.0),
            sampled_at: base_time(),
        };
        let report =
            HealthEvaluator::default().evaluate(&snapshot(10, 10), alive_soon(), Some(&resources));
        let conditions: Vec<_> = report.alerts.iter().map(|a| a.condition).collect();
        assert_eq!(conditions, vec![AlertCondition::HighCpu, AlertCondition::HighDisk]);
    }

    #[test]
    fn failed_cycle_count_rule() {
        let report = HealthEvaluator::default().evaluate(&snapshot(100, 89), alive_soon(), None);
        let conditions: Vec<_> = report.alerts.iter().map(|a| a.condition).collect();
        assert_eq!(conditions, vec![AlertCondition::FailedCyclesHigh]);
    }

    #[test]
    fn windowed_rate_uses_recent_outcomes() {
        let mut m = snapshot(20, 20);
        m.recent_outcomes = std::iter::repeat(true)
            .take(15)
            .chain(std::iter::repeat(false).take(5))
            .collect();
        let evaluator = HealthEvaluator::new(HealthPolicy {
            success_rate_window: Some(5),
            ..HealthPolicy::default()
        });

        let report = evaluator.evaluate(&m, alive_soon(), None);
        assert_eq!(report.success_rate, Some(0.0));
        assert_eq!(report.success_rate_cycles, 5);
        assert_eq!(report.alerts[0].condition, AlertCondition::LowSuccessRate);
    }
}
