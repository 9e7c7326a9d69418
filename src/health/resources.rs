// src/health/resources.rs

//! cpu/memory/disk utilisation via `sysinfo`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// `None` when no mounted disk covers the configured path.
    pub disk_percent: Option<f64>,
    pub sampled_at: DateTime<Utc>,
}

/// Keeps a `System` around between samples; cpu usage is a delta between
/// two refreshes, so the first sample of a fresh sampler reads low.
pub struct ResourceSampler {
    sys: System,
    disk_path: PathBuf,
}

impl std::fmt::Debug for ResourceSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceSampler")
            .field("disk_path", &self.disk_path)
            .finish_non_exhaustive()
    }
}

impl ResourceSampler {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys,
            disk_path: disk_path.into(),
        }
    }

    pub fn sample(&mut self) -> ResourceSnapshot {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let cpu_percent = f64::from(self.sys.global_cpu_usage());
        let total = self.sys.total_memory();
        let memory_percent = if total > 0 {
            self.sys.used_memory() as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        let disk_percent = disk_usage(&self.disk_path);

        debug!(
            cpu = cpu_percent,
            memory = memory_percent,
            disk = ?disk_percent,
            "resource sample"
        );

        ResourceSnapshot {
            cpu_percent,
            memory_percent,
            disk_percent,
            sampled_at: Utc::now(),
        }
    }

    /// Sample after waiting long enough for a meaningful cpu reading.
    /// For one-shot callers that have no previous refresh to diff against.
    pub async fn sample_settled(&mut self) -> ResourceSnapshot {
        self.sys.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        self.sample()
    }
}

/// Usage of the disk whose mount point is the longest prefix of `path`.
fn disk_usage(path: &Path) -> Option<f64> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .and_then(|d| {
            let total = d.total_space();
            (total > 0).then(|| {
                total.saturating_sub(d.available_space()) as f64 / total as f64 * 100.0
            })
        })
}
