// src/control/status.rs

//! Status file: the last published snapshot, readable by `status`/`health`.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::MetricsSnapshot;
use crate::errors::Result;
use crate::health::HealthReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDocument {
    pub pid: u32,
    /// `false` once the orchestrator has exited.
    pub running: bool,
    pub updated_at: DateTime<Utc>,
    pub pipeline: String,
    pub interval_ms: u64,
    pub stages: Vec<String>,
    pub metrics: MetricsSnapshot,
    #[serde(default)]
    pub health: Option<HealthReport>,
    /// How the last run ended, once it has.
    #[serde(default)]
    pub exit: Option<String>,
    /// The fault that stopped the loop, for a fatal exit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_error: Option<String>,
}

/// Replace the status file atomically.
pub fn write_status(path: &Path, doc: &StatusDocument) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// `None` when no status has been written yet.
pub fn read_status(path: &Path) -> Result<Option<StatusDocument>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> StatusDocument {
        StatusDocument {
            pid: 42,
            running: true,
            updated_at: Utc::now(),
            pipeline: "scores".into(),
            interval_ms: 60_000,
            stages: vec!["fetch".into(), "render".into()],
            metrics: MetricsSnapshot::new(Utc::now()),
            health: None,
            exit: None,
            exit_error: None,
        }
    }

    #[test]
    fn write_then_read_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/status.json");
        let d = doc();
        write_status(&path, &d).unwrap();

        let first = read_status(&path).unwrap().unwrap();
        let second = read_status(&path).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first, d);
    }

    #[test]
    fn missing_status_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_status(&dir.path().join("status.json")).unwrap().is_none());
    }
}
