// src/control/artifacts.rs

//! What the persisted stages have left on disk.
//!
//! Only file metadata is read; artifacts can be large.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use tracing::debug;

use crate::config::ConfigFile;
use crate::stage::artifact::artifact_file;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub stage: String,
    pub path: PathBuf,
    pub exists: bool,
    pub size_bytes: Option<u64>,
    /// Seconds since the last write, from the file's mtime.
    pub age_secs: Option<u64>,
}

impl ArtifactInfo {
    fn inspect(stage: &str, path: PathBuf, now: SystemTime) -> Self {
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                let age_secs = meta
                    .modified()
                    .ok()
                    .map(|m| now.duration_since(m).map(|d| d.as_secs()).unwrap_or(0));
                Self {
                    stage: stage.to_string(),
                    path,
                    exists: true,
                    size_bytes: Some(meta.len()),
                    age_secs,
                }
            }
            res => {
                if let Err(ref e) = res {
                    debug!(path = %path.display(), error = %e, "artifact not readable");
                }
                Self {
                    stage: stage.to_string(),
                    path,
                    exists: false,
                    size_bytes: None,
                    age_secs: None,
                }
            }
        }
    }
}

/// One entry per `persist = true` stage, in config order.
pub fn list_artifacts(cfg: &ConfigFile, now: SystemTime) -> Vec<ArtifactInfo> {
    let persisted = cfg.stages.iter().filter(|s| s.persist).map(|s| s.name.as_str());
    list_in(&cfg.artifact_dir(), persisted, now)
}

fn list_in<'a>(
    dir: &Path,
    stages: impl Iterator<Item = &'a str>,
    now: SystemTime,
) -> Vec<ArtifactInfo> {
    stages
        .map(|name| ArtifactInfo::inspect(name, artifact_file(dir, name), now))
        .collect()
}

/// Text block appended to `status` and `health`; empty without persisted stages.
pub fn render_artifacts(artifacts: &[ArtifactInfo]) -> String {
    let mut out = String::new();
    if artifacts.is_empty() {
        return out;
    }
    let _ = writeln!(out, "artifacts:");
    for a in artifacts {
        match (a.size_bytes, a.age_secs) {
            (Some(size), Some(age)) if a.exists => {
                let _ = writeln!(
                    out,
                    "  {}: {} ({size} bytes, written {age}s ago)",
                    a.stage,
                    a.path.display()
                );
            }
            (Some(size), None) if a.exists => {
                let _ = writeln!(out, "  {}: {} ({size} bytes)", a.stage, a.path.display());
            }
            _ => {
                let _ = writeln!(out, "  {}: {} (missing)", a.stage, a.path.display());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn reports_size_and_age_of_present_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("summary.json"), b"{\"n\":1}").unwrap();

        let later = SystemTime::now() + Duration::from_secs(90);
        let list = list_in(dir.path(), ["summary", "report"].into_iter(), later);

        assert_eq!(list.len(), 2);
        assert!(list[0].exists);
        assert_eq!(list[0].size_bytes, Some(7));
        assert!(list[0].age_secs.is_some_and(|a| (89..=91).contains(&a)));

        assert_eq!(list[1].stage, "report");
        assert!(!list[1].exists);
        assert_eq!(list[1].size_bytes, None);
        assert!(list[1].path.ends_with("report.json"));
    }

    #[test]
    fn clock_behind_mtime_counts_as_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), b"[]").unwrap();

        let earlier = SystemTime::now() - Duration::from_secs(3600);
        let list = list_in(dir.path(), ["a"].into_iter(), earlier);
        assert_eq!(list[0].age_secs, Some(0));
    }

    #[test]
    fn rendering_marks_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("summary.json"), b"{}").unwrap();
        let list = list_in(dir.path(), ["summary", "report"].into_iter(), SystemTime::now());

        let text = render_artifacts(&list);
        assert!(text.starts_with("artifacts:"));
        assert!(text.contains("summary.json (2 bytes, written"));
        assert!(text.contains("report.json (missing)"));
        assert!(render_artifacts(&[]).is_empty());
    }
}
