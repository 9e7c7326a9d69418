// src/stage/artifact.rs

//! Persist a stage's output after it succeeds.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::stage::{Stage, StageFuture};
use crate::types::Payload;

/// Wraps a stage and writes its successful output to `<dir>/<name>.json`.
///
/// The file is replaced atomically (temp file + rename), so readers only ever
/// see a complete artifact from the latest successful run. A failed write is
/// logged and does not fail the stage.
#[derive(Debug)]
pub struct PersistedStage {
    inner: Arc<dyn Stage>,
    dir: PathBuf,
}

impl PersistedStage {
    pub fn new(inner: Arc<dyn Stage>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }

    pub fn artifact_path(&self) -> PathBuf {
        artifact_file(&self.dir, self.inner.name())
    }
}

/// Where a persisted stage named `stage` writes inside `dir`.
pub fn artifact_file(dir: &Path, stage: &str) -> PathBuf {
    dir.join(format!("{stage}.json"))
}

impl Stage for PersistedStage {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    fn execute(self: Arc<Self>, input: Payload) -> StageFuture {
        Box::pin(async move {
            let output = self.inner.clone().execute(input).await?;
            let path = self.artifact_path();
            match write_atomic(&path, &output).await {
                Ok(()) => debug!(stage = %self.name(), path = %path.display(), "artifact written"),
                Err(e) => warn!(
                    stage = %self.name(),
                    path = %path.display(),
                    error = %e,
                    "failed to persist stage artifact"
                ),
            }
            Ok(output)
        })
    }
}

async fn write_atomic(path: &Path, value: &Payload) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{FnStage, StageFailure};
    use serde_json::json;

    #[tokio::test]
    async fn successful_output_lands_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let inner: Arc<dyn Stage> = Arc::new(FnStage::new("summary", Duration::from_secs(1), |_| async {
            Ok(json!({"item_count": 2}))
        }));
        let stage = Arc::new(PersistedStage::new(inner, dir.path().join("artifacts")));

        let out = stage.clone().execute(json!(null)).await.unwrap();
        assert_eq!(out, json!({"item_count": 2}));

        let on_disk: Payload =
            serde_json::from_slice(&std::fs::read(stage.artifact_path()).unwrap()).unwrap();
        assert_eq!(on_disk, out);
        assert!(stage.artifact_path().ends_with("artifacts/summary.json"));
    }

    #[tokio::test]
    async fn failed_stage_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let inner: Arc<dyn Stage> = Arc::new(FnStage::new("summary", Duration::from_secs(1), |_| async {
            Err(StageFailure::failed("no data"))
        }));
        let stage = Arc::new(PersistedStage::new(inner, dir.path()));

        assert!(stage.clone().execute(json!(null)).await.is_err());
        assert!(!stage.artifact_path().exists());
    }

    #[tokio::test]
    async fn write_failure_does_not_fail_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the artifact directory should be.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();

        let inner: Arc<dyn Stage> = Arc::new(FnStage::new("summary", Duration::from_secs(1), |_| async {
            Ok(json!(1))
        }));
        let stage = Arc::new(PersistedStage::new(inner, &blocker));

        assert_eq!(stage.execute(json!(null)).await.unwrap(), json!(1));
    }
}
