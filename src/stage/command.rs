// src/stage/command.rs

//! Out-of-process stage backed by a shell command.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{ConfigFile, StageConfig};
use crate::stage::{Stage, StageFailure, StageFuture, StageOutcome};
use crate::types::{OutputFormat, Payload};

/// Lines of stderr kept in the failure message of a non-zero exit.
const STDERR_TAIL_LINES: usize = 10;

/// Runs `cmd` through the platform shell.
///
/// The stage input is written to the child's stdin as JSON. The child is
/// killed if the stage future is dropped, which is how timeouts and forced
/// shutdown reach it.
#[derive(Debug, Clone)]
pub struct CommandStage {
    name: String,
    cmd: String,
    timeout: Duration,
    output: OutputFormat,
    output_file: Option<PathBuf>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl CommandStage {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            timeout,
            output: OutputFormat::Json,
            output_file: None,
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Build from a `[[stage]]` entry, resolving paths against the config.
    pub fn from_config(cfg: &ConfigFile, stage: &StageConfig) -> Self {
        Self {
            name: stage.name.clone(),
            cmd: stage.cmd.clone(),
            timeout: cfg.stage_timeout(stage),
            output: stage.output,
            output_file: stage.output_file.as_ref().map(|p| cfg.resolve(p)),
            cwd: Some(match stage.cwd {
                Some(ref dir) => cfg.resolve(dir),
                None => cfg.base_dir().to_path_buf(),
            }),
            env: stage.env.clone(),
        }
    }

    pub fn with_output(mut self, output: OutputFormat) -> Self {
        self.output = output;
        self
    }

    pub fn with_output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn shell_command(&self) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.env)
            .env("PIPELOOP_STAGE", &self.name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(self: Arc<Self>, input: Payload) -> StageOutcome {
        info!(stage = %self.name, cmd = %self.cmd, "starting stage process");

        let stdin_bytes = serde_json::to_vec(&input)
            .map_err(|e| StageFailure::failed(format!("encoding stage input: {e}")))?;

        let mut child = self.shell_command().spawn().map_err(|e| {
            StageFailure::failed(format!("spawning process for stage '{}': {e}", self.name))
        })?;

        // Feed stdin from its own task so a child that never reads it cannot
        // wedge us before we start collecting output.
        if let Some(mut stdin) = child.stdin.take() {
            let stage = self.name.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&stdin_bytes).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        debug!(stage = %stage, error = %e, "writing stage stdin failed");
                    }
                }
                // Dropping stdin closes the pipe.
            });
        }

        let out = child.wait_with_output().await.map_err(|e| {
            StageFailure::failed(format!("waiting for process of stage '{}': {e}", self.name))
        })?;

        let code = out.status.code().unwrap_or(-1);
        info!(
            stage = %self.name,
            exit_code = code,
            success = out.status.success(),
            "stage process exited"
        );

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(StageFailure::failed(format!(
                "command exited with code {code}{}",
                stderr_tail(&stderr)
            )));
        }

        if !out.stderr.is_empty() {
            for line in String::from_utf8_lossy(&out.stderr).lines() {
                debug!(stage = %self.name, "stderr: {}", line);
            }
        }

        let raw = match self.output_file {
            Some(ref path) => tokio::fs::read(path).await.map_err(|e| {
                StageFailure::failed(format!(
                    "reading output file {} of stage '{}': {e}",
                    path.display(),
                    self.name
                ))
            })?,
            None => out.stdout,
        };

        parse_output(&self.name, self.output, &raw)
    }
}

impl Stage for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute(self: Arc<Self>, input: Payload) -> StageFuture {
        Box::pin(self.run(input))
    }
}

/// Decode a finished command's output according to `format`.
fn parse_output(stage: &str, format: OutputFormat, raw: &[u8]) -> StageOutcome {
    match format {
        OutputFormat::None => Ok(Payload::Null),
        OutputFormat::Text => Ok(Payload::String(String::from_utf8_lossy(raw).into_owned())),
        OutputFormat::Json => {
            if raw.iter().all(u8::is_ascii_whitespace) {
                warn!(stage = %stage, "stage produced no output; passing null");
                return Ok(Payload::Null);
            }
            serde_json::from_slice(raw).map_err(|e| {
                StageFailure::failed(format!("stage '{stage}' produced invalid JSON: {e}"))
            })
        }
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    format!(": {}", lines[start..].join("\n"))
}
