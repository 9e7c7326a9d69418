// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::config::duration;
use crate::types::OutputFormat;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [pipeline]
/// name = "scores"
/// interval = "60s"
/// failure_threshold = 5
///
/// [health]
/// success_rate_window = 20
///
/// [[stage]]
/// name = "fetch"
/// cmd = "python3 fetch.py"
/// timeout = "30s"
///
/// [[stage]]
/// name = "summarize"
/// cmd = "python3 summarize.py"
/// persist = true
/// ```
///
/// All sections except `[[stage]]` are optional and have reasonable
/// defaults. Stages run in the order they appear in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Cadence and failure policy from `[pipeline]`.
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// Alert policy from `[health]`.
    #[serde(default)]
    pub health: HealthSection,

    /// Pid/status/journal locations from `[control]`.
    #[serde(default)]
    pub control: ControlSection,

    /// Ordered stage list from `[[stage]]`.
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageConfig>,
}

/// Validated configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)` (see
/// `validate.rs`) or [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pipeline: PipelineSection,
    pub health: HealthSection,
    pub control: ControlSection,
    pub stages: Vec<StageConfig>,
    /// Directory that relative paths in the config are resolved against.
    base_dir: PathBuf,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            pipeline: raw.pipeline,
            health: raw.health,
            control: raw.control,
            stages: raw.stages,
            base_dir: PathBuf::from("."),
        }
    }

    /// Resolve relative paths against `dir` instead of the working directory.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Directory holding the pid file, status file and activity journal.
    pub fn state_dir(&self) -> PathBuf {
        self.resolve(&self.control.state_dir)
    }

    /// Directory that persisted stage artifacts are written to.
    pub fn artifact_dir(&self) -> PathBuf {
        match self.control.artifact_dir {
            Some(ref dir) => self.resolve(dir),
            None => self.state_dir().join("artifacts"),
        }
    }

    /// Effective timeout for a stage, falling back to `[pipeline].stage_timeout`.
    pub fn stage_timeout(&self, stage: &StageConfig) -> Duration {
        stage.timeout.unwrap_or(self.pipeline.stage_timeout)
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Display name used in logs and `status`.
    #[serde(default = "default_name")]
    pub name: String,

    /// Target cadence: one cycle starts every `interval`.
    #[serde(default = "default_interval", deserialize_with = "duration::deserialize")]
    pub interval: Duration,

    /// Consecutive failed cycles before entering backoff.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Backoff wait as a multiple of `interval` (used when `backoff_delay`
    /// is not set).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    /// Absolute backoff wait; overrides `backoff_multiplier`.
    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub backoff_delay: Option<Duration>,

    /// How long an in-flight stage may keep running after a shutdown request
    /// before it is forcibly aborted.
    #[serde(default = "default_shutdown_grace", deserialize_with = "duration::deserialize")]
    pub shutdown_grace: Duration,

    /// Timeout for stages that do not declare their own.
    #[serde(default = "default_stage_timeout", deserialize_with = "duration::deserialize")]
    pub stage_timeout: Duration,

    /// Key of the final stage's output object holding the number of items
    /// processed in the cycle.
    #[serde(default = "default_items_key")]
    pub items_key: String,

    /// Log a summary report every N cycles (0 disables).
    #[serde(default = "default_status_report_every")]
    pub status_report_every: u64,
}

fn default_name() -> String {
    "pipeline".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_backoff_multiplier() -> u32 {
    5
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_stage_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_items_key() -> String {
    "item_count".to_string()
}

fn default_status_report_every() -> u64 {
    10
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            interval: default_interval(),
            failure_threshold: default_failure_threshold(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_delay: None,
            shutdown_grace: default_shutdown_grace(),
            stage_timeout: default_stage_timeout(),
            items_key: default_items_key(),
            status_report_every: default_status_report_every(),
        }
    }
}

impl PipelineSection {
    /// The wait used while the failure controller is in backoff.
    pub fn effective_backoff_delay(&self) -> Duration {
        self.backoff_delay
            .unwrap_or_else(|| self.interval.saturating_mul(self.backoff_multiplier))
    }
}

/// `[health]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
    /// Run the in-process health monitor alongside the pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_poll_interval", deserialize_with = "duration::deserialize")]
    pub poll_interval: Duration,

    /// Trailing number of cycles for the success rate; lifetime when unset.
    #[serde(default)]
    pub success_rate_window: Option<usize>,

    /// Success-rate alerts are suppressed below this many observed cycles.
    #[serde(default = "default_min_cycles")]
    pub min_cycles: u64,

    #[serde(default = "default_success_rate_threshold")]
    pub success_rate_threshold: f64,

    /// Staleness alert fires after `staleness_factor × interval` without a
    /// successful cycle.
    #[serde(default = "default_staleness_factor")]
    pub staleness_factor: u32,

    /// Utilisation percentage above which cpu/mem/disk alerts fire.
    #[serde(default = "default_resource_threshold")]
    pub resource_threshold: f64,

    /// Lifetime failed-cycle count that raises a warning (0 disables).
    #[serde(default = "default_failed_cycles_threshold")]
    pub failed_cycles_threshold: u64,

    /// Mount point whose disk usage is sampled.
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_min_cycles() -> u64 {
    5
}

fn default_success_rate_threshold() -> f64 {
    0.5
}

fn default_staleness_factor() -> u32 {
    10
}

fn default_resource_threshold() -> f64 {
    90.0
}

fn default_failed_cycles_threshold() -> u64 {
    10
}

fn default_disk_path() -> String {
    "/".to_string()
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            poll_interval: default_poll_interval(),
            success_rate_window: None,
            min_cycles: default_min_cycles(),
            success_rate_threshold: default_success_rate_threshold(),
            staleness_factor: default_staleness_factor(),
            resource_threshold: default_resource_threshold(),
            failed_cycles_threshold: default_failed_cycles_threshold(),
            disk_path: default_disk_path(),
        }
    }
}

/// `[control]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlSection {
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    /// Maximum number of activity entries kept in the journal.
    #[serde(default = "default_journal_entries")]
    pub journal_entries: usize,

    /// Where `persist = true` stages write their output. Defaults to
    /// `<state_dir>/artifacts`.
    #[serde(default)]
    pub artifact_dir: Option<String>,
}

fn default_state_dir() -> String {
    ".pipeloop".to_string()
}

fn default_journal_entries() -> usize {
    500
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            journal_entries: default_journal_entries(),
            artifact_dir: None,
        }
    }
}

/// `[[stage]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    /// Unique stage name; also the artifact file name.
    pub name: String,

    /// Shell command. The stage input is written to its stdin as JSON.
    pub cmd: String,

    #[serde(default, deserialize_with = "duration::deserialize_opt")]
    pub timeout: Option<Duration>,

    /// How to read the stage output.
    #[serde(default)]
    pub output: OutputFormat,

    /// Read the output from this file after the command exits instead of
    /// from stdout.
    #[serde(default)]
    pub output_file: Option<String>,

    /// Working directory for the command (relative to the config file).
    #[serde(default)]
    pub cwd: Option<String>,

    /// Extra environment variables for the command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Write the output to `<artifact_dir>/<name>.json` after success.
    #[serde(default)]
    pub persist: bool,
}
