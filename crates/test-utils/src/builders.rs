#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use pipeloop::config::{
    ConfigFile, ControlSection, HealthSection, PipelineSection, RawConfigFile, StageConfig,
};
use pipeloop::types::OutputFormat;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
    base_dir: Option<std::path::PathBuf>,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                pipeline: PipelineSection::default(),
                health: HealthSection::default(),
                control: ControlSection::default(),
                stages: Vec::new(),
            },
            base_dir: None,
        }
    }

    pub fn with_stage(mut self, stage: StageConfig) -> Self {
        self.config.stages.push(stage);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.pipeline.interval = interval;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.pipeline.failure_threshold = threshold;
        self
    }

    pub fn backoff_delay(mut self, delay: Duration) -> Self {
        self.config.pipeline.backoff_delay = Some(delay);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.pipeline.shutdown_grace = grace;
        self
    }

    pub fn health_enabled(mut self, enabled: bool) -> Self {
        self.config.health.enabled = enabled;
        self
    }

    /// Resolve relative paths (state dir, stage cwd) against `dir`.
    pub fn base_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.base_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        let base_dir = self.base_dir;
        let cfg =
            ConfigFile::try_from(self.config).expect("Failed to build valid config from builder");
        match base_dir {
            Some(dir) => cfg.with_base_dir(dir),
            None => cfg,
        }
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `StageConfig`.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(name: &str, cmd: &str) -> Self {
        Self {
            stage: StageConfig {
                name: name.to_string(),
                cmd: cmd.to_string(),
                timeout: None,
                output: OutputFormat::Json,
                output_file: None,
                cwd: None,
                env: BTreeMap::new(),
                persist: false,
            },
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.stage.timeout = Some(timeout);
        self
    }

    pub fn output(mut self, output: OutputFormat) -> Self {
        self.stage.output = output;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.stage.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn persist(mut self) -> Self {
        self.stage.persist = true;
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}
