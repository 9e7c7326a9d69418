// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipeloopError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// A stage reported a fault that must not be absorbed into a cycle
    /// failure. The orchestrator stops when it sees this.
    #[error("Fatal fault in stage '{stage}': {message}")]
    StageFatal { stage: String, message: String },

    #[error("pipeloop is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipeloopError>;
