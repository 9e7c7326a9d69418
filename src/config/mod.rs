// src/config/mod.rs

//! Configuration loading and validation for pipeloop.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Parse human duration strings like `"60s"` (`duration.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate cadence, failure policy and the stage list (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ControlSection, HealthSection, PipelineSection, RawConfigFile, StageConfig,
};
pub use validate::validate_config;
