// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks cadence / threshold sanity and the stage list.
/// - Resolves relative paths against the directory holding the file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config.with_base_dir(config_root_dir(path)))
}

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "PIPELOOP_CONFIG";

/// Config path used when `--config` is not given: `$PIPELOOP_CONFIG`, else
/// `Pipeloop.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    config_path_from_env(std::env::var_os(CONFIG_ENV_VAR))
}

fn config_path_from_env(var: Option<std::ffi::OsString>) -> PathBuf {
    match var {
        Some(v) if !v.is_empty() => PathBuf::from(v),
        _ => PathBuf::from("Pipeloop.toml"),
    }
}

/// Directory relative config paths are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "deploy/Pipeloop.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Pipeloop.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}
