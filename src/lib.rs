// src/lib.rs

pub mod cli;
pub mod config;
pub mod control;
pub mod engine;
pub mod errors;
pub mod health;
pub mod logging;
pub mod stage;
pub mod types;

use anyhow::{Context, Result};
use tracing::debug;

use crate::cli::{CliArgs, Command};
use crate::config::loader::{default_config_path, load_and_validate};
use crate::control::{ControlPaths, commands};
use crate::types::ExitStatus;

/// High-level entry point used by `main.rs`.
///
/// Loads the config (every subcommand needs it, if only to locate the state
/// directory) and dispatches to the matching command.
pub async fn run(args: CliArgs) -> Result<ExitStatus> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    let paths = ControlPaths::from_config(&cfg);
    debug!(config = %config_path.display(), state_dir = %paths.state_dir.display(), "config loaded");

    let status = match args.command {
        Command::Start { cycles } => commands::start(&cfg, cycles).await?,
        Command::Stop { timeout } => commands::stop(&paths, timeout).await?,
        Command::Status { json } => commands::status(&cfg, json)?,
        Command::Logs { lines } => commands::logs(&paths, lines)?,
        Command::Restart { timeout } => commands::restart(&cfg, timeout).await?,
        Command::Check => commands::check(&cfg)?,
        Command::Health { json, watch } => commands::health(&cfg, json, watch).await?,
    };
    Ok(status)
}
