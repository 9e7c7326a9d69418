// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::duration::parse_duration;

/// Command-line arguments for `pipeloop`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pipeloop",
    version,
    about = "Run a multi-stage pipeline on a fixed cadence with backoff and health alerts.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `$PIPELOOP_CONFIG`, else `Pipeloop.toml` in the current
    /// working directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `PIPELOOP_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

/// Operator commands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the orchestrator in the foreground until stopped.
    Start {
        /// Stop after this many cycles instead of running forever.
        #[arg(long, value_name = "N")]
        cycles: Option<u64>,
    },
    /// Ask a running instance to shut down gracefully.
    Stop {
        /// How long to wait before killing the process outright.
        #[arg(long, value_name = "DURATION", default_value = "60s", value_parser = parse_duration_arg)]
        timeout: Duration,
    },
    /// Show run state, the latest metrics snapshot and recent activity.
    Status {
        /// Print the raw status document as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print the most recent structured activity entries.
    Logs {
        /// Number of entries to show.
        #[arg(short = 'n', long, default_value_t = 20)]
        lines: usize,
    },
    /// Stop the running instance (if any) and start again in the foreground.
    Restart {
        #[arg(long, value_name = "DURATION", default_value = "60s", value_parser = parse_duration_arg)]
        timeout: Duration,
    },
    /// Parse + validate the config and print the pipeline without running it.
    Check,
    /// Evaluate health from the last published status and print alerts.
    Health {
        #[arg(long)]
        json: bool,
        /// Re-evaluate every DURATION until Ctrl-C.
        #[arg(long, value_name = "DURATION", value_parser = parse_watch_interval)]
        watch: Option<Duration>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s)
}

fn parse_watch_interval(s: &str) -> Result<Duration, String> {
    match parse_duration(s)? {
        d if d.is_zero() => Err("watch interval must be greater than zero".to_string()),
        d => Ok(d),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
