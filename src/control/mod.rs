// src/control/mod.rs

//! Operator control surface.
//!
//! A running orchestrator leaves three files in the state directory:
//! - `pipeloop.pid`: single-instance guard, target of `stop`
//! - `status.json`: latest metrics snapshot and health report
//! - `journal.jsonl`: recent activity, one JSON object per line
//!
//! The subcommands in [`commands`] read and act on those files. `status` and
//! `health` also list the persisted stage artifacts (see [`artifacts`]).

use std::path::{Path, PathBuf};

pub mod artifacts;
pub mod commands;
pub mod journal;
pub mod pidfile;
pub mod recorder;
pub mod status;

pub use journal::{Journal, JournalEntry, JournalEvent};
pub use pidfile::PidFile;
pub use recorder::ControlRecorder;
pub use status::StatusDocument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPaths {
    pub state_dir: PathBuf,
    pub pid_file: PathBuf,
    pub status_file: PathBuf,
    pub journal_file: PathBuf,
}

impl ControlPaths {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        let state_dir = state_dir.as_ref().to_path_buf();
        Self {
            pid_file: state_dir.join("pipeloop.pid"),
            status_file: state_dir.join("status.json"),
            journal_file: state_dir.join("journal.jsonl"),
            state_dir,
        }
    }

    pub fn from_config(cfg: &crate::config::ConfigFile) -> Self {
        Self::new(cfg.state_dir())
    }
}
