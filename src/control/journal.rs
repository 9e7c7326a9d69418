// src/control/journal.rs

//! Activity journal: one JSON object per line, newest last.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;
use crate::types::FailureKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    Started,
    CycleSucceeded,
    CycleFailed,
    CycleAborted,
    BackoffEntered,
    BackoffLeft,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub at: DateTime<Utc>,
    pub event: JournalEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<u64>,
}

impl JournalEntry {
    pub fn new(event: JournalEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
            cycle: None,
            stage: None,
            kind: None,
            message: None,
            elapsed_ms: None,
            items: None,
        }
    }

    pub fn cycle(mut self, index: u64) -> Self {
        self.cycle = Some(index);
        self
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn failure(mut self, kind: FailureKind, message: impl Into<String>) -> Self {
        self.kind = Some(kind);
        self.message = Some(message.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn elapsed_ms(mut self, ms: u64) -> Self {
        self.elapsed_ms = Some(ms);
        self
    }

    pub fn items(mut self, items: u64) -> Self {
        self.items = Some(items);
        self
    }
}

/// Append-only JSON-lines file capped at `max_entries` lines.
///
/// The cap is enforced by rewriting the tail once the file has grown to
/// twice the cap, so appends stay cheap.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    max_entries: usize,
    lines: usize,
}

impl Journal {
    pub fn open(path: impl Into<PathBuf>, max_entries: usize) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lines = match File::open(&path) {
            Ok(f) => BufReader::new(f).lines().count(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            max_entries: max_entries.max(1),
            lines,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        self.lines += 1;

        if self.lines >= self.max_entries.saturating_mul(2) {
            self.compact()?;
        }
        Ok(())
    }

    fn compact(&mut self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let all: Vec<&str> = contents.lines().collect();
        let keep = &all[all.len().saturating_sub(self.max_entries)..];

        let tmp = self.path.with_extension("jsonl.tmp");
        let mut body = keep.join("\n");
        body.push('\n');
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;

        debug!(kept = keep.len(), dropped = all.len() - keep.len(), "journal compacted");
        self.lines = keep.len();
        Ok(())
    }
}

/// The newest `n` entries, oldest first. Malformed lines are skipped; a
/// missing journal reads as empty.
pub fn tail(path: &Path, n: usize) -> Result<Vec<JournalEntry>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut entries: Vec<JournalEntry> = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Ok(entry) = serde_json::from_str(&line) {
            entries.push(entry);
        }
    }
    let start = entries.len().saturating_sub(n);
    Ok(entries.split_off(start))
}
