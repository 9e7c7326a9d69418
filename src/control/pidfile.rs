// src/control/pidfile.rs

//! Single-instance guard and process signalling.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::errors::{PipeloopError, Result};

/// Holds the pid file for as long as the orchestrator runs; removes it on
/// drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: u32,
}

impl PidFile {
    /// Write our pid to `path`.
    ///
    /// Fails with [`PipeloopError::AlreadyRunning`] if the file names a live
    /// process. A stale file (dead pid, garbage contents) is replaced.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(existing) = read_pid(&path)? {
            if existing != std::process::id() && is_pid_alive(existing) {
                return Err(PipeloopError::AlreadyRunning(existing));
            }
            warn!(pid = existing, path = %path.display(), "removing stale pid file");
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let pid = std::process::id();
        fs::write(&path, format!("{pid}\n"))?;
        debug!(pid, path = %path.display(), "pid file written");
        Ok(Self { path, pid })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove the file if it still names us.
        if let Ok(Some(pid)) = read_pid(&self.path) {
            if pid == self.pid {
                let _ = fs::remove_file(&self.path);
            }
        }
    }
}

/// Pid recorded at `path`; `None` when the file is missing or unparsable.
pub fn read_pid(path: &Path) -> Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents.trim().parse::<u32>().ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Whether a process with this pid exists.
#[cfg(unix)]
pub fn is_pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // kill(pid, 0) probes without delivering a signal. EPERM means the
    // process exists but belongs to someone else.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_pid_alive(pid: u32) -> bool {
    pid == std::process::id()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    NotRunning,
    /// Exited after SIGTERM within the timeout.
    Exited,
    /// Needed SIGKILL.
    Killed,
}

/// SIGTERM, wait up to `timeout`, then SIGKILL.
#[cfg(unix)]
pub async fn terminate(pid: u32, timeout: Duration) -> Result<TerminateOutcome> {
    if !is_pid_alive(pid) {
        return Ok(TerminateOutcome::NotRunning);
    }
    let raw = libc::pid_t::try_from(pid)
        .map_err(|_| PipeloopError::ConfigError(format!("pid {pid} out of range")))?;

    info!(pid, "sending SIGTERM");
    send_signal(raw, libc::SIGTERM)?;

    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !is_pid_alive(pid) {
            return Ok(TerminateOutcome::Exited);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if !is_pid_alive(pid) {
        return Ok(TerminateOutcome::Exited);
    }
    warn!(pid, timeout_ms = timeout.as_millis() as u64, "process still alive; sending SIGKILL");
    send_signal(raw, libc::SIGKILL)?;
    Ok(TerminateOutcome::Killed)
}

#[cfg(unix)]
fn send_signal(pid: libc::pid_t, signal: libc::c_int) -> Result<()> {
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    // ESRCH: exited between the probe and the signal.
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err.into())
}

#[cfg(not(unix))]
pub async fn terminate(pid: u32, _timeout: Duration) -> Result<TerminateOutcome> {
    Err(PipeloopError::Other(anyhow::anyhow!(
        "stopping pid {pid} is only supported on unix"
    )))
}
