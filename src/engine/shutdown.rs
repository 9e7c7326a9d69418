// src/engine/shutdown.rs

//! Graceful shutdown: drain the in-flight cycle, force after a grace period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    /// A termination request arrived at `since`. The current stage may
    /// finish; no new stage or cycle starts.
    Draining { since: Instant },
    /// In-flight work must be abandoned now.
    Forced,
}

/// Shared shutdown flag.
///
/// Clones observe the same state. The first [`request`](Self::request)
/// starts draining; a second one (or the grace period running out) forces.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    tx: Arc<watch::Sender<ShutdownState>>,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        let (tx, _rx) = watch::channel(ShutdownState::Running);
        Self {
            tx: Arc::new(tx),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn state(&self) -> ShutdownState {
        *self.tx.borrow()
    }

    pub fn is_requested(&self) -> bool {
        self.state() != ShutdownState::Running
    }

    pub fn is_forced(&self) -> bool {
        self.state() == ShutdownState::Forced
    }

    /// Escalate one step and return the new state.
    pub fn request(&self) -> ShutdownState {
        self.tx.send_modify(|state| {
            *state = match *state {
                ShutdownState::Running => ShutdownState::Draining {
                    since: Instant::now(),
                },
                ShutdownState::Draining { .. } | ShutdownState::Forced => ShutdownState::Forced,
            };
        });
        self.state()
    }

    pub fn force(&self) {
        self.tx.send_if_modified(|state| {
            if *state == ShutdownState::Forced {
                false
            } else {
                *state = ShutdownState::Forced;
                true
            }
        });
    }

    /// Resolves once shutdown has been requested.
    pub async fn requested(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|s| *s != ShutdownState::Running).await;
    }

    /// Resolves once in-flight work must be abandoned: either a forcing
    /// request arrived, or the grace period since the first request expired.
    /// In the latter case the state is moved to `Forced` for everyone.
    pub async fn forced(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ShutdownState::Forced => return,
                ShutdownState::Running => {
                    if rx.changed().await.is_err() {
                        return std::future::pending().await;
                    }
                }
                ShutdownState::Draining { since } => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(since + self.grace) => {
                            warn!(grace_ms = self.grace.as_millis() as u64, "shutdown grace period expired");
                            self.force();
                            return;
                        }
                        changed = rx.changed() => {
                            if changed.is_err() {
                                return std::future::pending().await;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Translate SIGINT/SIGTERM into [`request`](Self::request) calls.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                wait_for_signal().await;
                match coordinator.request() {
                    ShutdownState::Draining { .. } => info!(
                        grace_ms = coordinator.grace.as_millis() as u64,
                        "shutdown requested; finishing in-flight stage (signal again to force)"
                    ),
                    ShutdownState::Forced => {
                        warn!("second shutdown request; forcing");
                        break;
                    }
                    ShutdownState::Running => {}
                }
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "could not install SIGTERM handler; only Ctrl-C will be honoured");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
