//! Shared helpers for pipeloop's unit and integration tests.

pub mod builders;
pub mod fake_stage;

use std::future::Future;
use std::sync::{Arc, Once};
use std::time::Duration;

use pipeloop::engine::{MetricsReader, MetricsSnapshot};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Default budget for [`with_timeout`].
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialise tracing for tests.
///
/// Output goes through the test writer, so it only shows up for failing
/// tests unless run with `-- --nocapture`. Filter with `RUST_LOG`, e.g.
/// `RUST_LOG=pipeloop::engine=debug cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a [`TEST_TIMEOUT`] budget.
///
/// Under a paused tokio clock the budget auto-advances too, so only use
/// this around futures that make progress without sleeping for longer.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    within(TEST_TIMEOUT, f).await
}

/// Like [`with_timeout`] with an explicit budget.
pub async fn within<F, T>(budget: Duration, f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(budget, f)
        .await
        .unwrap_or_else(|_| panic!("test timed out after {budget:?}"))
}

/// Wait until a published snapshot satisfies `pred`, returning it.
///
/// Panics if the orchestrator (and so the metrics store) goes away first.
pub async fn wait_for_snapshot<P>(reader: &mut MetricsReader, mut pred: P) -> Arc<MetricsSnapshot>
where
    P: FnMut(&MetricsSnapshot) -> bool,
{
    let current = reader.snapshot();
    if pred(&current) {
        return current;
    }
    loop {
        let snap = reader
            .changed()
            .await
            .expect("metrics store dropped before the condition held");
        if pred(&snap) {
            return snap;
        }
    }
}

/// Wait until at least `n` cycles (completed or aborted) were recorded.
pub async fn wait_for_cycles(reader: &mut MetricsReader, n: u64) -> Arc<MetricsSnapshot> {
    wait_for_snapshot(reader, |m| m.cycles_total + m.cycles_aborted >= n).await
}
