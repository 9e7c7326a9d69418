// src/stage/mod.rs

//! Stage abstraction and execution.
//!
//! A stage is a named unit of work with a timeout that turns one payload into
//! another. The orchestrator only ever sees the [`Stage`] trait; how a stage
//! does its work (in-process future, child process, its own parallel fetches)
//! is private to it.
//!
//! - [`executor`] runs a single stage under its timeout and normalises every
//!   outcome into a [`StageResult`].
//! - [`command`] adapts a shell command into a stage.
//! - [`artifact`] wraps a stage so its output is persisted after success.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::types::Payload;

pub mod artifact;
pub mod command;
pub mod executor;
pub mod result;

pub use artifact::PersistedStage;
pub use command::CommandStage;
pub use executor::StageExecutor;
pub use result::{StageFailureDetail, StageResult};

/// What a stage invocation resolves to.
pub type StageOutcome = std::result::Result<Payload, StageFailure>;

/// Boxed future returned by [`Stage::execute`].
///
/// The future must be `'static` so the executor can run it on its own task
/// and abort it when the timeout fires.
pub type StageFuture = Pin<Box<dyn Future<Output = StageOutcome> + Send + 'static>>;

/// Failure reported by a stage itself.
///
/// Timeouts are not represented here; the executor produces those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageFailure {
    /// Expected, recoverable failure. Fails the current cycle only.
    Failed(String),
    /// A bug or broken invariant. Propagates out of the loop and stops the
    /// orchestrator.
    Fatal(String),
}

impl StageFailure {
    pub fn failed(message: impl Into<String>) -> Self {
        StageFailure::Failed(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        StageFailure::Fatal(message.into())
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageFailure::Failed(msg) => write!(f, "{msg}"),
            StageFailure::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

/// A single pipeline stage.
pub trait Stage: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Upper bound on one invocation.
    fn timeout(&self) -> Duration;

    /// Turn `input` into the next stage's input.
    fn execute(self: Arc<Self>, input: Payload) -> StageFuture;
}

/// Stage backed by an async closure. Handy for in-process stages and tests.
pub struct FnStage<F> {
    name: String,
    timeout: Duration,
    func: F,
}

impl<F, Fut> FnStage<F>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageOutcome> + Send + 'static,
{
    pub fn new(name: impl Into<String>, timeout: Duration, func: F) -> Self {
        Self {
            name: name.into(),
            timeout,
            func,
        }
    }
}

impl<F> fmt::Debug for FnStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<F, Fut> Stage for FnStage<F>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageOutcome> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute(self: Arc<Self>, input: Payload) -> StageFuture {
        Box::pin((self.func)(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fn_stage_passes_input_through_closure() {
        let stage = Arc::new(FnStage::new("double", Duration::from_secs(1), |input| async move {
            let n = input.as_i64().ok_or_else(|| StageFailure::failed("not a number"))?;
            Ok(json!(n * 2))
        }));

        assert_eq!(stage.name(), "double");
        assert_eq!(stage.clone().execute(json!(21)).await, Ok(json!(42)));
        assert_eq!(
            stage.execute(json!("x")).await,
            Err(StageFailure::failed("not a number"))
        );
    }
}
