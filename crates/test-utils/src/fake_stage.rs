use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pipeloop::stage::{Stage, StageFailure, StageFuture};
use pipeloop::types::Payload;
use serde_json::json;

/// What a [`ScriptedStage`] does on one invocation.
#[derive(Debug, Clone)]
pub enum Step {
    /// Return the input unchanged.
    Echo,
    Succeed(Payload),
    Fail(String),
    Fatal(String),
    Panic(String),
    /// Sleep, then return the input unchanged.
    Sleep(Duration),
}

/// A fake stage that:
/// - records every input it was invoked with
/// - plays back a script of [`Step`]s, repeating the last one forever.
pub struct ScriptedStage {
    name: String,
    timeout: Duration,
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: Arc<Mutex<Vec<Payload>>>,
}

impl fmt::Debug for ScriptedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedStage")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ScriptedStage {
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        let last = steps.last().cloned().unwrap_or(Step::Echo);
        Self {
            name: name.to_string(),
            timeout: Duration::from_secs(1),
            script: Mutex::new(steps.into()),
            last: Mutex::new(last),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always succeeds with `{"stage": name, "item_count": items}`.
    pub fn ok(name: &str, items: u64) -> Self {
        Self::new(
            name,
            vec![Step::Succeed(json!({"stage": name, "item_count": items}))],
        )
    }

    pub fn echo(name: &str) -> Self {
        Self::new(name, vec![Step::Echo])
    }

    pub fn failing(name: &str) -> Self {
        Self::new(name, vec![Step::Fail(format!("{name} failed"))])
    }

    /// Sleeps well past its own timeout on every call.
    pub fn hanging(name: &str) -> Self {
        Self::new(name, vec![Step::Sleep(Duration::from_secs(3600))])
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shared handle to the recorded inputs.
    pub fn calls(&self) -> Arc<Mutex<Vec<Payload>>> {
        Arc::clone(&self.calls)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn next_step(&self) -> Step {
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(step) => {
                *self.last.lock().unwrap() = step.clone();
                step
            }
            None => self.last.lock().unwrap().clone(),
        }
    }

    pub fn into_arc(self) -> Arc<dyn Stage> {
        Arc::new(self)
    }
}

impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn execute(self: Arc<Self>, input: Payload) -> StageFuture {
        self.calls.lock().unwrap().push(input.clone());
        let step = self.next_step();
        Box::pin(async move {
            match step {
                Step::Echo => Ok(input),
                Step::Succeed(v) => Ok(v),
                Step::Fail(msg) => Err(StageFailure::Failed(msg)),
                Step::Fatal(msg) => Err(StageFailure::Fatal(msg)),
                Step::Panic(msg) => panic!("{msg}"),
                Step::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(input)
                }
            }
        })
    }
}
