use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque value handed from one stage to the next.
///
/// The orchestrator never looks inside a payload except to count processed
/// items after a successful cycle.
pub type Payload = serde_json::Value;

/// Why a stage did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The stage exceeded its time budget.
    Timeout,
    /// The stage reported or raised a failure.
    StageError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "StageTimeout"),
            FailureKind::StageError => write!(f, "StageError"),
        }
    }
}

/// Operating state of the failure controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailureState {
    #[default]
    Normal,
    Backoff,
}

impl fmt::Display for FailureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureState::Normal => write!(f, "normal"),
            FailureState::Backoff => write!(f, "backoff"),
        }
    }
}

/// Output format of an out-of-process stage.
///
/// - `Json`: stdout (or `output_file`) is parsed once as JSON.
/// - `Text`: stdout is passed on verbatim as a JSON string.
/// - `None`: output is ignored; the next stage receives `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
    None,
}

/// Process exit status of the `pipeloop` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Clean shutdown, or a control command that completed normally.
    Clean,
    /// Fatal startup error or unhandled fault.
    Fatal,
    /// `start` was invoked while another instance is alive.
    AlreadyRunning,
    /// The in-flight cycle was cut short after the shutdown grace period.
    Forced,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::Fatal => 1,
            // 2 is what clap uses for usage errors.
            ExitStatus::AlreadyRunning => 3,
            ExitStatus::Forced => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            ExitStatus::Clean.code(),
            ExitStatus::Fatal.code(),
            ExitStatus::AlreadyRunning.code(),
            ExitStatus::Forced.code(),
        ];
        assert_eq!(codes, [0, 1, 3, 4]);
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::StageError).unwrap();
        assert_eq!(json, r#""stage_error""#);
        assert_eq!(FailureKind::Timeout.to_string(), "StageTimeout");
    }
}
