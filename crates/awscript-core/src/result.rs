//! Per-scenario results and warnings.

use crate::runner::RunnerState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Error kind that ended a failed scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Parse,
    Transport,
    /// The bridge connection itself is gone.
    TransportDisconnected,
    FeedbackDisconnected,
    ExternalFault,
    Cancelled,
    Io,
}

impl FailureKind {
    /// Failures after which later scenarios cannot run either.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FailureKind::TransportDisconnected | FailureKind::FeedbackDisconnected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Parse => "parse",
            FailureKind::Transport => "transport",
            FailureKind::TransportDisconnected => "transport_disconnected",
            FailureKind::FeedbackDisconnected => "feedback_disconnected",
            FailureKind::ExternalFault => "external_fault",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Io => "io",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// An earlier scenario lost the transport.
    BatchAborted,
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BatchAborted => f.write_str("batch aborted"),
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed { kind: FailureKind, message: String },
    TimedOut { waited_ms: u64 },
    Skipped { reason: SkipReason },
}

impl Outcome {
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Outcome::Failed {
            kind,
            message: message.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed { .. } => "failed",
            Outcome::TimedOut { .. } => "timed_out",
            Outcome::Skipped { .. } => "skipped",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Failed { kind, .. } if kind.is_fatal())
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Non-fatal problem recorded during a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ScenarioWarning {
    /// A gated command's condition did not hold in time; the command was
    /// skipped.
    GatedCommandTimeout {
        index: usize,
        line: usize,
        gate: String,
        waited_ms: u64,
    },
    /// The trace recorder was still busy when the wait ran out.
    TraceWaitTimedOut { waited_ms: u64 },
    /// Resetting the simulator after the scenario failed.
    ResetFailed { message: String },
}

impl fmt::Display for ScenarioWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioWarning::GatedCommandTimeout {
                line,
                gate,
                waited_ms,
                ..
            } => write!(
                f,
                "line {line}: gate '{gate}' not satisfied after {waited_ms} ms, command skipped"
            ),
            ScenarioWarning::TraceWaitTimedOut { waited_ms } => {
                write!(f, "trace recorder still busy after {waited_ms} ms")
            }
            ScenarioWarning::ResetFailed { message } => write!(f, "reset failed: {message}"),
        }
    }
}

/// Terminal record of one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub run_id: Uuid,
    pub scenario: PathBuf,
    pub script_digest: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
    /// Last runner state; `None` when the runner never started.
    pub final_state: Option<RunnerState>,
    pub commands_sent: usize,
    pub warnings: Vec<ScenarioWarning>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ScenarioResult {
    /// Result for a scenario that never reached the runner.
    pub fn not_run(scenario: impl Into<PathBuf>, outcome: Outcome) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scenario: scenario.into(),
            script_digest: None,
            outcome,
            final_state: None,
            commands_sent: 0,
            warnings: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn skipped(scenario: impl Into<PathBuf>, reason: SkipReason) -> Self {
        Self::not_run(scenario, Outcome::Skipped { reason })
    }

    /// File name used in reports.
    pub fn name(&self) -> String {
        self.scenario
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.scenario.to_string_lossy().to_string())
    }
}
