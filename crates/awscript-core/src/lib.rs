//! AWSIM-Script core library
//!
//! Parses scenario scripts, dispatches their commands to the simulator and
//! the autonomous stack through a [`Transport`], watches runtime feedback
//! until the ego vehicle reaches its goal, and sequences batches of scripts.

pub mod batch;
pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod monitor;
pub mod obs;
pub mod report;
pub mod result;
pub mod runner;
pub mod script;
pub mod telemetry;
pub mod transport;

/// Crate version, reported by `awscript --version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use batch::{discover_scripts, BatchError, BatchReport, BatchSequencer};
pub use cancel::CancelSignal;
pub use config::{ClientConfig, ConfigError};
pub use dispatch::{CommandDispatcher, DispatchError, DispatchPlan, DispatchRecord};
pub use monitor::{FeedbackMonitor, RuntimeState, Snapshot, WaitOutcome};
pub use result::{FailureKind, Outcome, ScenarioResult, ScenarioWarning, SkipReason};
pub use runner::{RunnerState, ScenarioRunner};
pub use script::{
    load_script, parse_script, CommandBody, CommandKind, EntityId, Gate, LoadError, ParseError,
    ScenarioCommand, ScenarioScript, SemanticError,
};
pub use transport::bridge::BridgeTransport;
pub use transport::{CallKind, ClientStatus, RecordingState, Transport, TransportError};
