//! Boundary to the simulator and the autonomous stack.
//!
//! Everything the client does to the outside world goes through the
//! [`Transport`] trait. [`bridge::BridgeTransport`] speaks newline-delimited
//! JSON to a bridge process; [`fakes::FakeTransport`] is an in-memory stand-in
//! for tests.

pub mod bridge;
pub mod error;
pub mod fakes;

use crate::monitor::RuntimeState;
use crate::script::{CommandKind, CommandParams, EntityId};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use error::{TransportError, TransportResult};

/// Stream of state updates for one subscription.
///
/// The stream ends when the underlying feed is lost.
pub type StateStream = BoxStream<'static, RuntimeState>;

/// Remote call a scenario command maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Spawn,
    SetRoute,
    SetVelocity,
    InjectEvent,
    SetGoal,
}

impl CallKind {
    /// Call for a command kind. `Wait` is handled locally and has none.
    pub fn for_command(kind: CommandKind) -> Option<Self> {
        match kind {
            CommandKind::Spawn => Some(CallKind::Spawn),
            CommandKind::Route => Some(CallKind::SetRoute),
            CommandKind::Speed => Some(CallKind::SetVelocity),
            CommandKind::Trigger => Some(CallKind::InjectEvent),
            CommandKind::Goal => Some(CallKind::SetGoal),
            CommandKind::Wait => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Spawn => "spawn",
            CallKind::SetRoute => "set_route",
            CallKind::SetVelocity => "set_velocity",
            CallKind::InjectEvent => "inject_event",
            CallKind::SetGoal => "set_goal",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positive acknowledgment of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: String,
}

/// Client status published to the monitoring side.
///
/// The numeric codes are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Stopped,
    Running,
    AutonomousMode,
}

impl ClientStatus {
    pub fn code(&self) -> u8 {
        match self {
            ClientStatus::Stopped => 1,
            ClientStatus::Running => 2,
            ClientStatus::AutonomousMode => 3,
        }
    }
}

/// State of the external trace recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    #[default]
    Unknown,
    Idle,
    Recording,
    WritingData,
    Written,
}

impl RecordingState {
    /// The recorder still holds data for the last scenario.
    pub fn is_busy(&self) -> bool {
        matches!(self, RecordingState::Recording | RecordingState::WritingData)
    }
}

/// Calls the client makes against the simulator and the autonomous stack.
///
/// Implementations must be shareable across the ordered lane, the gated lane
/// and the runner.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send one command and wait for its acknowledgment.
    async fn send_command(
        &self,
        entity: &EntityId,
        call: CallKind,
        params: &CommandParams,
    ) -> TransportResult<Ack>;

    /// Open a state feed for `entity`.
    async fn subscribe_state(&self, entity: &EntityId) -> TransportResult<StateStream>;

    /// Initialize localization of the ego at its spawn pose.
    async fn initialize_localization(
        &self,
        entity: &EntityId,
        params: &CommandParams,
    ) -> TransportResult<()>;

    /// Hand control of the ego to the autonomous stack.
    async fn engage(&self, entity: &EntityId) -> TransportResult<()>;

    async fn publish_status(&self, status: ClientStatus) -> TransportResult<()>;

    async fn recording_state(&self) -> TransportResult<RecordingState>;

    /// Clear the route held by the autonomous stack.
    async fn clear_route(&self) -> TransportResult<()>;

    /// Remove every actor spawned into the simulator.
    async fn remove_actors(&self) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_mapping() {
        assert_eq!(CallKind::for_command(CommandKind::Route), Some(CallKind::SetRoute));
        assert_eq!(CallKind::for_command(CommandKind::Goal), Some(CallKind::SetGoal));
        assert_eq!(CallKind::for_command(CommandKind::Wait), None);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ClientStatus::Stopped.code(), 1);
        assert_eq!(ClientStatus::Running.code(), 2);
        assert_eq!(ClientStatus::AutonomousMode.code(), 3);
    }

    #[test]
    fn test_recorder_busy_states() {
        assert!(RecordingState::WritingData.is_busy());
        assert!(RecordingState::Recording.is_busy());
        assert!(!RecordingState::Written.is_busy());
        assert!(!RecordingState::Unknown.is_busy());
    }
}
