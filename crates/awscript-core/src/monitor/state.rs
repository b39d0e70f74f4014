//! Runtime state reported by the simulator and the autonomous stack.

use crate::script::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Motion state of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    #[default]
    Unknown,
    Stopped,
    Starting,
    Moving,
}

/// Routing state of the autonomous stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingState {
    #[default]
    Unknown,
    Unset,
    Set,
    Arrived,
    Changing,
}

/// External fault that ends a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum Fault {
    Collision,
    StackCrash,
    Other(String),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Collision => f.write_str("collision"),
            Fault::StackCrash => f.write_str("autonomous stack crashed"),
            Fault::Other(detail) => write!(f, "external fault: {detail}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Latest externally reported status of one entity.
///
/// `seq` is the sender's own sequence number; the monitor keeps the update
/// with the highest `seq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub entity: EntityId,
    pub seq: u64,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub lane: Option<String>,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub motion: MotionState,
    #[serde(default)]
    pub routing: RoutingState,
    #[serde(default)]
    pub autonomous_ready: bool,
    #[serde(default)]
    pub goal_reached: bool,
    #[serde(default)]
    pub fault: Option<Fault>,
}

impl RuntimeState {
    pub fn new(entity: impl Into<EntityId>, seq: u64) -> Self {
        Self {
            entity: entity.into(),
            seq,
            position: Position::default(),
            lane: None,
            speed: 0.0,
            motion: MotionState::Unknown,
            routing: RoutingState::Unknown,
            autonomous_ready: false,
            goal_reached: false,
            fault: None,
        }
    }

    pub fn with_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }

    pub fn with_motion(mut self, motion: MotionState) -> Self {
        self.motion = motion;
        self
    }

    pub fn with_routing(mut self, routing: RoutingState) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_autonomous_ready(mut self) -> Self {
        self.autonomous_ready = true;
        self
    }

    /// Mark the goal as reached; routing reports `Arrived` alongside it.
    pub fn with_goal_reached(mut self) -> Self {
        self.goal_reached = true;
        self.routing = RoutingState::Arrived;
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Goal reached, either flagged directly or via the routing state.
    pub fn has_arrived(&self) -> bool {
        self.goal_reached || self.routing == RoutingState::Arrived
    }
}
