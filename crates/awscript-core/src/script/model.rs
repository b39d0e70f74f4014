//! Structured scenario plan produced by the parser.
//!
//! A [`ScenarioScript`] is an ordered list of [`ScenarioCommand`]s. Each command
//! carries a [`CommandBody`] (one variant per command kind), its position in
//! the script and an optional [`Gate`] that conditions its dispatch on runtime
//! state.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Key/value parameters sent alongside a command.
///
/// Keys are fixed per [`CommandKind`]; a `BTreeMap` keeps the encoding stable.
pub type CommandParams = BTreeMap<String, Value>;

/// Identifier of an actor owned by the simulator.
///
/// Scripts refer to actors by name; the name is a lookup key into state the
/// simulator owns, never a handle to the actor itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Who controls a spawned actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    /// Driven by the autonomous stack under test.
    Ego,
    /// Driven by the simulator.
    Npc,
}

impl ActorRole {
    pub fn name(&self) -> &'static str {
        match self {
            ActorRole::Ego => "ego",
            ActorRole::Npc => "npc",
        }
    }
}

/// Command kinds supported by the script language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Spawn,
    Route,
    Speed,
    Trigger,
    Goal,
    Wait,
}

impl CommandKind {
    /// Keyword that introduces the command in a script.
    pub fn keyword(&self) -> &'static str {
        match self {
            CommandKind::Spawn => "spawn",
            CommandKind::Route => "route",
            CommandKind::Speed => "speed",
            CommandKind::Trigger => "trigger",
            CommandKind::Goal => "goal",
            CommandKind::Wait => "wait",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Longest span, in seconds, a `wait`, a trigger `delay` or an `elapsed`
/// gate may name. One day.
pub const MAX_SCRIPT_SECONDS: f64 = 86_400.0;

/// Runtime condition a gated command waits for before it is dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Gate {
    /// The entity reports the given lane as its current lane.
    Reached { entity: EntityId, waypoint: String },
    /// Seconds since dispatch of the scenario started.
    Elapsed { seconds: f64 },
    /// The entity reports that it has stopped.
    Stopped { entity: EntityId },
}

impl Gate {
    /// Entity the predicate observes, if any.
    pub fn entity(&self) -> Option<&EntityId> {
        match self {
            Gate::Reached { entity, .. } | Gate::Stopped { entity } => Some(entity),
            Gate::Elapsed { .. } => None,
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gate::Reached { entity, waypoint } => write!(f, "{entity} reaches \"{waypoint}\""),
            Gate::Elapsed { seconds } => write!(f, "elapsed {seconds}"),
            Gate::Stopped { entity } => write!(f, "{entity} stopped"),
        }
    }
}

/// Typed payload of a command, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandBody {
    /// Place an actor on a lane.
    Spawn {
        entity: EntityId,
        role: ActorRole,
        body: String,
        lane: String,
        offset: f64,
    },
    /// Assign the lanes an NPC follows.
    Route { entity: EntityId, lanes: Vec<String> },
    /// Speed/behavior directive.
    Speed {
        entity: EntityId,
        speed: f64,
        acceleration: Option<f64>,
        deceleration: Option<f64>,
        behavior: Option<String>,
    },
    /// Inject a named event, optionally after a delay.
    Trigger {
        entity: EntityId,
        event: String,
        delay: f64,
    },
    /// Destination of the ego vehicle; reaching it ends the scenario.
    Goal {
        entity: EntityId,
        lane: String,
        offset: f64,
    },
    /// Pause the ordered command stream.
    Wait { seconds: f64 },
}

impl CommandBody {
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandBody::Spawn { .. } => CommandKind::Spawn,
            CommandBody::Route { .. } => CommandKind::Route,
            CommandBody::Speed { .. } => CommandKind::Speed,
            CommandBody::Trigger { .. } => CommandKind::Trigger,
            CommandBody::Goal { .. } => CommandKind::Goal,
            CommandBody::Wait { .. } => CommandKind::Wait,
        }
    }

    pub fn entity(&self) -> Option<&EntityId> {
        match self {
            CommandBody::Spawn { entity, .. }
            | CommandBody::Route { entity, .. }
            | CommandBody::Speed { entity, .. }
            | CommandBody::Trigger { entity, .. }
            | CommandBody::Goal { entity, .. } => Some(entity),
            CommandBody::Wait { .. } => None,
        }
    }

    /// Parameters carried to the transport for this command.
    pub fn params(&self) -> CommandParams {
        let mut params = CommandParams::new();
        match self {
            CommandBody::Spawn {
                role,
                body,
                lane,
                offset,
                ..
            } => {
                params.insert("role".to_string(), json!(role.name()));
                params.insert("body".to_string(), json!(body));
                params.insert("lane".to_string(), json!(lane));
                params.insert("offset".to_string(), json!(offset));
            }
            CommandBody::Route { lanes, .. } => {
                params.insert("lanes".to_string(), json!(lanes));
            }
            CommandBody::Speed {
                speed,
                acceleration,
                deceleration,
                behavior,
                ..
            } => {
                params.insert("speed".to_string(), json!(speed));
                if let Some(a) = acceleration {
                    params.insert("acceleration".to_string(), json!(a));
                }
                if let Some(d) = deceleration {
                    params.insert("deceleration".to_string(), json!(d));
                }
                if let Some(b) = behavior {
                    params.insert("behavior".to_string(), json!(b));
                }
            }
            CommandBody::Trigger { event, delay, .. } => {
                params.insert("event".to_string(), json!(event));
                params.insert("delay".to_string(), json!(delay));
            }
            CommandBody::Goal { lane, offset, .. } => {
                params.insert("lane".to_string(), json!(lane));
                params.insert("offset".to_string(), json!(offset));
            }
            CommandBody::Wait { seconds } => {
                params.insert("seconds".to_string(), json!(seconds));
            }
        }
        params
    }
}

/// One statement of a scenario script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioCommand {
    /// Zero-based position in the script.
    pub index: usize,
    /// Source line the statement starts on (1-based).
    pub line: usize,
    /// Dispatch condition; `None` means "in script order".
    pub gate: Option<Gate>,
    pub body: CommandBody,
}

impl ScenarioCommand {
    pub fn kind(&self) -> CommandKind {
        self.body.kind()
    }

    pub fn entity(&self) -> Option<&EntityId> {
        self.body.entity()
    }

    pub fn params(&self) -> CommandParams {
        self.body.params()
    }

    pub fn is_gated(&self) -> bool {
        self.gate.is_some()
    }
}

/// A parsed scenario: identity plus its ordered commands.
///
/// Only the parser builds these, so every value upholds the script-level
/// invariants (one goal, targeting the single ego vehicle).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioScript {
    path: PathBuf,
    digest: String,
    ego: EntityId,
    commands: Vec<ScenarioCommand>,
}

impl ScenarioScript {
    pub(crate) fn new(
        path: PathBuf,
        digest: String,
        ego: EntityId,
        commands: Vec<ScenarioCommand>,
    ) -> Self {
        Self {
            path,
            digest,
            ego,
            commands,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used to identify the scenario in reports.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    /// SHA-256 of the script text.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// The ego vehicle designated by the goal declaration.
    pub fn ego(&self) -> &EntityId {
        &self.ego
    }

    pub fn commands(&self) -> &[ScenarioCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Spawn commands, in script order.
    pub fn spawned_entities(&self) -> impl Iterator<Item = (&EntityId, ActorRole)> {
        self.commands.iter().filter_map(|c| match &c.body {
            CommandBody::Spawn { entity, role, .. } => Some((entity, *role)),
            _ => None,
        })
    }
}
