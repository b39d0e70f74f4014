//! Semantic analysis: raw statements to a typed [`ScenarioScript`].
//!
//! Checks argument keys and types per command kind and the script-level
//! invariants: exactly one goal, on the single ego vehicle, and every entity
//! reference resolved against an earlier `spawn`.

use crate::script::error::{ParseResult, SemanticError};
use crate::script::model::{
    ActorRole, CommandBody, CommandKind, EntityId, Gate, ScenarioCommand, ScenarioScript,
    MAX_SCRIPT_SECONDS,
};
use crate::script::parser::{Arg, Literal, RawGate, Statement};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

const DEFAULT_NPC_BODY: &str = "taxi";
const EGO_BODY: &str = "ego";

pub(crate) fn analyze(
    path: PathBuf,
    source: &str,
    statements: Vec<Statement>,
) -> ParseResult<ScenarioScript> {
    let mut declared: HashMap<String, (usize, ActorRole)> = HashMap::new();
    let mut ego_line: Option<usize> = None;
    let mut goal: Option<(usize, EntityId)> = None;
    let mut commands = Vec::with_capacity(statements.len());

    for (index, stmt) in statements.into_iter().enumerate() {
        let line = stmt.line;
        let kind = stmt.kind;
        let mut args = Args::new(kind, line, stmt.args)?;

        let mut gate = match stmt.gate {
            Some(raw) => Some(resolve_gate(raw, kind, line, &declared)?),
            None => None,
        };

        let body = match kind {
            CommandKind::Spawn => {
                let name = target(&stmt.target, kind, line)?;
                if let Some((first, _)) = declared.get(&name) {
                    return Err(SemanticError::DuplicateEntity {
                        entity: name,
                        line,
                        first: *first,
                    }
                    .into());
                }
                let role = args.role("role")?;
                if role == ActorRole::Ego {
                    if let Some(first) = ego_line {
                        return Err(SemanticError::MultipleEgo { line, first }.into());
                    }
                    if gate.is_some() {
                        return Err(SemanticError::UngateableCommand { kind, line }.into());
                    }
                    ego_line = Some(line);
                }
                let body = args.opt_str("body")?.unwrap_or_else(|| match role {
                    ActorRole::Ego => EGO_BODY.to_string(),
                    ActorRole::Npc => DEFAULT_NPC_BODY.to_string(),
                });
                let lane = args.str("lane")?;
                let offset = args.opt_non_negative("offset")?.unwrap_or(0.0);
                declared.insert(name.clone(), (line, role));
                CommandBody::Spawn {
                    entity: EntityId::new(name),
                    role,
                    body,
                    lane,
                    offset,
                }
            }
            CommandKind::Route => {
                let entity = resolve(&stmt.target, kind, line, &declared)?;
                let lanes = args.str_list("lanes")?;
                if lanes.is_empty() {
                    return Err(args.invalid("'lanes' must not be empty"));
                }
                CommandBody::Route { entity, lanes }
            }
            CommandKind::Speed => CommandBody::Speed {
                entity: resolve(&stmt.target, kind, line, &declared)?,
                speed: args.non_negative("speed")?,
                acceleration: args.opt_non_negative("acceleration")?,
                deceleration: args.opt_non_negative("deceleration")?,
                behavior: args.opt_str("behavior")?,
            },
            CommandKind::Trigger => {
                let entity = resolve(&stmt.target, kind, line, &declared)?;
                let event = args.str("event")?;
                let delay = args.opt_seconds("delay")?.unwrap_or(0.0);
                if gate.is_none() && delay > 0.0 {
                    gate = Some(Gate::Elapsed { seconds: delay });
                }
                CommandBody::Trigger {
                    entity,
                    event,
                    delay,
                }
            }
            CommandKind::Goal => {
                let entity = resolve(&stmt.target, kind, line, &declared)?;
                if let Some((first, _)) = &goal {
                    return Err(SemanticError::DuplicateGoal {
                        line,
                        first: *first,
                    }
                    .into());
                }
                if !matches!(declared.get(entity.as_str()), Some((_, ActorRole::Ego))) {
                    return Err(SemanticError::GoalNotEgo {
                        entity: entity.to_string(),
                        line,
                    }
                    .into());
                }
                if gate.is_some() {
                    return Err(SemanticError::UngateableCommand { kind, line }.into());
                }
                goal = Some((line, entity.clone()));
                CommandBody::Goal {
                    entity,
                    lane: args.str("lane")?,
                    offset: args.opt_non_negative("offset")?.unwrap_or(0.0),
                }
            }
            CommandKind::Wait => {
                if gate.is_some() {
                    return Err(SemanticError::UngateableCommand { kind, line }.into());
                }
                CommandBody::Wait {
                    seconds: args.seconds("seconds")?,
                }
            }
        };

        args.finish()?;
        commands.push(ScenarioCommand {
            index,
            line,
            gate,
            body,
        });
    }

    let (_, ego) = goal.ok_or(SemanticError::MissingGoal)?;
    Ok(ScenarioScript::new(path, digest(source), ego, commands))
}

fn digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

fn target(target: &Option<String>, kind: CommandKind, line: usize) -> ParseResult<String> {
    target.clone().ok_or_else(|| {
        SemanticError::InvalidParameter {
            kind,
            line,
            message: "missing target entity".to_string(),
        }
        .into()
    })
}

fn resolve(
    target_name: &Option<String>,
    kind: CommandKind,
    line: usize,
    declared: &HashMap<String, (usize, ActorRole)>,
) -> ParseResult<EntityId> {
    let name = target(target_name, kind, line)?;
    lookup(name, line, declared)
}

fn lookup(
    name: String,
    line: usize,
    declared: &HashMap<String, (usize, ActorRole)>,
) -> ParseResult<EntityId> {
    if declared.contains_key(&name) {
        Ok(EntityId::new(name))
    } else {
        Err(SemanticError::UndeclaredEntity { entity: name, line }.into())
    }
}

fn resolve_gate(
    raw: RawGate,
    kind: CommandKind,
    line: usize,
    declared: &HashMap<String, (usize, ActorRole)>,
) -> ParseResult<Gate> {
    match raw {
        RawGate::Reached { entity, waypoint } => Ok(Gate::Reached {
            entity: lookup(entity, line, declared)?,
            waypoint,
        }),
        RawGate::Stopped { entity } => Ok(Gate::Stopped {
            entity: lookup(entity, line, declared)?,
        }),
        RawGate::Elapsed(seconds) if !(0.0..=MAX_SCRIPT_SECONDS).contains(&seconds) => {
            Err(SemanticError::InvalidParameter {
                kind,
                line,
                message: format!(
                    "elapsed gate must be between 0 and {MAX_SCRIPT_SECONDS} seconds, got {seconds}"
                ),
            }
            .into())
        }
        RawGate::Elapsed(seconds) => Ok(Gate::Elapsed { seconds }),
    }
}

/// Argument list of one statement, consumed key by key.
struct Args {
    kind: CommandKind,
    line: usize,
    values: BTreeMap<String, Literal>,
}

impl Args {
    fn new(kind: CommandKind, line: usize, args: Vec<Arg>) -> ParseResult<Self> {
        let mut values = BTreeMap::new();
        for arg in args {
            if values.contains_key(&arg.key) {
                return Err(SemanticError::InvalidParameter {
                    kind,
                    line,
                    message: format!("duplicate argument '{}'", arg.key),
                }
                .into());
            }
            values.insert(arg.key, arg.value);
        }
        Ok(Self { kind, line, values })
    }

    fn invalid(&self, message: impl Into<String>) -> crate::script::error::ParseError {
        SemanticError::InvalidParameter {
            kind: self.kind,
            line: self.line,
            message: message.into(),
        }
        .into()
    }

    fn required(&mut self, key: &str) -> ParseResult<Literal> {
        self.values
            .remove(key)
            .ok_or_else(|| self.invalid(format!("missing required argument '{key}'")))
    }

    fn str(&mut self, key: &str) -> ParseResult<String> {
        let value = self.required(key)?;
        self.as_str(key, value)
    }

    fn opt_str(&mut self, key: &str) -> ParseResult<Option<String>> {
        match self.values.remove(key) {
            Some(value) => self.as_str(key, value).map(Some),
            None => Ok(None),
        }
    }

    fn as_str(&self, key: &str, value: Literal) -> ParseResult<String> {
        match value {
            Literal::Str(s) | Literal::Ident(s) => Ok(s),
            other => Err(self.invalid(format!(
                "'{key}' must be a string, got {}",
                other.type_name()
            ))),
        }
    }

    fn str_list(&mut self, key: &str) -> ParseResult<Vec<String>> {
        match self.required(key)? {
            Literal::List(items) => items
                .into_iter()
                .map(|item| self.as_str(key, item))
                .collect(),
            other => Err(self.invalid(format!(
                "'{key}' must be a list of strings, got {}",
                other.type_name()
            ))),
        }
    }

    fn non_negative(&mut self, key: &str) -> ParseResult<f64> {
        let value = self.required(key)?;
        self.as_non_negative(key, value)
    }

    fn opt_non_negative(&mut self, key: &str) -> ParseResult<Option<f64>> {
        match self.values.remove(key) {
            Some(value) => self.as_non_negative(key, value).map(Some),
            None => Ok(None),
        }
    }

    /// A non-negative span of at most [`MAX_SCRIPT_SECONDS`].
    fn seconds(&mut self, key: &str) -> ParseResult<f64> {
        let value = self.non_negative(key)?;
        self.within_script_span(key, value)
    }

    fn opt_seconds(&mut self, key: &str) -> ParseResult<Option<f64>> {
        match self.opt_non_negative(key)? {
            Some(value) => self.within_script_span(key, value).map(Some),
            None => Ok(None),
        }
    }

    fn within_script_span(&self, key: &str, value: f64) -> ParseResult<f64> {
        if value > MAX_SCRIPT_SECONDS {
            return Err(self.invalid(format!(
                "'{key}' must be at most {MAX_SCRIPT_SECONDS} seconds, got {value}"
            )));
        }
        Ok(value)
    }

    fn as_non_negative(&self, key: &str, value: Literal) -> ParseResult<f64> {
        match value {
            Literal::Number(n) if n >= 0.0 => Ok(n),
            Literal::Number(n) => Err(self.invalid(format!("'{key}' must be non-negative, got {n}"))),
            other => Err(self.invalid(format!(
                "'{key}' must be a number, got {}",
                other.type_name()
            ))),
        }
    }

    fn role(&mut self, key: &str) -> ParseResult<ActorRole> {
        match self.str(key)?.as_str() {
            "ego" => Ok(ActorRole::Ego),
            "npc" => Ok(ActorRole::Npc),
            other => Err(self.invalid(format!("'{key}' must be ego or npc, got '{other}'"))),
        }
    }

    /// Reject any argument nobody consumed.
    fn finish(self) -> ParseResult<()> {
        match self.values.keys().next() {
            Some(key) => Err(SemanticError::InvalidParameter {
                kind: self.kind,
                line: self.line,
                message: format!("unknown argument '{key}'"),
            }
            .into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::script::error::{ParseError, SemanticError};
    use crate::script::model::{CommandBody, CommandKind, Gate};
    use crate::script::parse_script;

    const HEADER: &str = r#"
spawn ego(role: ego, lane: "TrafficLane.239", offset: 5.0);
spawn npc1(role: npc, body: "truck", lane: "TrafficLane.240");
"#;

    fn semantic(source: &str) -> SemanticError {
        match parse_script("test.script", source) {
            Err(ParseError::Semantic(e)) => e,
            other => panic!("expected semantic error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_goal() {
        assert_eq!(semantic(HEADER), SemanticError::MissingGoal);
    }

    #[test]
    fn test_duplicate_goal() {
        let src = format!(
            "{HEADER}goal ego(lane: \"A\");\ngoal ego(lane: \"B\");\n"
        );
        assert!(matches!(semantic(&src), SemanticError::DuplicateGoal { .. }));
    }

    #[test]
    fn test_duplicate_entity() {
        let src = format!("{HEADER}spawn npc1(role: npc, lane: \"X\");\ngoal ego(lane: \"A\");");
        assert!(matches!(
            semantic(&src),
            SemanticError::DuplicateEntity { ref entity, first: 3, .. } if entity == "npc1"
        ));
    }

    #[test]
    fn test_undeclared_entity_in_target_and_gate() {
        let src = format!("{HEADER}route npc2(lanes: [\"A\"]);\ngoal ego(lane: \"A\");");
        assert!(matches!(semantic(&src), SemanticError::UndeclaredEntity { .. }));

        let src = format!(
            "{HEADER}speed npc1(speed: 2) when ghost stopped;\ngoal ego(lane: \"A\");"
        );
        assert!(matches!(
            semantic(&src),
            SemanticError::UndeclaredEntity { ref entity, .. } if entity == "ghost"
        ));
    }

    #[test]
    fn test_reference_before_spawn_is_undeclared() {
        let src = "route npc1(lanes: [\"A\"]);\nspawn npc1(role: npc, lane: \"B\");\nspawn ego(role: ego, lane: \"C\");\ngoal ego(lane: \"D\");";
        assert!(matches!(semantic(src), SemanticError::UndeclaredEntity { line: 1, .. }));
    }

    #[test]
    fn test_goal_must_target_ego() {
        let src = format!("{HEADER}goal npc1(lane: \"A\");");
        assert!(matches!(semantic(&src), SemanticError::GoalNotEgo { .. }));
    }

    #[test]
    fn test_second_ego_rejected() {
        let src = format!("{HEADER}spawn ego2(role: ego, lane: \"A\");\ngoal ego(lane: \"A\");");
        assert!(matches!(semantic(&src), SemanticError::MultipleEgo { .. }));
    }

    #[test]
    fn test_wait_and_goal_cannot_be_gated() {
        let src = format!("{HEADER}wait(seconds: 1) when elapsed 2;\ngoal ego(lane: \"A\");");
        assert!(matches!(semantic(&src), SemanticError::UngateableCommand { .. }));

        let src = format!("{HEADER}goal ego(lane: \"A\") when npc1 stopped;");
        assert!(matches!(semantic(&src), SemanticError::UngateableCommand { .. }));
    }

    #[test]
    fn test_parameter_validation() {
        let src = format!("{HEADER}speed npc1(speed: -1);\ngoal ego(lane: \"A\");");
        assert!(matches!(semantic(&src), SemanticError::InvalidParameter { .. }));

        let src = format!("{HEADER}speed npc1(speed: 1, colour: red);\ngoal ego(lane: \"A\");");
        match semantic(&src) {
            SemanticError::InvalidParameter { message, .. } => {
                assert!(message.contains("unknown argument 'colour'"))
            }
            other => panic!("unexpected: {other:?}"),
        }

        let src = format!("{HEADER}route npc1(lanes: \"A\");\ngoal ego(lane: \"A\");");
        assert!(matches!(semantic(&src), SemanticError::InvalidParameter { .. }));
    }

    #[test]
    fn test_spans_beyond_a_day_rejected() {
        let src = format!("{HEADER}wait(seconds: 100000000000000000000);\ngoal ego(lane: \"A\");");
        match semantic(&src) {
            SemanticError::InvalidParameter { kind, message, .. } => {
                assert_eq!(kind, CommandKind::Wait);
                assert!(message.contains("at most 86400 seconds"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        let src = format!(
            "{HEADER}speed npc1(speed: 1) when elapsed 10000000000000000000;\ngoal ego(lane: \"A\");"
        );
        assert!(matches!(semantic(&src), SemanticError::InvalidParameter { .. }));

        let src = format!("{HEADER}trigger npc1(event: \"brake\", delay: 86401);\ngoal ego(lane: \"A\");");
        assert!(matches!(semantic(&src), SemanticError::InvalidParameter { .. }));

        let src = format!("{HEADER}wait(seconds: 86400);\ngoal ego(lane: \"A\");");
        assert!(parse_script("t.script", &src).is_ok());
    }

    #[test]
    fn test_delayed_trigger_gets_elapsed_gate() {
        let src = format!("{HEADER}trigger npc1(event: \"brake\", delay: 4);\ngoal ego(lane: \"A\");");
        let script = parse_script("t.script", &src).expect("parse failed");
        let trigger = &script.commands()[2];
        assert!(matches!(trigger.body, CommandBody::Trigger { .. }));
        assert_eq!(trigger.gate, Some(Gate::Elapsed { seconds: 4.0 }));
    }

    #[test]
    fn test_spawn_defaults() {
        let src = format!("{HEADER}spawn npc2(role: npc, lane: \"L\");\ngoal ego(lane: \"A\");");
        let script = parse_script("t.script", &src).expect("parse failed");
        match &script.commands()[2].body {
            CommandBody::Spawn { body, offset, .. } => {
                assert_eq!(body, "taxi");
                assert_eq!(*offset, 0.0);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(script.ego().as_str(), "ego");
    }
}
