//! Script loading and validation through the public API.

use awscript_core::script::{ActorRole, CommandKind, Gate};
use awscript_core::{load_script, parse_script, LoadError, ParseError, SemanticError};

const CUT_IN: &str = r#"
# ego drives L0 -> L9 while npc1 cuts in
spawn ego(role: ego, lane: "L0");
spawn npc1(role: npc, lane: "L1", offset: 12.5);
route npc1(lanes: ["L1", "L0"]);
speed npc1(speed: 8.0, behavior: aggressive);
trigger npc1(event: "brake") when npc1 reaches "L0";
wait(seconds: 2);
goal ego(lane: "L9");
"#;

#[test]
fn test_commands_keep_file_order_and_lines() {
    let script = parse_script("cut_in.script", CUT_IN).unwrap();

    let kinds: Vec<CommandKind> = script.commands().iter().map(|c| c.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            CommandKind::Spawn,
            CommandKind::Spawn,
            CommandKind::Route,
            CommandKind::Speed,
            CommandKind::Trigger,
            CommandKind::Wait,
            CommandKind::Goal,
        ]
    );
    let indices: Vec<usize> = script.commands().iter().map(|c| c.index).collect();
    assert_eq!(indices, (0..7).collect::<Vec<_>>());
    assert_eq!(script.commands()[0].line, 3);
    assert_eq!(script.commands()[6].line, 9);
    assert_eq!(script.ego().as_str(), "ego");
}

#[test]
fn test_gate_is_attached_to_its_command() {
    let script = parse_script("cut_in.script", CUT_IN).unwrap();
    let gated: Vec<_> = script.commands().iter().filter(|c| c.is_gated()).collect();
    assert_eq!(gated.len(), 1);
    assert_eq!(
        gated[0].gate,
        Some(Gate::Reached {
            entity: "npc1".into(),
            waypoint: "L0".to_string(),
        })
    );
}

#[test]
fn test_spawned_entities_and_roles() {
    let script = parse_script("cut_in.script", CUT_IN).unwrap();
    let spawned: Vec<(String, ActorRole)> = script
        .spawned_entities()
        .map(|(id, role)| (id.to_string(), role))
        .collect();
    assert_eq!(
        spawned,
        vec![
            ("ego".to_string(), ActorRole::Ego),
            ("npc1".to_string(), ActorRole::Npc),
        ]
    );
}

#[test]
fn test_parsing_is_deterministic() {
    let first = parse_script("cut_in.script", CUT_IN).unwrap();
    let second = parse_script("cut_in.script", CUT_IN).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.digest().len(), 64);

    let edited = CUT_IN.replace("8.0", "9.0");
    let third = parse_script("cut_in.script", &edited).unwrap();
    assert_ne!(first.digest(), third.digest());
}

#[test]
fn test_missing_goal_is_semantic_error() {
    let err = parse_script("nogoal.script", "spawn ego(role: ego, lane: \"L0\");").unwrap_err();
    assert!(err.is_semantic());
    assert_eq!(err, ParseError::Semantic(SemanticError::MissingGoal));
}

#[test]
fn test_reference_before_spawn_is_rejected() {
    let err = parse_script(
        "order.script",
        "spawn ego(role: ego, lane: \"L0\");\nspeed npc1(speed: 3);\nspawn npc1(role: npc, lane: \"L1\");\ngoal ego(lane: \"L9\");",
    )
    .unwrap_err();
    assert_eq!(
        err,
        ParseError::Semantic(SemanticError::UndeclaredEntity {
            entity: "npc1".to_string(),
            line: 2,
        })
    );
}

#[test]
fn test_goal_cannot_be_gated() {
    let err = parse_script(
        "gated_goal.script",
        "spawn ego(role: ego, lane: \"L0\");\ngoal ego(lane: \"L9\") when elapsed 5;",
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ParseError::Semantic(SemanticError::UngateableCommand {
            kind: CommandKind::Goal,
            line: 2,
        })
    ));
}

#[test]
fn test_goal_on_npc_is_rejected() {
    let err = parse_script(
        "npc_goal.script",
        "spawn ego(role: ego, lane: \"L0\");\nspawn n(role: npc, lane: \"L1\");\ngoal n(lane: \"L9\");",
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ParseError::Semantic(SemanticError::GoalNotEgo { line: 3, .. })
    ));
}

#[test]
fn test_syntax_error_reports_position() {
    let err = parse_script("broken.script", "spawn ego(role: ego lane: \"L0\");").unwrap_err();
    assert!(err.is_syntax());
    let ParseError::Syntax { line, .. } = err else {
        unreachable!();
    };
    assert_eq!(line, 1);
}

#[test]
fn test_load_script_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut_in.script");
    std::fs::write(&path, CUT_IN).unwrap();

    let script = load_script(&path).unwrap();
    assert_eq!(script.path(), path.as_path());
    assert_eq!(script.name(), "cut_in.script");

    let missing = load_script(&dir.path().join("missing.script")).unwrap_err();
    assert!(matches!(missing, LoadError::Io { .. }));

    let bad = dir.path().join("bad.script");
    std::fs::write(&bad, "goal;").unwrap();
    assert!(matches!(load_script(&bad), Err(LoadError::Parse { .. })));
}

#[test]
fn test_out_of_range_spans_are_rejected() {
    for source in [
        "spawn ego(role: ego, lane: \"L0\");\nwait(seconds: 100000000000000000000);\ngoal ego(lane: \"L9\");",
        "spawn ego(role: ego, lane: \"L0\");\nspawn n(role: npc, lane: \"L1\");\nspeed n(speed: 1) when elapsed 10000000000000000000;\ngoal ego(lane: \"L9\");",
        "spawn ego(role: ego, lane: \"L0\");\nspawn n(role: npc, lane: \"L1\");\ntrigger n(event: \"brake\", delay: 1000000);\ngoal ego(lane: \"L9\");",
    ] {
        let err = parse_script("span.script", source).unwrap_err();
        assert!(
            matches!(
                err,
                ParseError::Semantic(SemanticError::InvalidParameter { .. })
            ),
            "unexpected: {err:?}"
        );
    }
}
