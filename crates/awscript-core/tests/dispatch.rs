//! Dispatch lane tests against the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use awscript_core::monitor::FeedbackMonitor;
use awscript_core::result::ScenarioWarning;
use awscript_core::transport::fakes::{FakeTransport, Reaction};
use awscript_core::{
    parse_script, CallKind, ClientConfig, CommandDispatcher, DispatchError, DispatchPlan,
    ScenarioScript, TransportError,
};

fn config() -> ClientConfig {
    ClientConfig {
        gate_timeout_secs: 10,
        localization_retries: 5,
        retry_interval_ms: 100,
        ..ClientConfig::default()
    }
}

fn script(source: &str) -> ScenarioScript {
    parse_script("dispatch.script", source).unwrap()
}

fn dispatcher(fake: &FakeTransport, config: &ClientConfig) -> CommandDispatcher {
    CommandDispatcher::new(
        Arc::new(fake.clone()),
        Arc::new(FeedbackMonitor::new()),
        config,
    )
}

fn calls(fake: &FakeTransport) -> Vec<String> {
    fake.sent_commands()
        .iter()
        .map(|c| format!("{} {}", c.call, c.entity))
        .collect()
}

const GATED_SPEED: &str = r#"
spawn ego(role: ego, lane: "L0");
spawn npc1(role: npc, lane: "L1");
speed npc1(speed: 3) when npc1 reaches "L5";
route npc1(lanes: ["L1", "L2"]);
goal ego(lane: "L9");
"#;

#[tokio::test(start_paused = true)]
async fn test_ungated_commands_sent_in_file_order() {
    let fake = FakeTransport::new();
    let script = script(
        r#"
spawn ego(role: ego, lane: "L0");
spawn npc1(role: npc, lane: "L1");
route npc1(lanes: ["L1", "L2"]);
speed npc1(speed: 5);
trigger npc1(event: "brake");
goal ego(lane: "L9");
"#,
    );
    let dispatcher = dispatcher(&fake, &config());
    let plan = DispatchPlan::split(&script);
    assert!(plan.gated.is_empty());

    dispatcher.run_ordered(&plan.ordered).await.unwrap();

    assert_eq!(
        calls(&fake),
        vec![
            "spawn ego",
            "spawn npc1",
            "set_route npc1",
            "set_velocity npc1",
            "inject_event npc1",
            "set_goal ego",
        ]
    );
    assert!(dispatcher.ego_spawned());
    let lines: Vec<usize> = dispatcher.records().iter().map(|r| r.line).collect();
    assert_eq!(lines, vec![2, 3, 4, 5, 6, 7]);
}

#[tokio::test(start_paused = true)]
async fn test_gate_timeout_does_not_block_ungated_commands() {
    let fake = FakeTransport::new();
    let script = script(GATED_SPEED);
    let dispatcher = dispatcher(&fake, &config());
    let plan = DispatchPlan::split(&script);

    let gated = dispatcher.spawn_gated(plan.gated);
    dispatcher.run_ordered(&plan.ordered).await.unwrap();
    assert_eq!(
        calls(&fake),
        vec!["spawn ego", "spawn npc1", "set_route npc1", "set_goal ego"]
    );

    gated.await.unwrap().unwrap();
    assert!(!calls(&fake).contains(&"set_velocity npc1".to_string()));
    assert_eq!(
        dispatcher.warnings(),
        vec![ScenarioWarning::GatedCommandTimeout {
            index: 2,
            line: 4,
            gate: "npc1 reaches \"L5\"".to_string(),
            waited_ms: 10_000,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_gate_released_by_feedback() {
    let fake = FakeTransport::new();
    let script = script(GATED_SPEED);
    let dispatcher = dispatcher(&fake, &config());
    let plan = DispatchPlan::split(&script);

    let gated = dispatcher.spawn_gated(plan.gated);
    dispatcher.run_ordered(&plan.ordered).await.unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    fake.update_state("npc1", |s| s.with_lane("L5"));
    gated.await.unwrap().unwrap();

    assert_eq!(calls(&fake).last().map(String::as_str), Some("set_velocity npc1"));
    let record = dispatcher.records().pop().unwrap();
    assert!(record.gated);
    assert_eq!(record.index, 2);
    assert!(dispatcher.warnings().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_gate_counts_from_dispatch_start() {
    let fake = FakeTransport::new();
    let script = script(
        r#"
spawn ego(role: ego, lane: "L0");
spawn npc1(role: npc, lane: "L1");
trigger npc1(event: "brake") when elapsed 3.5;
goal ego(lane: "L9");
"#,
    );
    let dispatcher = dispatcher(&fake, &config());
    let plan = DispatchPlan::split(&script);
    let gated = dispatcher.spawn_gated(plan.gated);
    dispatcher.run_ordered(&plan.ordered).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!calls(&fake).contains(&"inject_event npc1".to_string()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(calls(&fake).contains(&"inject_event npc1".to_string()));
    gated.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_wait_suspends_ordered_lane() {
    let fake = FakeTransport::new();
    let script = script(
        r#"
spawn ego(role: ego, lane: "L0");
wait(seconds: 5);
goal ego(lane: "L9");
"#,
    );
    let dispatcher = dispatcher(&fake, &config());
    let plan = DispatchPlan::split(&script);

    let ordered = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move { dispatcher.run_ordered(&plan.ordered).await }
    });
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(calls(&fake), vec!["spawn ego"]);

    ordered.await.unwrap().unwrap();
    assert_eq!(calls(&fake), vec!["spawn ego", "set_goal ego"]);
    assert_eq!(dispatcher.commands_sent(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_localization_retried_until_ready() {
    let fake = FakeTransport::new();
    fake.fail_localization(3);
    let script = script("spawn ego(role: ego, lane: \"L0\");\ngoal ego(lane: \"L9\");");
    let dispatcher = dispatcher(&fake, &config());
    let plan = DispatchPlan::split(&script);

    dispatcher.run_ordered(&plan.ordered).await.unwrap();
    let attempts = fake
        .operations()
        .iter()
        .filter(|op| op.as_str() == "localize ego")
        .count();
    assert_eq!(attempts, 4);
    assert!(dispatcher.ego_spawned());
}

#[tokio::test(start_paused = true)]
async fn test_localization_exhausted_fails_dispatch() {
    let fake = FakeTransport::new();
    fake.fail_localization(100);
    let script = script("spawn ego(role: ego, lane: \"L0\");\ngoal ego(lane: \"L9\");");
    let dispatcher = dispatcher(&fake, &config());
    let plan = DispatchPlan::split(&script);

    let err = dispatcher.run_ordered(&plan.ordered).await.unwrap_err();
    assert!(matches!(err, DispatchError::Transport { line: 1, .. }));
    assert!(!dispatcher.ego_spawned());
    assert!(dispatcher.is_halted());
    assert_eq!(calls(&fake), vec!["spawn ego"]);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_halts_both_lanes() {
    let fake = FakeTransport::new();
    fake.react(
        CallKind::SetRoute,
        "npc1",
        Reaction::Reject("unknown lane".to_string()),
    );
    let script = script(GATED_SPEED);
    let dispatcher = dispatcher(&fake, &config());
    let plan = DispatchPlan::split(&script);

    let gated = dispatcher.spawn_gated(plan.gated);
    let err = dispatcher.run_ordered(&plan.ordered).await.unwrap_err();
    let Some(TransportError::Rejected { message, .. }) = err.transport_error() else {
        panic!("expected rejection, got {err:?}");
    };
    assert_eq!(message, "unknown lane");
    assert!(err.to_string().starts_with("line 5:"));

    fake.update_state("npc1", |s| s.with_lane("L5"));
    let gated_result = gated.await.unwrap();
    assert!(matches!(gated_result, Err(DispatchError::Halted)));
    assert_eq!(calls(&fake), vec!["spawn ego", "spawn npc1"]);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_spans_are_clamped_not_fatal() {
    use awscript_core::script::{CommandBody, Gate, ScenarioCommand};

    let fake = FakeTransport::new();
    let script = script(
        r#"
spawn ego(role: ego, lane: "L0");
spawn npc1(role: npc, lane: "L1");
goal ego(lane: "L9");
"#,
    );
    let dispatcher = dispatcher(&fake, &config());
    dispatcher
        .run_ordered(&DispatchPlan::split(&script).ordered)
        .await
        .unwrap();

    let long_wait = ScenarioCommand {
        index: 3,
        line: 5,
        gate: None,
        body: CommandBody::Wait { seconds: 1e20 },
    };
    let far_trigger = ScenarioCommand {
        index: 4,
        line: 6,
        gate: Some(Gate::Elapsed { seconds: 1e19 }),
        body: CommandBody::Trigger {
            entity: "npc1".into(),
            event: "brake".to_string(),
            delay: 0.0,
        },
    };

    let gated = dispatcher.spawn_gated(vec![far_trigger]);
    dispatcher.run_ordered(&[long_wait]).await.unwrap();
    gated.await.unwrap().unwrap();
    assert_eq!(calls(&fake).last().map(String::as_str), Some("inject_event npc1"));
}
