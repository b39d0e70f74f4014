//! Structured lifecycle events for scenario runs.
//!
//! Every event is an `info!` (or `warn!`) record with an `event` field naming
//! it, so JSON logs can be filtered on `event = "scenario.finished"` and the
//! like. Scenario-scoped events also carry the run id through
//! [`scenario_span`].

use tracing::{info, warn};

/// Span covering one scenario run. Attach it to the runner's future with
/// [`tracing::Instrument`].
pub fn scenario_span(run_id: &str, scenario: &str) -> tracing::Span {
    tracing::info_span!("awscript.scenario", run_id = %run_id, scenario = %scenario)
}

pub fn emit_scenario_started(scenario: &str, commands: usize, digest: &str) {
    info!(
        event = "scenario.started",
        scenario = %scenario,
        commands = commands,
        digest = %digest,
    );
}

/// Runner state machine moved from `from` to `to`.
pub fn emit_state_changed(from: &str, to: &str) {
    info!(event = "scenario.state_changed", from = %from, to = %to);
}

pub fn emit_command_dispatched(index: usize, line: usize, kind: &str, entity: &str, gated: bool) {
    info!(
        event = "command.dispatched",
        index = index,
        line = line,
        kind = %kind,
        entity = %entity,
        gated = gated,
    );
}

/// A gated command was skipped because its condition never held.
pub fn emit_gate_timed_out(index: usize, line: usize, gate: &str, waited_ms: u64) {
    warn!(
        event = "gate.timed_out",
        index = index,
        line = line,
        gate = %gate,
        waited_ms = waited_ms,
    );
}

pub fn emit_scenario_finished(scenario: &str, outcome: &str, duration_ms: u64, commands_sent: usize) {
    info!(
        event = "scenario.finished",
        scenario = %scenario,
        outcome = %outcome,
        duration_ms = duration_ms,
        commands_sent = commands_sent,
    );
}

pub fn emit_batch_finished(total: usize, completed: usize, failed: usize, skipped: usize, aborted: bool) {
    info!(
        event = "batch.finished",
        total = total,
        completed = completed,
        failed = failed,
        skipped = skipped,
        aborted = aborted,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_span_create() {
        let span = scenario_span("run-1", "cut_in.script");
        let _entered = span.enter();
        emit_state_changed("loaded", "dispatching");
    }
}
