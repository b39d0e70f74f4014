//! Scenario runner: one script from first command to reset.
//!
//! ```text
//! Loaded ──► Dispatching ──► Monitoring ──► Completed
//!   │             │              ├────────► TimedOut
//!   └─────────────┴──────────────┴────────► Failed
//! ```
//!
//! Whatever the terminal state, the runner stops the gated lane, publishes
//! the `Stopped` client status, waits for the trace recorder when the run
//! completed, resets the simulator and drops every feedback subscription.
//! Once the transport itself is lost, no further calls are made.

use crate::cancel::CancelSignal;
use crate::config::ClientConfig;
use crate::dispatch::{CommandDispatcher, DispatchError, DispatchPlan, DispatchResult};
use crate::monitor::{FeedbackMonitor, RuntimeState};
use crate::obs;
use crate::result::{FailureKind, Outcome, ScenarioResult, ScenarioWarning};
use crate::script::{EntityId, ScenarioScript};
use crate::transport::{ClientStatus, Transport, TransportError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

const CANCELLED: &str = "cancelled by operator";
const FEEDBACK_LOST: &str = "feedback stream lost";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Loaded,
    Dispatching,
    Monitoring,
    Completed,
    Failed,
    TimedOut,
}

impl RunnerState {
    pub fn can_transition_to(&self, next: RunnerState) -> bool {
        use RunnerState::*;
        matches!(
            (self, next),
            (Loaded, Dispatching)
                | (Dispatching, Monitoring)
                | (Monitoring, Completed)
                | (Monitoring, TimedOut)
                | (Loaded | Dispatching | Monitoring, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunnerState::Completed | RunnerState::Failed | RunnerState::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerState::Loaded => "loaded",
            RunnerState::Dispatching => "dispatching",
            RunnerState::Monitoring => "monitoring",
            RunnerState::Completed => "completed",
            RunnerState::Failed => "failed",
            RunnerState::TimedOut => "timed_out",
        }
    }

    fn terminal_for(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Completed => RunnerState::Completed,
            Outcome::TimedOut { .. } => RunnerState::TimedOut,
            Outcome::Failed { .. } | Outcome::Skipped { .. } => RunnerState::Failed,
        }
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current runner state plus transition logging.
#[derive(Debug)]
struct Lifecycle {
    state: RunnerState,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: RunnerState::Loaded,
        }
    }

    fn advance(&mut self, next: RunnerState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        obs::emit_state_changed(self.state.as_str(), next.as_str());
        self.state = next;
    }
}

/// Handle on the gated lane task.
struct GatedLane {
    handle: Option<JoinHandle<DispatchResult<()>>>,
}

impl GatedLane {
    /// Resolves once when the lane ends: `Some` if it ended the scenario.
    /// Pending forever afterwards.
    async fn finished(&mut self) -> Option<Outcome> {
        let Some(handle) = self.handle.as_mut() else {
            return std::future::pending().await;
        };
        let joined = handle.await;
        self.handle = None;
        lane_outcome(joined)
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn lane_outcome(joined: Result<DispatchResult<()>, JoinError>) -> Option<Outcome> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(dispatch_failure(&err)),
        Err(err) => Some(Outcome::failed(
            FailureKind::Transport,
            format!("gated lane stopped: {err}"),
        )),
    }
}

fn dispatch_failure(err: &DispatchError) -> Outcome {
    let kind = match err.transport_error() {
        Some(source) if source.is_fatal() => FailureKind::TransportDisconnected,
        _ => FailureKind::Transport,
    };
    Outcome::failed(kind, err.to_string())
}

fn transport_failure(err: &TransportError) -> Outcome {
    let kind = if err.is_fatal() {
        FailureKind::TransportDisconnected
    } else {
        FailureKind::Transport
    };
    Outcome::failed(kind, err.to_string())
}

/// Accepts goal arrival only once autonomous driving is under way.
///
/// Armed when the runner engages the ego (or, without engaging, when the
/// stack first reports it ready). Only updates newer than the arming one
/// count, and an ego that was already flagged arrived when armed must first
/// report it left.
#[derive(Debug, Default)]
struct ArrivalWatch {
    armed_at: Option<u64>,
    departed: bool,
}

impl ArrivalWatch {
    fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }

    fn arm(&mut self, state: &RuntimeState) {
        self.armed_at = Some(state.seq);
        self.departed = !state.has_arrived();
    }

    fn arrived(&mut self, state: &RuntimeState) -> bool {
        match self.armed_at {
            Some(armed_at) if state.seq > armed_at => {
                if !state.has_arrived() {
                    self.departed = true;
                    return false;
                }
                self.departed
            }
            _ => false,
        }
    }
}

/// Resolves when the monitor reports a lost feed.
async fn feedback_lost(monitor: &FeedbackMonitor) {
    let mut rx = monitor.subscribe();
    if rx.wait_for(|snapshot| snapshot.is_disconnected()).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Runs scenarios one at a time against a shared transport.
pub struct ScenarioRunner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    cancel: CancelSignal,
}

impl ScenarioRunner {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            cancel: CancelSignal::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Run `script` to a terminal state. Never panics on external failures;
    /// every failure is reported in the returned result.
    pub async fn run(&self, script: &ScenarioScript) -> ScenarioResult {
        let run_id = Uuid::new_v4();
        let span = obs::scenario_span(&run_id.to_string(), &script.name());
        self.run_scenario(run_id, script).instrument(span).await
    }

    async fn run_scenario(&self, run_id: Uuid, script: &ScenarioScript) -> ScenarioResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        obs::emit_scenario_started(&script.name(), script.len(), script.digest());

        let monitor = Arc::new(FeedbackMonitor::new());
        let dispatcher =
            CommandDispatcher::new(Arc::clone(&self.transport), Arc::clone(&monitor), &self.config);
        let mut lifecycle = Lifecycle::new();
        let mut gated = GatedLane { handle: None };

        let outcome = self
            .drive(script, &monitor, &dispatcher, &mut lifecycle, &mut gated)
            .await;
        lifecycle.advance(RunnerState::terminal_for(&outcome));

        gated.abort();
        let mut warnings = dispatcher.warnings();
        warnings.extend(self.teardown(&outcome).await);
        monitor.shutdown();

        let duration_ms = clock.elapsed().as_millis() as u64;
        let commands_sent = dispatcher.commands_sent();
        obs::emit_scenario_finished(&script.name(), outcome.label(), duration_ms, commands_sent);

        ScenarioResult {
            run_id,
            scenario: script.path().to_path_buf(),
            script_digest: Some(script.digest().to_string()),
            outcome,
            final_state: Some(lifecycle.state),
            commands_sent,
            warnings,
            started_at,
            duration_ms,
        }
    }

    async fn drive(
        &self,
        script: &ScenarioScript,
        monitor: &FeedbackMonitor,
        dispatcher: &CommandDispatcher,
        lifecycle: &mut Lifecycle,
        gated: &mut GatedLane,
    ) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::failed(FailureKind::Cancelled, CANCELLED);
        }
        if let Err(err) = self.transport.publish_status(ClientStatus::Running).await {
            if err.is_fatal() {
                return transport_failure(&err);
            }
            warn!(error = %err, "failed to publish running status");
        }

        lifecycle.advance(RunnerState::Dispatching);
        let plan = DispatchPlan::split(script);
        debug!(
            ordered = plan.ordered.len(),
            gated = plan.gated.len(),
            "dispatch plan"
        );
        gated.handle = Some(dispatcher.spawn_gated(plan.gated));

        let ordered = dispatcher.run_ordered(&plan.ordered);
        tokio::pin!(ordered);
        let dispatched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Outcome::failed(FailureKind::Cancelled, CANCELLED);
            }
            _ = feedback_lost(monitor) => {
                return Outcome::failed(FailureKind::FeedbackDisconnected, FEEDBACK_LOST);
            }
            Some(outcome) = gated.finished() => return outcome,
            result = &mut ordered => result,
        };

        match dispatched {
            Ok(()) => {}
            Err(DispatchError::Halted) => {
                return gated.finished().await.unwrap_or_else(|| {
                    Outcome::failed(FailureKind::Transport, "dispatch halted")
                });
            }
            Err(err) => return dispatch_failure(&err),
        }

        if !dispatcher.ego_spawned() {
            return Outcome::failed(
                FailureKind::Transport,
                format!("spawn of '{}' was not acknowledged", script.ego()),
            );
        }

        lifecycle.advance(RunnerState::Monitoring);
        self.monitor_goal(script, monitor, gated).await
    }

    /// Race goal arrival against faults, feedback loss, gated-lane failure,
    /// cancellation and the goal timeout.
    async fn monitor_goal(
        &self,
        script: &ScenarioScript,
        monitor: &FeedbackMonitor,
        gated: &mut GatedLane,
    ) -> Outcome {
        let ego = script.ego();
        let goal_timeout = self.config.goal_timeout();
        let deadline = Instant::now() + goal_timeout;
        let mut rx = monitor.subscribe();
        let mut arrival = ArrivalWatch::default();
        let mut engage_attempted = false;

        loop {
            let (ego_state, disconnected) = {
                let snapshot = rx.borrow_and_update();
                (snapshot.get(ego).cloned(), snapshot.is_disconnected())
            };

            if let Some(state) = &ego_state {
                if let Some(fault) = &state.fault {
                    return Outcome::failed(FailureKind::ExternalFault, fault.to_string());
                }
                if arrival.arrived(state) {
                    info!(entity = %ego, seq = state.seq, "goal reached");
                    return Outcome::Completed;
                }
                if state.has_arrived() && !arrival.is_armed() {
                    debug!(entity = %ego, seq = state.seq, "arrival before engage ignored");
                }
                if state.autonomous_ready && !arrival.is_armed() {
                    if !self.config.engage_autonomous {
                        arrival.arm(state);
                    } else if !engage_attempted {
                        engage_attempted = true;
                        let engaged = tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => {
                                return Outcome::failed(FailureKind::Cancelled, CANCELLED);
                            }
                            engaged = self.engage(ego) => engaged,
                        };
                        match engaged {
                            Ok(()) => arrival.arm(state),
                            Err(err) if err.is_fatal() => return transport_failure(&err),
                            Err(err) => warn!(error = %err, "failed to engage autonomous mode"),
                        }
                    }
                }
            }
            if disconnected {
                return Outcome::failed(FailureKind::FeedbackDisconnected, FEEDBACK_LOST);
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Outcome::failed(FailureKind::Cancelled, CANCELLED);
                }
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Outcome::failed(FailureKind::FeedbackDisconnected, FEEDBACK_LOST);
                    }
                }
                Some(outcome) = gated.finished() => return outcome,
                _ = tokio::time::sleep_until(deadline) => {
                    return Outcome::TimedOut {
                        waited_ms: goal_timeout.as_millis() as u64,
                    };
                }
            }
        }
    }

    async fn engage(&self, ego: &EntityId) -> Result<(), TransportError> {
        self.transport.engage(ego).await?;
        info!(entity = %ego, "autonomous mode engaged");
        if let Err(err) = self.transport.publish_status(ClientStatus::AutonomousMode).await {
            if err.is_fatal() {
                return Err(err);
            }
            warn!(error = %err, "failed to publish autonomous status");
        }
        Ok(())
    }

    async fn teardown(&self, outcome: &Outcome) -> Vec<ScenarioWarning> {
        let mut warnings = Vec::new();
        if outcome.is_fatal() {
            debug!("transport lost, skipping teardown calls");
            return warnings;
        }

        if let Err(err) = self.transport.publish_status(ClientStatus::Stopped).await {
            warn!(error = %err, "failed to publish stopped status");
        }
        if outcome.is_completed() && self.config.wait_for_trace {
            warnings.extend(self.wait_for_trace().await);
        }
        warnings.extend(self.reset().await);
        warnings
    }

    /// Poll the recorder until it has written its trace. Cancellation ends
    /// the wait early.
    async fn wait_for_trace(&self) -> Option<ScenarioWarning> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("cancelled while waiting for the recorder");
                None
            }
            warning = self.poll_recorder() => warning,
        }
    }

    async fn poll_recorder(&self) -> Option<ScenarioWarning> {
        let timeout = self.config.trace_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            match self.transport.recording_state().await {
                Ok(state) if !state.is_busy() => return None,
                Ok(state) => debug!(?state, "recorder busy"),
                Err(err) => {
                    warn!(error = %err, "recorder state unavailable");
                    return None;
                }
            }
            if Instant::now() + self.config.poll_interval() > deadline {
                warn!(waited_ms = timeout.as_millis() as u64, "recorder still busy");
                return Some(ScenarioWarning::TraceWaitTimedOut {
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Clear the route and remove every actor so the next scenario starts
    /// from an empty simulator.
    async fn reset(&self) -> Vec<ScenarioWarning> {
        let mut warnings = Vec::new();
        if let Err(err) = self.transport.clear_route().await {
            warn!(error = %err, "failed to clear route");
            warnings.push(ScenarioWarning::ResetFailed {
                message: err.to_string(),
            });
        }

        let attempts = self.config.reset_retries.max(1);
        for attempt in 1..=attempts {
            match self.transport.remove_actors().await {
                Ok(()) => return warnings,
                Err(err) if err.is_fatal() || attempt == attempts => {
                    warn!(error = %err, attempt, "failed to remove actors");
                    warnings.push(ScenarioWarning::ResetFailed {
                        message: err.to_string(),
                    });
                    return warnings;
                }
                Err(err) => {
                    debug!(error = %err, attempt, "remove actors failed, retrying");
                    tokio::time::sleep(self.config.retry_interval()).await;
                }
            }
        }
        warnings
    }
}
