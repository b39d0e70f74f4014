//! Command dispatch against the transport.
//!
//! A script is split into two lanes:
//!
//! - the **ordered lane**: ungated commands, sent one after another in script
//!   order; `wait` suspends only this lane;
//! - the **gated lane**: gated commands, run on their own task in script
//!   order, each released when its condition holds on the feedback monitor
//!   or skipped with a warning when the gate timeout runs out.
//!
//! A transport failure on either lane halts both.

use crate::config::ClientConfig;
use crate::monitor::{FeedbackMonitor, MotionState, Snapshot, WaitOutcome};
use crate::obs;
use crate::result::ScenarioWarning;
use crate::script::{
    ActorRole, CommandBody, CommandKind, CommandParams, EntityId, Gate, ScenarioCommand,
    ScenarioScript, MAX_SCRIPT_SECONDS,
};
use crate::transport::{CallKind, Transport, TransportError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("line {line}: {kind} failed: {source}")]
    Transport {
        index: usize,
        line: usize,
        kind: CommandKind,
        #[source]
        source: TransportError,
    },

    /// The other lane failed first.
    #[error("dispatch halted")]
    Halted,
}

impl DispatchError {
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            DispatchError::Transport { source, .. } => Some(source),
            DispatchError::Halted => None,
        }
    }
}

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

/// A script's commands split into the two dispatch lanes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchPlan {
    pub ordered: Vec<ScenarioCommand>,
    pub gated: Vec<ScenarioCommand>,
}

impl DispatchPlan {
    pub fn split(script: &ScenarioScript) -> Self {
        let (gated, ordered): (Vec<_>, Vec<_>) = script
            .commands()
            .iter()
            .cloned()
            .partition(ScenarioCommand::is_gated);
        Self { ordered, gated }
    }
}

/// One acknowledged command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRecord {
    pub index: usize,
    pub line: usize,
    pub kind: CommandKind,
    pub entity: Option<EntityId>,
    pub gated: bool,
}

/// Whether `gate` holds on `snapshot`. `Elapsed` gates are time-based and
/// never hold on state alone.
pub fn gate_holds(gate: &Gate, snapshot: &Snapshot) -> bool {
    match gate {
        Gate::Reached { entity, waypoint } => snapshot
            .get(entity)
            .and_then(|state| state.lane.as_deref())
            .is_some_and(|lane| lane == waypoint),
        Gate::Stopped { entity } => snapshot
            .get(entity)
            .is_some_and(|state| state.motion == MotionState::Stopped),
        Gate::Elapsed { .. } => false,
    }
}

/// Script seconds as a [`Duration`], clamped to `0..=MAX_SCRIPT_SECONDS`.
/// The parser rejects anything outside that range; hand-built commands are
/// clamped instead of overflowing.
pub fn script_span(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.clamp(0.0, MAX_SCRIPT_SECONDS)).unwrap_or(Duration::ZERO)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sends one scenario's commands. Clones share records, warnings and the
/// halt flag.
#[derive(Clone)]
pub struct CommandDispatcher {
    transport: Arc<dyn Transport>,
    monitor: Arc<FeedbackMonitor>,
    gate_timeout: Duration,
    localization_retries: u32,
    retry_interval: Duration,
    epoch: Instant,
    records: Arc<Mutex<Vec<DispatchRecord>>>,
    warnings: Arc<Mutex<Vec<ScenarioWarning>>>,
    halted: Arc<AtomicBool>,
    ego_spawned: Arc<AtomicBool>,
}

impl CommandDispatcher {
    /// Create a dispatcher; `elapsed` gates count from this moment.
    pub fn new(
        transport: Arc<dyn Transport>,
        monitor: Arc<FeedbackMonitor>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            transport,
            monitor,
            gate_timeout: config.gate_timeout(),
            localization_retries: config.localization_retries.max(1),
            retry_interval: config.retry_interval(),
            epoch: Instant::now(),
            records: Arc::new(Mutex::new(Vec::new())),
            warnings: Arc::new(Mutex::new(Vec::new())),
            halted: Arc::new(AtomicBool::new(false)),
            ego_spawned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Send the ungated commands in order.
    pub async fn run_ordered(&self, commands: &[ScenarioCommand]) -> DispatchResult<()> {
        for command in commands {
            if let CommandBody::Wait { seconds } = &command.body {
                debug!(line = command.line, seconds, "ordered lane waiting");
                tokio::time::sleep(script_span(*seconds)).await;
                continue;
            }
            self.send(command).await?;
        }
        Ok(())
    }

    /// Start the gated lane on its own task.
    pub fn spawn_gated(&self, commands: Vec<ScenarioCommand>) -> JoinHandle<DispatchResult<()>> {
        let lane = self.clone();
        tokio::spawn(async move { lane.run_gated(commands).await })
    }

    async fn run_gated(&self, commands: Vec<ScenarioCommand>) -> DispatchResult<()> {
        for command in commands {
            let Some(gate) = &command.gate else {
                self.send(&command).await?;
                continue;
            };

            match self.await_gate(gate).await {
                WaitOutcome::Satisfied => {
                    debug!(line = command.line, gate = %gate, "gate satisfied");
                    self.send(&command).await?;
                }
                WaitOutcome::TimedOut => {
                    let waited_ms = self.gate_timeout.as_millis() as u64;
                    obs::emit_gate_timed_out(command.index, command.line, &gate.to_string(), waited_ms);
                    lock(&self.warnings).push(ScenarioWarning::GatedCommandTimeout {
                        index: command.index,
                        line: command.line,
                        gate: gate.to_string(),
                        waited_ms,
                    });
                }
                WaitOutcome::Disconnected => {
                    warn!(line = command.line, "feedback lost, gated lane stopped");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn await_gate(&self, gate: &Gate) -> WaitOutcome {
        match gate {
            Gate::Elapsed { seconds } => match self.epoch.checked_add(script_span(*seconds)) {
                Some(at) => {
                    tokio::time::sleep_until(at).await;
                    WaitOutcome::Satisfied
                }
                None => WaitOutcome::TimedOut,
            },
            _ => {
                self.monitor
                    .wait_for(|snapshot| gate_holds(gate, snapshot), self.gate_timeout)
                    .await
            }
        }
    }

    async fn send(&self, command: &ScenarioCommand) -> DispatchResult<()> {
        if self.is_halted() {
            return Err(DispatchError::Halted);
        }
        let (Some(call), Some(entity)) = (CallKind::for_command(command.kind()), command.entity())
        else {
            return Ok(());
        };

        let params = command.params();
        self.transport
            .send_command(entity, call, &params)
            .await
            .map_err(|source| self.fail(command, source))?;

        lock(&self.records).push(DispatchRecord {
            index: command.index,
            line: command.line,
            kind: command.kind(),
            entity: Some(entity.clone()),
            gated: command.is_gated(),
        });
        obs::emit_command_dispatched(
            command.index,
            command.line,
            command.kind().keyword(),
            entity.as_str(),
            command.is_gated(),
        );

        if let CommandBody::Spawn { role, .. } = &command.body {
            let stream = self
                .transport
                .subscribe_state(entity)
                .await
                .map_err(|source| self.fail(command, source))?;
            self.monitor.attach(entity.clone(), stream);

            if *role == ActorRole::Ego {
                self.localize(entity, &params)
                    .await
                    .map_err(|source| self.fail(command, source))?;
                self.ego_spawned.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn localize(&self, ego: &EntityId, params: &CommandParams) -> Result<(), TransportError> {
        let mut attempt = 1;
        loop {
            match self.transport.initialize_localization(ego, params).await {
                Ok(()) => {
                    info!(entity = %ego, attempt, "localization initialized");
                    return Ok(());
                }
                Err(err) if err.is_fatal() || attempt >= self.localization_retries => {
                    return Err(err);
                }
                Err(err) => {
                    debug!(entity = %ego, attempt, error = %err, "localization not ready, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    fn fail(&self, command: &ScenarioCommand, source: TransportError) -> DispatchError {
        self.halted.store(true, Ordering::SeqCst);
        warn!(line = command.line, kind = %command.kind(), error = %source, "command failed, dispatch halted");
        DispatchError::Transport {
            index: command.index,
            line: command.line,
            kind: command.kind(),
            source,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Whether the ego's spawn was acknowledged and it was localized.
    pub fn ego_spawned(&self) -> bool {
        self.ego_spawned.load(Ordering::SeqCst)
    }

    /// Acknowledged commands, in the order they were sent.
    pub fn records(&self) -> Vec<DispatchRecord> {
        lock(&self.records).clone()
    }

    pub fn commands_sent(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn warnings(&self) -> Vec<ScenarioWarning> {
        lock(&self.warnings).clone()
    }
}
