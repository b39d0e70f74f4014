//! In-memory transport fake (testing only)
//!
//! [`FakeTransport`] acknowledges every call unless told otherwise, records
//! what it was asked to do, and lets tests push runtime state into open
//! subscriptions.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::monitor::RuntimeState;
use crate::script::{CommandParams, EntityId};
use crate::transport::{
    Ack, CallKind, ClientStatus, RecordingState, StateStream, Transport, TransportError,
    TransportResult,
};

/// Scripted response to one `send_command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Answer with a negative acknowledgment.
    Reject(String),
    /// Never acknowledge.
    NoAck,
    /// Drop the connection: every stream ends and later calls fail.
    Disconnect,
}

/// A `send_command` the fake accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct SentCommand {
    pub entity: EntityId,
    pub call: CallKind,
    pub params: CommandParams,
}

#[derive(Debug, Default)]
struct Inner {
    reactions: Mutex<HashMap<(CallKind, EntityId), Reaction>>,
    subscribers: Mutex<HashMap<EntityId, Vec<mpsc::UnboundedSender<RuntimeState>>>>,
    states: Mutex<HashMap<EntityId, RuntimeState>>,
    sent: Mutex<Vec<SentCommand>>,
    operations: Mutex<Vec<String>>,
    statuses: Mutex<Vec<ClientStatus>>,
    recording: Mutex<VecDeque<RecordingState>>,
    localization_failures: Mutex<usize>,
    reset_failures: Mutex<usize>,
    arrive_after: Mutex<Option<Duration>>,
    disconnected: AtomicBool,
}

impl Inner {
    fn log(&self, operation: String) {
        self.operations.lock().unwrap().push(operation);
    }

    fn check_connected(&self) -> TransportResult<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            Err(TransportError::Disconnected)
        } else {
            Ok(())
        }
    }

    /// Publish the next state of `entity`, derived from its previous one.
    fn emit(&self, entity: &EntityId, update: impl FnOnce(RuntimeState) -> RuntimeState) {
        let next = {
            let mut states = self.states.lock().unwrap();
            let previous = states
                .get(entity)
                .cloned()
                .unwrap_or_else(|| RuntimeState::new(entity.clone(), 0));
            let seq = previous.seq + 1;
            let mut next = update(previous);
            next.entity = entity.clone();
            next.seq = seq;
            states.insert(entity.clone(), next.clone());
            next
        };
        self.publish(next);
    }

    fn publish(&self, state: RuntimeState) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get_mut(&state.entity) {
            senders.retain(|tx| tx.send(state.clone()).is_ok());
        }
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        self.subscribers.lock().unwrap().clear();
    }

    fn take_failure(counter: &Mutex<usize>) -> bool {
        let mut remaining = counter.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

/// In-memory [`Transport`]. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Inner>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// After `set_goal` is acknowledged, report the ego ready for autonomous
    /// mode and then, `delay` later, arrived.
    pub fn with_arrival_after(self, delay: Duration) -> Self {
        *self.inner.arrive_after.lock().unwrap() = Some(delay);
        self
    }

    /// React to `call` on `entity` instead of acknowledging it.
    pub fn react(&self, call: CallKind, entity: impl Into<EntityId>, reaction: Reaction) {
        self.inner
            .reactions
            .lock()
            .unwrap()
            .insert((call, entity.into()), reaction);
    }

    /// Reject the next `count` localization attempts.
    pub fn fail_localization(&self, count: usize) {
        *self.inner.localization_failures.lock().unwrap() = count;
    }

    /// Reject the next `count` reset calls.
    pub fn fail_resets(&self, count: usize) {
        *self.inner.reset_failures.lock().unwrap() = count;
    }

    /// Queue recorder states returned by successive `recording_state` calls.
    /// Once drained the recorder reports `Idle`.
    pub fn queue_recording_states(&self, states: impl IntoIterator<Item = RecordingState>) {
        self.inner.recording.lock().unwrap().extend(states);
    }

    /// Push an explicit state to every subscriber of its entity.
    pub fn push_state(&self, state: RuntimeState) {
        self.inner
            .states
            .lock()
            .unwrap()
            .insert(state.entity.clone(), state.clone());
        self.inner.publish(state);
    }

    /// Push the next state of `entity`, with `seq` assigned by the fake.
    pub fn update_state(
        &self,
        entity: impl Into<EntityId>,
        update: impl FnOnce(RuntimeState) -> RuntimeState,
    ) {
        self.inner.emit(&entity.into(), update);
    }

    /// Simulate losing the bridge.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Commands acknowledged so far, in order.
    pub fn sent_commands(&self) -> Vec<SentCommand> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Every call attempted, acknowledged or not, e.g. `set_route npc1`.
    pub fn operations(&self) -> Vec<String> {
        self.inner.operations.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<ClientStatus> {
        self.inner.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_command(
        &self,
        entity: &EntityId,
        call: CallKind,
        params: &CommandParams,
    ) -> TransportResult<Ack> {
        self.inner.log(format!("{call} {entity}"));
        self.inner.check_connected()?;

        let reaction = self
            .inner
            .reactions
            .lock()
            .unwrap()
            .get(&(call, entity.clone()))
            .cloned();
        match reaction {
            Some(Reaction::Reject(message)) => {
                return Err(TransportError::Rejected {
                    operation: format!("{call} {entity}"),
                    message,
                })
            }
            Some(Reaction::NoAck) => {
                return Err(TransportError::NoAck {
                    operation: format!("{call} {entity}"),
                    timeout_ms: 0,
                })
            }
            Some(Reaction::Disconnect) => {
                self.inner.disconnect();
                return Err(TransportError::Disconnected);
            }
            None => {}
        }

        self.inner.sent.lock().unwrap().push(SentCommand {
            entity: entity.clone(),
            call,
            params: params.clone(),
        });

        let arrive_after = *self.inner.arrive_after.lock().unwrap();
        if let (CallKind::SetGoal, Some(delay)) = (call, arrive_after) {
            let inner = Arc::clone(&self.inner);
            let ego = entity.clone();
            tokio::spawn(async move {
                inner.emit(&ego, |s| s.with_autonomous_ready());
                tokio::time::sleep(delay).await;
                inner.emit(&ego, |s| s.with_goal_reached());
            });
        }

        Ok(Ack::default())
    }

    async fn subscribe_state(&self, entity: &EntityId) -> TransportResult<StateStream> {
        self.inner.log(format!("subscribe {entity}"));
        self.inner.check_connected()?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .entry(entity.clone())
            .or_default()
            .push(tx);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|state| (state, rx))
        });
        Ok(stream.boxed())
    }

    async fn initialize_localization(
        &self,
        entity: &EntityId,
        _params: &CommandParams,
    ) -> TransportResult<()> {
        self.inner.log(format!("localize {entity}"));
        self.inner.check_connected()?;
        if Inner::take_failure(&self.inner.localization_failures) {
            return Err(TransportError::Rejected {
                operation: format!("localize {entity}"),
                message: "localization not ready".to_string(),
            });
        }
        Ok(())
    }

    async fn engage(&self, entity: &EntityId) -> TransportResult<()> {
        self.inner.log(format!("engage {entity}"));
        self.inner.check_connected()
    }

    async fn publish_status(&self, status: ClientStatus) -> TransportResult<()> {
        self.inner.log(format!("status {}", status.code()));
        self.inner.check_connected()?;
        self.inner.statuses.lock().unwrap().push(status);
        Ok(())
    }

    async fn recording_state(&self) -> TransportResult<RecordingState> {
        self.inner.log("recording_state".to_string());
        self.inner.check_connected()?;
        Ok(self
            .inner
            .recording
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RecordingState::Idle))
    }

    async fn clear_route(&self) -> TransportResult<()> {
        self.inner.log("clear_route".to_string());
        self.inner.check_connected()
    }

    async fn remove_actors(&self) -> TransportResult<()> {
        self.inner.log("remove_actors".to_string());
        self.inner.check_connected()?;
        if Inner::take_failure(&self.inner.reset_failures) {
            return Err(TransportError::Rejected {
                operation: "remove_actors".to_string(),
                message: "actors busy".to_string(),
            });
        }
        self.inner.states.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_state_assigns_increasing_seq() {
        let fake = FakeTransport::new();
        let ego = EntityId::new("ego");
        let mut stream = fake.subscribe_state(&ego).await.unwrap();

        fake.update_state("ego", |s| s.with_lane("A"));
        fake.update_state("ego", |s| s.with_autonomous_ready());

        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert_eq!((first.seq, second.seq), (1, 2));
        assert_eq!(second.lane.as_deref(), Some("A"));
        assert!(second.autonomous_ready);
    }

    #[tokio::test]
    async fn test_reaction_and_disconnect() {
        let fake = FakeTransport::new();
        let npc = EntityId::new("npc1");
        fake.react(CallKind::SetRoute, "npc1", Reaction::Reject("bad lane".into()));

        let err = fake
            .send_command(&npc, CallKind::SetRoute, &CommandParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }));
        assert!(fake.sent_commands().is_empty());

        let mut stream = fake.subscribe_state(&npc).await.unwrap();
        fake.disconnect();
        assert!(stream.next().await.is_none());
        assert_eq!(
            fake.send_command(&npc, CallKind::SetVelocity, &CommandParams::new())
                .await
                .unwrap_err(),
            TransportError::Disconnected
        );
        assert_eq!(
            fake.operations(),
            vec!["set_route npc1", "subscribe npc1", "set_velocity npc1"]
        );
    }
}
