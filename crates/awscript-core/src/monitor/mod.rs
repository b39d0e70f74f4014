//! Feedback monitor: latest runtime state per entity.
//!
//! Each transport subscription is drained by an ingest task that folds
//! updates into a shared [`Snapshot`] published on a `tokio::sync::watch`
//! channel. Readers never consume updates, so any number of waiters (gated
//! commands, the runner's monitoring loop) observe the same stream.
//!
//! Updates are applied last-writer-wins by the sender's `seq`; stale and
//! duplicate updates are dropped. A subscription stream that ends marks the
//! monitor disconnected.

pub mod state;

use crate::script::EntityId;
use crate::transport::StateStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use state::{Fault, MotionState, Position, RoutingState, RuntimeState};

/// Point-in-time view of everything the monitor knows.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    states: HashMap<EntityId, RuntimeState>,
    disconnected: bool,
}

impl Snapshot {
    pub fn get(&self, entity: &EntityId) -> Option<&RuntimeState> {
        self.states.get(entity)
    }

    /// Whether a feedback stream has been lost.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}

/// How a [`FeedbackMonitor::wait_for`] call resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Satisfied,
    TimedOut,
    Disconnected,
}

/// Per-scenario store of runtime state fed by transport subscriptions.
///
/// Dropping the monitor aborts every ingest task.
pub struct FeedbackMonitor {
    tx: Arc<watch::Sender<Snapshot>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for FeedbackMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::default());
        Self {
            tx: Arc::new(tx),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Drain `stream` into the monitor on a background task.
    pub fn attach(&self, entity: EntityId, mut stream: StateStream) {
        let tx = Arc::clone(&self.tx);
        let handle = tokio::spawn(async move {
            while let Some(update) = stream.next().await {
                if !apply(&tx, update) {
                    debug!(entity = %entity, "dropped stale or duplicate state update");
                }
            }
            warn!(entity = %entity, "feedback stream closed");
            tx.send_modify(|snapshot| snapshot.disconnected = true);
        });
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// Apply one update directly. Returns `false` when it was stale.
    pub fn apply(&self, update: RuntimeState) -> bool {
        apply(&self.tx, update)
    }

    /// Current state of `entity`, if any update has arrived.
    pub fn state(&self, entity: &EntityId) -> Option<RuntimeState> {
        self.tx.borrow().get(entity).cloned()
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.borrow().is_disconnected()
    }

    /// Receiver that wakes on every applied update.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Wait until `predicate` holds, `timeout` elapses or feedback is lost.
    ///
    /// A predicate that already holds resolves immediately, even when the
    /// monitor is disconnected.
    pub async fn wait_for<P>(&self, predicate: P, timeout: Duration) -> WaitOutcome
    where
        P: Fn(&Snapshot) -> bool,
    {
        let mut rx = self.subscribe();
        let wait = async {
            loop {
                {
                    let snapshot = rx.borrow_and_update();
                    if predicate(&snapshot) {
                        return WaitOutcome::Satisfied;
                    }
                    if snapshot.is_disconnected() {
                        return WaitOutcome::Disconnected;
                    }
                }
                if rx.changed().await.is_err() {
                    return WaitOutcome::Disconnected;
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(WaitOutcome::TimedOut)
    }

    /// Abort every ingest task. Idempotent.
    pub fn shutdown(&self) {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// Number of ingest tasks still running.
    pub fn active_subscriptions(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }
}

impl Drop for FeedbackMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn apply(tx: &watch::Sender<Snapshot>, update: RuntimeState) -> bool {
    tx.send_if_modified(move |snapshot| match snapshot.states.get(&update.entity) {
        Some(current) if current.seq >= update.seq => false,
        _ => {
            snapshot.states.insert(update.entity.clone(), update);
            true
        }
    })
}
