//! TCP bridge transport.
//!
//! Frames are single-line JSON objects tagged by `op`. Every request carries
//! a numeric `id` that the bridge echoes in its `ack`. State pushes arrive
//! unsolicited and are fanned out to every open subscription for the entity.
//!
//! ```text
//! -> {"id":3,"op":"command","entity":"npc1","call":"set_route","params":{"lanes":["A"]}}
//! <- {"op":"ack","id":3,"ok":true}
//! <- {"op":"state","entity":"npc1","seq":41,"lane":"A","motion":"moving"}
//! ```

use crate::monitor::RuntimeState;
use crate::script::{CommandParams, EntityId};
use crate::transport::{
    Ack, CallKind, ClientStatus, RecordingState, StateStream, Transport, TransportError,
    TransportResult,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Command {
        entity: EntityId,
        call: CallKind,
        params: CommandParams,
    },
    Subscribe {
        entity: EntityId,
    },
    Localize {
        entity: EntityId,
        params: CommandParams,
    },
    Engage {
        entity: EntityId,
    },
    Status {
        status: ClientStatus,
        code: u8,
    },
    RecordingState,
    ClearRoute,
    RemoveActors,
}

impl Request {
    fn operation(&self) -> String {
        match self {
            Request::Command { entity, call, .. } => format!("{call} {entity}"),
            Request::Subscribe { entity } => format!("subscribe {entity}"),
            Request::Localize { entity, .. } => format!("localize {entity}"),
            Request::Engage { entity } => format!("engage {entity}"),
            Request::Status { code, .. } => format!("status {code}"),
            Request::RecordingState => "recording_state".to_string(),
            Request::ClearRoute => "clear_route".to_string(),
            Request::RemoveActors => "remove_actors".to_string(),
        }
    }
}

#[derive(Serialize)]
struct Frame<'a> {
    id: u64,
    #[serde(flatten)]
    request: &'a Request,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Inbound {
    Ack {
        id: u64,
        ok: bool,
        #[serde(default)]
        message: String,
        #[serde(default)]
        recording: Option<RecordingState>,
    },
    State(RuntimeState),
}

#[derive(Debug)]
struct Reply {
    message: String,
    recording: Option<RecordingState>,
}

type Pending = oneshot::Sender<Result<Reply, String>>;

/// Connection state shared with the reader task.
#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, Pending>>,
    subscribers: Mutex<HashMap<EntityId, Vec<mpsc::UnboundedSender<RuntimeState>>>>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn deliver(&self, message: Inbound) {
        match message {
            Inbound::Ack {
                id,
                ok,
                message,
                recording,
            } => match lock(&self.pending).remove(&id) {
                Some(reply) => {
                    let result = if ok {
                        Ok(Reply { message, recording })
                    } else {
                        Err(message)
                    };
                    let _ = reply.send(result);
                }
                None => debug!(id, "ack for unknown or expired request"),
            },
            Inbound::State(state) => {
                let mut subscribers = lock(&self.subscribers);
                if let Some(senders) = subscribers.get_mut(&state.entity) {
                    senders.retain(|tx| tx.send(state.clone()).is_ok());
                }
            }
        }
    }

    /// Fail every pending request and end every state stream.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.pending).clear();
        lock(&self.subscribers).clear();
    }
}

/// [`Transport`] over a newline-delimited JSON TCP connection.
pub struct BridgeTransport {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    ack_timeout: Duration,
    reader: JoinHandle<()>,
}

impl BridgeTransport {
    /// Connect to the bridge at `addr`.
    #[instrument(skip(ack_timeout))]
    pub async fn connect(addr: &str, ack_timeout: Duration) -> TransportResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!(addr, "connected to bridge");
        Ok(Self::from_stream(stream, ack_timeout))
    }

    fn from_stream(stream: TcpStream, ack_timeout: Duration) -> Self {
        let (read, write) = stream.into_split();
        let shared = Arc::new(Shared::default());
        let reader = tokio::spawn(read_loop(read, Arc::clone(&shared)));
        Self {
            writer: tokio::sync::Mutex::new(write),
            shared,
            next_id: AtomicU64::new(1),
            ack_timeout,
            reader,
        }
    }

    /// Whether the bridge connection has been lost.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    async fn request(&self, request: Request) -> TransportResult<Reply> {
        if self.shared.is_closed() {
            return Err(TransportError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&Frame {
            id,
            request: &request,
        })?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id, tx);
        if self.shared.is_closed() {
            lock(&self.shared.pending).remove(&id);
            return Err(TransportError::Disconnected);
        }

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(err) => Err(err),
            }
        };
        if let Err(err) = written {
            warn!(error = %err, "bridge write failed");
            lock(&self.shared.pending).remove(&id);
            return Err(TransportError::Disconnected);
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(Ok(reply))) => Ok(reply),
            Ok(Ok(Err(message))) => Err(TransportError::Rejected {
                operation: request.operation(),
                message,
            }),
            Ok(Err(_)) => Err(TransportError::Disconnected),
            Err(_) => {
                lock(&self.shared.pending).remove(&id);
                Err(TransportError::NoAck {
                    operation: request.operation(),
                    timeout_ms: self.ack_timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(read: OwnedReadHalf, shared: Arc<Shared>) {
    let mut lines = BufReader::new(read).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Inbound>(&line) {
                    Ok(message) => shared.deliver(message),
                    Err(err) => warn!(error = %err, "ignoring malformed bridge frame"),
                }
            }
            Ok(None) => {
                warn!("bridge closed the connection");
                break;
            }
            Err(err) => {
                warn!(error = %err, "bridge read failed");
                break;
            }
        }
    }
    shared.close();
}

#[async_trait::async_trait]
impl Transport for BridgeTransport {
    async fn send_command(
        &self,
        entity: &EntityId,
        call: CallKind,
        params: &CommandParams,
    ) -> TransportResult<Ack> {
        let reply = self
            .request(Request::Command {
                entity: entity.clone(),
                call,
                params: params.clone(),
            })
            .await?;
        Ok(Ack {
            message: reply.message,
        })
    }

    async fn subscribe_state(&self, entity: &EntityId) -> TransportResult<StateStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Registered before the request so no push after the ack is lost.
        lock(&self.shared.subscribers)
            .entry(entity.clone())
            .or_default()
            .push(tx);
        self.request(Request::Subscribe {
            entity: entity.clone(),
        })
        .await?;

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|state| (state, rx))
        });
        Ok(stream.boxed())
    }

    async fn initialize_localization(
        &self,
        entity: &EntityId,
        params: &CommandParams,
    ) -> TransportResult<()> {
        self.request(Request::Localize {
            entity: entity.clone(),
            params: params.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn engage(&self, entity: &EntityId) -> TransportResult<()> {
        self.request(Request::Engage {
            entity: entity.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn publish_status(&self, status: ClientStatus) -> TransportResult<()> {
        self.request(Request::Status {
            status,
            code: status.code(),
        })
        .await
        .map(|_| ())
    }

    async fn recording_state(&self) -> TransportResult<RecordingState> {
        let reply = self.request(Request::RecordingState).await?;
        Ok(reply.recording.unwrap_or_default())
    }

    async fn clear_route(&self) -> TransportResult<()> {
        self.request(Request::ClearRoute).await.map(|_| ())
    }

    async fn remove_actors(&self) -> TransportResult<()> {
        self.request(Request::RemoveActors).await.map(|_| ())
    }
}
