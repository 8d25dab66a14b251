use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use chitchat_core::ids::{ConnectionId, RoomId};

use crate::channel::RoomChannel;
use crate::registry::ConnectionRegistry;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(90);

/// Lifecycle of a live connection. `Closed` is terminal; a reconnecting
/// client always starts over at `Connecting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Active,
    Closed,
}

/// One open client session, scoped to a single chatroom. Owned by the
/// registry for the duration of its registration; outbound delivery goes
/// through a bounded queue so no sender ever blocks on this peer's socket.
pub struct LiveConnection {
    id: ConnectionId,
    room_id: RoomId,
    tx: mpsc::Sender<String>,
    phase: Mutex<ConnectionPhase>,
    last_pong: AtomicU64,
}

impl LiveConnection {
    /// Create a connection in `Connecting` with a bounded outbound queue.
    /// Returns the receiving half for the writer task.
    pub fn new(room_id: RoomId, max_send_queue: usize) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(max_send_queue);
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            room_id,
            tx,
            phase: Mutex::new(ConnectionPhase::Connecting),
            last_pong: AtomicU64::new(now_secs()),
        });
        (conn, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.phase.lock()
    }

    /// `Connecting` → `Active`, once the handshake is done and the
    /// connection is registered. False if the connection already left
    /// `Connecting` (e.g. closed during the handshake).
    pub fn activate(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase == ConnectionPhase::Connecting {
            *phase = ConnectionPhase::Active;
            true
        } else {
            false
        }
    }

    /// Transition into the terminal `Closed` phase. Returns true only on
    /// the first call, so close-driven cleanup runs at most once; later
    /// calls from racing paths are no-ops.
    pub fn close(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase == ConnectionPhase::Closed {
            false
        } else {
            *phase = ConnectionPhase::Closed;
            true
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase() == ConnectionPhase::Active
    }

    /// Queue a payload for delivery, non-blocking. Fails when the queue is
    /// full (backpressure) or the writer side is gone.
    pub fn try_send(&self, payload: &str) -> Result<(), mpsc::error::TrySendError<String>> {
        self.tx.try_send(payload.to_owned())
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    /// Liveness check for the stale sweep: has the transport answered a
    /// heartbeat recently?
    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < CONNECTION_TIMEOUT.as_secs()
    }

    #[cfg(test)]
    pub(crate) fn force_stale(&self) {
        self.last_pong.store(0, Ordering::Relaxed);
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Drive an upgraded WebSocket through its lifecycle: register, pump
/// payloads both ways, deregister on any exit path.
///
/// The writer task forwards the outbound queue to the socket and emits
/// heartbeat pings; the reader hands every inbound text payload to the
/// room channel and tracks pongs. Either side ending tears down both.
pub async fn serve_socket(
    socket: WebSocket,
    room_id: RoomId,
    registry: Arc<ConnectionRegistry>,
    channel: Arc<RoomChannel>,
) {
    let (conn, mut rx) = LiveConnection::new(room_id, registry.max_send_queue());
    registry.register(Arc::clone(&conn));
    conn.activate();
    tracing::info!(connection_id = %conn.id(), room_id = %conn.room_id(), "connection active");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: forward queued payloads to the socket + periodic ping
    let writer_conn = Arc::clone(&conn);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                payload = rx.recv() => {
                    match payload {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_conn.id(), "sent ping");
                }
            }
        }
    });

    // Reader task: fan inbound payloads out to the room, track pongs
    let reader_conn = Arc::clone(&conn);
    let reader_channel = Arc::clone(&channel);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    reader_channel.broadcast(
                        reader_conn.room_id(),
                        reader_conn.id(),
                        text.as_str(),
                    );
                }
                WsMessage::Pong(_) => reader_conn.record_pong(),
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pongs automatically
                _ => {}
            }
        }
    });

    // Either task finishing means the transport is done
    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    if conn.close() {
        tracing::info!(connection_id = %conn.id(), room_id = %conn.room_id(), "connection closed");
    }
    registry.deregister(conn.room_id(), conn.id());
}
