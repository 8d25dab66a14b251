use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use chitchat_core::ids::{ConnectionId, RoomId};

use crate::connection::{ConnectionPhase, LiveConnection};

/// Process-wide map from chatroom id to the live connections watching it.
///
/// Owns its own synchronization: the map is sharded by room id and every
/// operation holds a shard lock only briefly, never across network I/O.
/// Broadcasting works on a cloned-out snapshot.
pub struct ConnectionRegistry {
    rooms: DashMap<RoomId, HashMap<ConnectionId, Arc<LiveConnection>>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            max_send_queue,
        }
    }

    pub fn max_send_queue(&self) -> usize {
        self.max_send_queue
    }

    /// Add a connection under its room, creating the room entry on first
    /// use. Re-registering the same connection id replaces the old handle
    /// rather than duplicating it.
    pub fn register(&self, conn: Arc<LiveConnection>) {
        self.rooms
            .entry(conn.room_id().clone())
            .or_default()
            .insert(conn.id().clone(), conn);
    }

    /// Remove a connection from its room. A no-op when the connection is
    /// already gone (disconnects race with failed-send cleanup). Prunes
    /// the room entry once its set empties.
    pub fn deregister(&self, room_id: &RoomId, id: &ConnectionId) -> bool {
        let removed = match self.rooms.get_mut(room_id) {
            Some(mut entry) => entry.remove(id).is_some(),
            None => false,
        };
        self.rooms.remove_if(room_id, |_, conns| conns.is_empty());
        removed
    }

    /// Clone out the current connections for a room. Callers iterate and
    /// send without holding any registry lock.
    pub fn snapshot(&self, room_id: &RoomId) -> Vec<Arc<LiveConnection>> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of connections registered for a room.
    pub fn count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map(|entry| entry.len()).unwrap_or(0)
    }

    /// Total connections across all rooms.
    pub fn total(&self) -> usize {
        self.rooms.iter().map(|entry| entry.len()).sum()
    }

    /// Number of rooms with at least one live connection.
    pub fn open_rooms(&self) -> usize {
        self.rooms.len()
    }

    /// Deregister connections whose transport went silent past the
    /// heartbeat timeout, plus any already closed. Covers abnormal
    /// disconnects that never delivered a close frame.
    pub fn sweep_stale(&self) -> usize {
        let stale: Vec<(RoomId, ConnectionId)> = self
            .rooms
            .iter()
            .flat_map(|entry| {
                entry
                    .values()
                    .filter(|conn| !conn.is_alive() || conn.phase() == ConnectionPhase::Closed)
                    .map(|conn| (conn.room_id().clone(), conn.id().clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut removed = 0;
        for (room_id, id) in stale {
            if let Some(entry) = self.rooms.get(&room_id) {
                if let Some(conn) = entry.get(&id) {
                    conn.close();
                }
            }
            if self.deregister(&room_id, &id) {
                removed += 1;
                tracing::info!(connection_id = %id, room_id = %room_id, "swept stale connection");
            }
        }
        removed
    }
}

/// Start a background task that periodically sweeps stale connections.
pub fn start_sweep_task(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.sweep_stale();
            if removed > 0 {
                tracing::info!(removed = removed, "stale connection sweep");
            }
        }
    })
}
