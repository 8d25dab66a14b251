use std::sync::Arc;

use chitchat_core::ids::{ConnectionId, RoomId};

use crate::connection::ConnectionPhase;
use crate::registry::ConnectionRegistry;

/// Per-room broadcast: deliver one inbound payload to every other live
/// connection registered for that room.
///
/// Pure transport fan-out: no validation, persistence, or authorization
/// happens here. Each peer send is isolated: a failure deregisters that
/// peer and never aborts the loop for the others.
pub struct RoomChannel {
    registry: Arc<ConnectionRegistry>,
}

impl RoomChannel {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Fan `payload` out to every connection in the room except the
    /// sender. Sends are non-blocking against each peer's bounded queue;
    /// a full queue or a gone writer counts as a dead peer and triggers
    /// its deregistration. Returns the number of peers reached.
    pub fn broadcast(&self, room_id: &RoomId, sender: &ConnectionId, payload: &str) -> usize {
        let peers = self.registry.snapshot(room_id);
        let mut delivered = 0;

        for peer in peers {
            if peer.id() == sender {
                continue;
            }
            match peer.phase() {
                ConnectionPhase::Closed => {
                    self.registry.deregister(room_id, peer.id());
                    continue;
                }
                // Registered but handshake not finished yet; skip, don't evict
                ConnectionPhase::Connecting => continue,
                ConnectionPhase::Active => {}
            }
            match peer.try_send(payload) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        connection_id = %peer.id(),
                        room_id = %room_id,
                        error = %e,
                        "peer send failed, deregistering"
                    );
                    peer.close();
                    self.registry.deregister(room_id, peer.id());
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LiveConnection;
    use tokio::sync::mpsc;

    fn setup(queue: usize) -> (Arc<ConnectionRegistry>, RoomChannel, RoomId) {
        let registry = Arc::new(ConnectionRegistry::new(queue));
        let channel = RoomChannel::new(Arc::clone(&registry));
        (registry, channel, RoomId::new())
    }

    fn join(
        registry: &ConnectionRegistry,
        room: &RoomId,
    ) -> (Arc<LiveConnection>, mpsc::Receiver<String>) {
        let (conn, rx) = LiveConnection::new(room.clone(), registry.max_send_queue());
        registry.register(Arc::clone(&conn));
        conn.activate();
        (conn, rx)
    }

    #[test]
    fn broadcast_reaches_peers_never_sender() {
        let (registry, channel, room) = setup(32);
        let (a, mut rx_a) = join(&registry, &room);
        let (_b, mut rx_b) = join(&registry, &room);
        let (_c, mut rx_c) = join(&registry, &room);

        let delivered = channel.broadcast(&room, a.id(), "hello");
        assert_eq!(delivered, 2);
        assert_eq!(rx_b.try_recv().unwrap(), "hello");
        assert_eq!(rx_c.try_recv().unwrap(), "hello");
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn broadcast_delivers_exactly_once_per_peer() {
        let (registry, channel, room) = setup(32);
        let (a, _rx_a) = join(&registry, &room);
        let (_b, mut rx_b) = join(&registry, &room);

        channel.broadcast(&room, a.id(), "hello");
        assert_eq!(rx_b.try_recv().unwrap(), "hello");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn broadcast_to_empty_room_is_noop() {
        let (_registry, channel, room) = setup(32);
        let ghost = ConnectionId::new();
        assert_eq!(channel.broadcast(&room, &ghost, "anyone there?"), 0);
    }

    #[test]
    fn broadcast_scoped_to_room() {
        let (registry, channel, room_x) = setup(32);
        let room_y = RoomId::new();
        let (a, _rx_a) = join(&registry, &room_x);
        let (_other, mut rx_other) = join(&registry, &room_y);

        channel.broadcast(&room_x, a.id(), "for room x");
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn closed_peer_is_skipped_and_deregistered() {
        let (registry, channel, room) = setup(32);
        let (a, _rx_a) = join(&registry, &room);
        let (b, mut rx_b) = join(&registry, &room);
        let (c, mut rx_c) = join(&registry, &room);

        c.close();
        let delivered = channel.broadcast(&room, a.id(), "hello");
        assert_eq!(delivered, 1);
        assert_eq!(rx_b.try_recv().unwrap(), "hello");
        assert!(rx_c.try_recv().is_err());
        // The closed peer was removed; later broadcasts never target it
        assert_eq!(registry.count(&room), 2);
        let _ = b;
    }

    #[test]
    fn dead_receiver_triggers_deregistration() {
        let (registry, channel, room) = setup(32);
        let (a, _rx_a) = join(&registry, &room);
        let (b, rx_b) = join(&registry, &room);
        drop(rx_b);

        let delivered = channel.broadcast(&room, a.id(), "hello");
        assert_eq!(delivered, 0);
        assert!(!b.is_active());
        assert_eq!(registry.count(&room), 1);
    }

    #[test]
    fn full_queue_counts_as_failed_peer() {
        let (registry, channel, room) = setup(1);
        let (a, _rx_a) = join(&registry, &room);
        let (_b, _rx_b) = join(&registry, &room);

        assert_eq!(channel.broadcast(&room, a.id(), "first"), 1);
        // Queue of one is now full; the peer is treated as dead
        assert_eq!(channel.broadcast(&room, a.id(), "second"), 0);
        assert_eq!(registry.count(&room), 1);
    }

    #[test]
    fn failed_peer_does_not_block_others() {
        let (registry, channel, room) = setup(32);
        let (a, _rx_a) = join(&registry, &room);
        let (_dead, rx_dead) = join(&registry, &room);
        let (_live, mut rx_live) = join(&registry, &room);
        drop(rx_dead);

        let delivered = channel.broadcast(&room, a.id(), "hello");
        assert_eq!(delivered, 1);
        assert_eq!(rx_live.try_recv().unwrap(), "hello");
    }

    #[test]
    fn per_sender_order_is_preserved() {
        let (registry, channel, room) = setup(32);
        let (a, _rx_a) = join(&registry, &room);
        let (_b, mut rx_b) = join(&registry, &room);

        channel.broadcast(&room, a.id(), "one");
        channel.broadcast(&room, a.id(), "two");
        channel.broadcast(&room, a.id(), "three");

        assert_eq!(rx_b.try_recv().unwrap(), "one");
        assert_eq!(rx_b.try_recv().unwrap(), "two");
        assert_eq!(rx_b.try_recv().unwrap(), "three");
    }

    #[test]
    fn disconnect_then_send_reaches_remaining_peer_only() {
        // U1 sends to room X with U2 and U3 connected; U3 disconnects;
        // the next send reaches U2 alone.
        let (registry, channel, room) = setup(32);
        let (u1, _rx_u1) = join(&registry, &room);
        let (_u2, mut rx_u2) = join(&registry, &room);
        let (u3, mut rx_u3) = join(&registry, &room);

        assert_eq!(channel.broadcast(&room, u1.id(), "hello"), 2);
        assert_eq!(rx_u2.try_recv().unwrap(), "hello");
        assert_eq!(rx_u3.try_recv().unwrap(), "hello");

        u3.close();
        registry.deregister(&room, u3.id());

        assert_eq!(channel.broadcast(&room, u1.id(), "still here?"), 1);
        assert_eq!(rx_u2.try_recv().unwrap(), "still here?");
        assert!(rx_u3.try_recv().is_err());
    }
}
