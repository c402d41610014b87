//! The three-namespace room registry.
//!
//! One flat mapping `room id → (peer id → handle)`; ip strings, secrets
//! (64–256 chars) and public ids (5 chars) cannot collide, so the
//! namespaces stay disjoint without separate maps. The room type only
//! matters for the events emitted to observers.
//!
//! Event ordering contract for `join`: a stale entry for the same peer id
//! leaves first (reconnects must never show a late `peer-left` after the
//! fresh `peer-joined`), then `peer-joined` goes to the other occupants
//! and the `peers` snapshot to the joiner, and only then is the joiner
//! inserted — so it is excluded from both.

use std::collections::HashMap;
use std::sync::Arc;

use beamdrop_core::messages::{RoomType, ServerMessage};
use tracing::debug;

use crate::peer::PeerHandle;

/// Secret rooms are named by 64–256 character ASCII strings.
pub fn is_room_secret(s: &str) -> bool {
    (64..=256).contains(&s.len()) && s.bytes().all(|b| b.is_ascii())
}

/// Public rooms are named by 5 lowercase alphanumerics.
pub fn is_public_room_id(s: &str) -> bool {
    s.len() == 5
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Membership map for all rooms; rooms are created on first join and
/// dropped on last leave.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, HashMap<String, Arc<PeerHandle>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `peer` to the room, emitting `peer-joined` to the other
    /// occupants and a `peers` snapshot to the joiner.
    pub fn join(&mut self, peer: &Arc<PeerHandle>, room_type: RoomType, room_id: &str) {
        if let Some(stale) = self.rooms.get(room_id).and_then(|r| r.get(&peer.id)).cloned() {
            self.leave(&stale, room_type, room_id, false);
        }

        let room = self.rooms.entry(room_id.to_string()).or_default();
        for other in room.values() {
            other.send(&ServerMessage::PeerJoined {
                peer: peer.info(),
                room_type,
                room_id: room_id.to_string(),
            });
        }
        peer.send(&ServerMessage::Peers {
            peers: room.values().map(|p| p.info()).collect(),
            room_type,
            room_id: room_id.to_string(),
        });
        room.insert(peer.id.clone(), peer.clone());
        debug!(peer_id = %peer.id, room_id, ?room_type, "peer joined room");
    }

    /// Remove `peer` from the room, emitting `peer-left` to the remaining
    /// occupants. A non-member (or an entry belonging to a newer
    /// connection with the same peer id) is a no-op.
    ///
    /// Returns `true` when the peer was a member.
    pub fn leave(
        &mut self,
        peer: &Arc<PeerHandle>,
        room_type: RoomType,
        room_id: &str,
        disconnect: bool,
    ) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        match room.get(&peer.id) {
            Some(member) if member.conn_id == peer.conn_id => {}
            _ => return false,
        }
        room.remove(&peer.id);

        if room.is_empty() {
            self.rooms.remove(room_id);
            debug!(room_id, "room emptied, dropped");
            return true;
        }
        for other in room.values() {
            other.send(&ServerMessage::PeerLeft {
                peer_id: peer.id.clone(),
                room_type,
                room_id: room_id.to_string(),
                disconnect,
            });
        }
        true
    }

    /// Drop a whole room without emissions, returning its occupants.
    pub fn remove_room(&mut self, room_id: &str) -> Vec<Arc<PeerHandle>> {
        self.rooms
            .remove(room_id)
            .map(|room| room.into_values().collect())
            .unwrap_or_default()
    }

    /// Occupants of a room, if it exists.
    pub fn occupants(&self, room_id: &str) -> Option<Vec<Arc<PeerHandle>>> {
        self.rooms
            .get(room_id)
            .map(|room| room.values().cloned().collect())
    }

    /// Look up one member of a room.
    pub fn member(&self, room_id: &str, peer_id: &str) -> Option<&Arc<PeerHandle>> {
        self.rooms.get(room_id)?.get(peer_id)
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
