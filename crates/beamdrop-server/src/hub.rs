//! The hub: rooms, pairing directory and peer table behind one
//! serialization domain.
//!
//! Every mutation of shared state happens under a single mutex, so each
//! room's observers see one total order of join/leave/relay events.
//! Handlers never await while holding the lock; outbound frames go
//! through per-connection unbounded queues drained by one writer task
//! each.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use beamdrop_core::frame::{RelayFrame, RelayRoute};
use beamdrop_core::messages::{
    JoinPublicRoomPayload, PairDeviceJoinPayload, RegenerateRoomSecretPayload, RoomSecretsPayload,
    RoomType, ServerMessage, WsConfig, CHUNK_SIZE, MAX_PARALLEL_TRANSFERS, WS_RELAY_TYPES,
};
use beamdrop_core::{derive_name, is_peer_id, peer_id_hash};
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::listener::ClientIdentity;
use crate::pairing::{generate_public_room_id, generate_room_secret, PairEntry, PairKeyDirectory};
use crate::peer::{Outbound, PeerHandle, PeerState};
use crate::rate_limit::RateLimiter;
use crate::rooms::{is_public_room_id, is_room_secret, RoomRegistry};

/// Heartbeat period; a peer is considered gone after two missed beats.
pub const KEEP_ALIVE_PERIOD: Duration = Duration::from_millis(2000);
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_millis(4000);

struct HubState {
    rooms: RoomRegistry,
    pair_keys: PairKeyDirectory,
    peers: HashMap<u64, PeerState>,
}

/// Process-wide hub instance.
pub struct Hub {
    state: Mutex<HubState>,
    config: HubConfig,
    /// Salt for peer-id hashes, drawn once at startup.
    id_salt: [u8; 16],
    next_conn_id: AtomicU64,
}

impl Hub {
    pub fn new(config: HubConfig) -> Self {
        let mut id_salt = [0u8; 16];
        OsRng.fill_bytes(&mut id_salt);
        Self {
            state: Mutex::new(HubState {
                rooms: RoomRegistry::new(),
                pair_keys: PairKeyDirectory::new(),
                peers: HashMap::new(),
            }),
            config,
            id_salt,
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a connection and push the two initial messages
    /// (`ws-config`, then `display-name`).
    pub async fn accept(
        &self,
        identity: ClientIdentity,
        ip: String,
        tx: mpsc::UnboundedSender<Outbound>,
    ) -> Arc<PeerHandle> {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let name = derive_name(&identity.peer_id, &identity.user_agent);
        let handle = Arc::new(PeerHandle::new(
            conn_id,
            identity.peer_id,
            ip,
            name.clone(),
            identity.rtc_supported,
            tx,
        ));
        let rate = RateLimiter::new(
            self.config.join_attempts,
            Duration::from_secs(self.config.join_window_secs),
        );
        {
            let mut state = self.state.lock().await;
            state
                .peers
                .insert(conn_id, PeerState::new(handle.clone(), rate));
        }

        handle.send(&ServerMessage::WsConfig {
            ws_config: WsConfig {
                rtc_config: self.config.rtc_config.clone(),
                ws_fallback: self.config.ws_fallback,
                chunk_size: CHUNK_SIZE,
                max_parallel_transfers: MAX_PARALLEL_TRANSFERS,
                disable_throttling: true,
            },
        });
        handle.send(&ServerMessage::DisplayName {
            display_name: name.display_name,
            device_name: name.device_name,
            peer_id: handle.id.clone(),
            peer_id_hash: peer_id_hash(&handle.id, &self.id_salt),
        });
        handle
    }

    /// Dispatch one inbound text frame.
    ///
    /// Returns `false` once the connection is disconnected and the read
    /// loop should end.
    pub async fn handle_text(&self, conn_id: u64, text: &str) -> bool {
        let message: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return true;
            }
        };
        let Some(msg_type) = message.get("type").and_then(Value::as_str).map(String::from)
        else {
            warn!("dropping frame without a type");
            return true;
        };

        let mut state = self.state.lock().await;
        if !state.peers.contains_key(&conn_id) {
            return false;
        }

        match msg_type.as_str() {
            "disconnect" => {
                self.disconnect_locked(&mut state, conn_id);
                return false;
            }
            "pong" => {
                if let Some(peer) = state.peers.get_mut(&conn_id) {
                    peer.last_beat = Instant::now();
                }
            }
            "join-ip-room" => {
                if let Some(handle) = state.peers.get(&conn_id).map(|p| p.handle.clone()) {
                    let ip = handle.ip.clone();
                    state.rooms.join(&handle, RoomType::Ip, &ip);
                }
            }
            "room-secrets" => self.on_room_secrets(&mut state, conn_id, message),
            "room-secrets-deleted" => self.on_room_secrets_deleted(&mut state, message),
            "pair-device-initiate" => self.on_pair_device_initiate(&mut state, conn_id),
            "pair-device-join" => self.on_pair_device_join(&mut state, conn_id, message),
            "pair-device-cancel" => self.on_pair_device_cancel(&mut state, conn_id),
            "regenerate-room-secret" => self.on_regenerate_room_secret(&mut state, message),
            "create-public-room" => self.on_create_public_room(&mut state, conn_id),
            "join-public-room" => self.on_join_public_room(&mut state, conn_id, message),
            "leave-public-room" => self.on_leave_public_room(&mut state, conn_id),
            "signal" => self.relay(&mut state, conn_id, message),
            t if WS_RELAY_TYPES.contains(&t) => {
                if self.config.ws_fallback {
                    self.relay(&mut state, conn_id, message);
                }
            }
            other => debug!(msg_type = other, "dropping unknown message type"),
        }
        true
    }

    /// Forward a binary relay frame to the recipient named in its header.
    pub async fn handle_binary(&self, conn_id: u64, data: &[u8]) {
        if !self.config.ws_fallback {
            return;
        }
        let Some(frame) = RelayFrame::parse(data) else {
            debug!(len = data.len(), "dropping malformed binary frame");
            return;
        };
        let state = self.state.lock().await;
        let Some(sender) = state.peers.get(&conn_id) else {
            return;
        };
        let room_id = match &frame.route {
            RelayRoute::Ip => sender.handle.ip.clone(),
            RelayRoute::Secret(secret) => secret.clone(),
        };
        if let Some(recipient) = state.rooms.member(&room_id, frame.recipient_id) {
            if recipient.is_open() {
                recipient.send_binary(frame.payload.to_vec());
            }
        }
    }

    /// Heartbeat tick for one connection: disconnect when stale, ping
    /// otherwise. Returns `false` once the connection is gone.
    pub async fn keep_alive_tick(&self, conn_id: u64) -> bool {
        let mut state = self.state.lock().await;
        let expired = match state.peers.get(&conn_id) {
            Some(peer) => peer.last_beat.elapsed() > KEEP_ALIVE_TIMEOUT,
            None => return false,
        };
        if expired {
            debug!(conn_id, "heartbeat timed out");
            self.disconnect_locked(&mut state, conn_id);
            return false;
        }
        if let Some(peer) = state.peers.get(&conn_id) {
            peer.handle.send(&ServerMessage::Ping);
        }
        true
    }

    /// Run the full cascading disconnect for a connection.
    pub async fn disconnect(&self, conn_id: u64) {
        let mut state = self.state.lock().await;
        self.disconnect_locked(&mut state, conn_id);
    }

    fn disconnect_locked(&self, state: &mut HubState, conn_id: u64) {
        let Some(mut peer) = state.peers.remove(&conn_id) else {
            return;
        };
        let handle = peer.handle.clone();

        if let Some(key) = peer.pair_key.take() {
            state.pair_keys.remove(&key);
        }
        // the keep-alive record is part of PeerState and dies with it
        let ip = handle.ip.clone();
        state.rooms.leave(&handle, RoomType::Ip, &ip, true);
        for secret in peer.room_secrets.drain(..) {
            state.rooms.leave(&handle, RoomType::Secret, &secret, true);
        }
        if let Some(room_id) = peer.public_room_id.take() {
            state.rooms.leave(&handle, RoomType::PublicId, &room_id, true);
        }
        // every peer-left above is queued before the close frame
        handle.terminate();
        info!(peer_id = %handle.id, "peer disconnected");
    }

    fn on_room_secrets(&self, state: &mut HubState, conn_id: u64, message: Value) {
        let Ok(payload) = serde_json::from_value::<RoomSecretsPayload>(message) else {
            warn!("dropping malformed room-secrets");
            return;
        };
        for secret in payload.room_secrets {
            if !is_room_secret(&secret) {
                debug!("ignoring ill-shaped room secret");
                continue;
            }
            self.join_secret_room(state, conn_id, &secret);
        }
    }

    fn on_room_secrets_deleted(&self, state: &mut HubState, message: Value) {
        let Ok(payload) = serde_json::from_value::<RoomSecretsPayload>(message) else {
            warn!("dropping malformed room-secrets-deleted");
            return;
        };
        for secret in payload.room_secrets {
            self.delete_secret_room(state, &secret);
        }
    }

    fn delete_secret_room(&self, state: &mut HubState, secret: &str) {
        let Some(occupants) = state.rooms.occupants(secret) else {
            return;
        };
        for occupant in occupants {
            state.rooms.leave(&occupant, RoomType::Secret, secret, false);
            if let Some(peer) = state.peers.get_mut(&occupant.conn_id) {
                peer.room_secrets.retain(|s| s != secret);
            }
            occupant.send(&ServerMessage::SecretRoomDeleted {
                room_secret: secret.to_string(),
            });
        }
    }

    fn on_pair_device_initiate(&self, state: &mut HubState, conn_id: u64) {
        let Some(peer) = state.peers.get_mut(&conn_id) else {
            return;
        };
        // a fresh initiate revokes any outstanding key from this peer
        if let Some(old) = peer.pair_key.take() {
            state.pair_keys.remove(&old);
        }
        let handle = peer.handle.clone();
        let room_secret = generate_room_secret();
        let pair_key = state.pair_keys.allocate_key();
        state.pair_keys.insert(
            pair_key.clone(),
            PairEntry {
                room_secret: room_secret.clone(),
                creator_conn: conn_id,
                creator_id: handle.id.clone(),
            },
        );
        peer.pair_key = Some(pair_key.clone());
        handle.send(&ServerMessage::PairDeviceInitiated {
            room_secret: room_secret.clone(),
            pair_key,
        });
        self.join_secret_room(state, conn_id, &room_secret);
    }

    fn on_pair_device_join(&self, state: &mut HubState, conn_id: u64, message: Value) {
        let Ok(payload) = serde_json::from_value::<PairDeviceJoinPayload>(message) else {
            warn!("dropping malformed pair-device-join");
            return;
        };
        let Some(peer) = state.peers.get_mut(&conn_id) else {
            return;
        };
        let joiner = peer.handle.clone();
        if peer.rate.limit_reached() {
            joiner.send(&ServerMessage::JoinKeyRateLimit);
            return;
        }
        // the creator pairing with itself is refused; the key survives
        let valid = state
            .pair_keys
            .get(&payload.pair_key)
            .is_some_and(|e| e.creator_id != joiner.id);
        if !valid {
            joiner.send(&ServerMessage::PairDeviceJoinKeyInvalid);
            return;
        }
        let Some(entry) = state.pair_keys.remove(&payload.pair_key) else {
            return;
        };
        if let Some(creator) = state.peers.get_mut(&entry.creator_conn) {
            creator.pair_key = None;
            creator.handle.send(&ServerMessage::PairDeviceJoined {
                room_secret: entry.room_secret.clone(),
                peer_id: joiner.id.clone(),
            });
            joiner.send(&ServerMessage::PairDeviceJoined {
                room_secret: entry.room_secret.clone(),
                peer_id: creator.handle.id.clone(),
            });
        }
        self.join_secret_room(state, conn_id, &entry.room_secret);
    }

    fn on_pair_device_cancel(&self, state: &mut HubState, conn_id: u64) {
        let Some(peer) = state.peers.get_mut(&conn_id) else {
            return;
        };
        if let Some(key) = peer.pair_key.take() {
            state.pair_keys.remove(&key);
            peer.handle
                .send(&ServerMessage::PairDeviceCanceled { pair_key: key });
        }
    }

    fn on_regenerate_room_secret(&self, state: &mut HubState, message: Value) {
        let Ok(payload) = serde_json::from_value::<RegenerateRoomSecretPayload>(message) else {
            warn!("dropping malformed regenerate-room-secret");
            return;
        };
        let old = payload.room_secret;
        let occupants = state.rooms.remove_room(&old);
        if occupants.is_empty() {
            return;
        }
        // occupants are told the new secret but not re-joined; they come
        // back through a room-secrets round-trip
        let new_secret = generate_room_secret();
        for occupant in occupants {
            if let Some(peer) = state.peers.get_mut(&occupant.conn_id) {
                peer.room_secrets.retain(|s| s != &old);
            }
            occupant.send(&ServerMessage::RoomSecretRegenerated {
                old_room_secret: old.clone(),
                new_room_secret: new_secret.clone(),
            });
        }
    }

    fn on_create_public_room(&self, state: &mut HubState, conn_id: u64) {
        self.leave_public_room_inner(state, conn_id);
        let Some(peer) = state.peers.get_mut(&conn_id) else {
            return;
        };
        let handle = peer.handle.clone();
        let mut room_id = generate_public_room_id();
        while state.rooms.contains(&room_id) {
            room_id = generate_public_room_id();
        }
        peer.public_room_id = Some(room_id.clone());
        handle.send(&ServerMessage::PublicRoomCreated {
            room_id: room_id.clone(),
        });
        state.rooms.join(&handle, RoomType::PublicId, &room_id);
    }

    fn on_join_public_room(&self, state: &mut HubState, conn_id: u64, message: Value) {
        let Ok(payload) = serde_json::from_value::<JoinPublicRoomPayload>(message) else {
            warn!("dropping malformed join-public-room");
            return;
        };
        let Some(peer) = state.peers.get_mut(&conn_id) else {
            return;
        };
        let handle = peer.handle.clone();
        if peer.rate.limit_reached() {
            handle.send(&ServerMessage::JoinKeyRateLimit);
            return;
        }
        let room_id = payload.public_room_id.to_lowercase();
        if !is_public_room_id(&room_id)
            || (!state.rooms.contains(&room_id) && !payload.create_if_invalid)
        {
            handle.send(&ServerMessage::PublicRoomIdInvalid {
                public_room_id: payload.public_room_id,
            });
            return;
        }
        self.leave_public_room_inner(state, conn_id);
        if let Some(peer) = state.peers.get_mut(&conn_id) {
            peer.public_room_id = Some(room_id.clone());
        }
        state.rooms.join(&handle, RoomType::PublicId, &room_id);
    }

    fn on_leave_public_room(&self, state: &mut HubState, conn_id: u64) {
        self.leave_public_room_inner(state, conn_id);
        if let Some(peer) = state.peers.get(&conn_id) {
            peer.handle.send(&ServerMessage::PublicRoomLeft);
        }
    }

    fn leave_public_room_inner(&self, state: &mut HubState, conn_id: u64) {
        let Some(peer) = state.peers.get_mut(&conn_id) else {
            return;
        };
        let Some(room_id) = peer.public_room_id.take() else {
            return;
        };
        let handle = peer.handle.clone();
        state.rooms.leave(&handle, RoomType::PublicId, &room_id, false);
    }

    fn join_secret_room(&self, state: &mut HubState, conn_id: u64, secret: &str) {
        let Some(peer) = state.peers.get_mut(&conn_id) else {
            return;
        };
        if !peer.room_secrets.iter().any(|s| s == secret) {
            peer.room_secrets.push(secret.to_string());
        }
        let handle = peer.handle.clone();
        state.rooms.join(&handle, RoomType::Secret, secret);
    }

    /// Forward a `signal`/relay message: resolve the room, strip `to`,
    /// attach the sender tag, deliver verbatim otherwise.
    fn relay(&self, state: &mut HubState, conn_id: u64, mut message: Value) {
        let Some(sender) = state.peers.get(&conn_id).map(|p| p.handle.clone()) else {
            return;
        };
        let room_id = match message.get("roomType").and_then(Value::as_str) {
            Some("ip") => sender.ip.clone(),
            _ => match message.get("roomId").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => return,
            },
        };
        let Some(to) = message.get("to").and_then(Value::as_str).map(String::from) else {
            return;
        };
        if !is_peer_id(&to) {
            return;
        }
        let Some(recipient) = state.rooms.member(&room_id, &to).cloned() else {
            return;
        };
        if let Some(map) = message.as_object_mut() {
            map.remove("to");
            map.insert(
                "sender".to_string(),
                json!({ "id": sender.id, "rtcSupported": sender.rtc_supported }),
            );
        }
        recipient.send_raw(&message);
    }
}
