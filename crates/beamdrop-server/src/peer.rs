//! Per-connection peer state.
//!
//! A connection is split in two: the immutable [`PeerHandle`] (identity
//! plus the outbound queue), shared with every room the peer occupies,
//! and the hub-owned [`PeerState`] (room lists, pair key, heartbeat and
//! rate-limit bookkeeping) which lives and dies with the connection.

use std::time::Instant;

use beamdrop_core::messages::{Name, PeerInfo, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

use crate::rate_limit::RateLimiter;

/// Frames queued for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Text(String),
    Binary(Vec<u8>),
    /// Close the socket after everything queued before this is flushed.
    Terminate,
}

/// Immutable identity of a connected peer plus its outbound queue.
#[derive(Debug)]
pub struct PeerHandle {
    /// Connection id, unique per socket (a peer id can reconnect).
    pub conn_id: u64,
    /// UUID-shaped peer id, stable across reconnects via the client cookie.
    pub id: String,
    /// Canonical observed IP; doubles as the peer's ip-room key.
    pub ip: String,
    pub name: Name,
    pub rtc_supported: bool,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PeerHandle {
    pub fn new(
        conn_id: u64,
        id: String,
        ip: String,
        name: Name,
        rtc_supported: bool,
        tx: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            conn_id,
            id,
            ip,
            name,
            rtc_supported,
            tx,
        }
    }

    /// Queue a control message; drops silently once the writer is gone.
    pub fn send(&self, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(text) => {
                let _ = self.tx.send(Outbound::Text(text));
            }
            Err(e) => trace!(error = %e, "failed to encode outbound message"),
        }
    }

    /// Queue an already-assembled JSON object (relayed traffic).
    pub fn send_raw(&self, value: &serde_json::Value) {
        let _ = self.tx.send(Outbound::Text(value.to_string()));
    }

    /// Queue relayed payload bytes.
    pub fn send_binary(&self, bytes: Vec<u8>) {
        let _ = self.tx.send(Outbound::Binary(bytes));
    }

    /// Ask the writer task to close the socket.
    pub fn terminate(&self) {
        let _ = self.tx.send(Outbound::Terminate);
    }

    /// Whether the connection's writer is still accepting frames.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            rtc_supported: self.rtc_supported,
        }
    }
}

/// Mutable per-connection state, owned by the hub.
#[derive(Debug)]
pub struct PeerState {
    pub handle: Arc<PeerHandle>,
    /// Secret rooms in join order, duplicate-free.
    pub room_secrets: Vec<String>,
    pub public_room_id: Option<String>,
    /// Pair key this peer created, if one is outstanding.
    pub pair_key: Option<String>,
    /// Wall time of the last heartbeat (connect or `pong`).
    pub last_beat: Instant,
    pub rate: RateLimiter,
}

impl PeerState {
    pub fn new(handle: Arc<PeerHandle>, rate: RateLimiter) -> Self {
        Self {
            handle,
            room_secrets: Vec::new(),
            public_room_id: None,
            pair_key: None,
            last_beat: Instant::now(),
            rate,
        }
    }
}
