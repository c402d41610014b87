//! JSON control messages exchanged between the hub and its peers.
//!
//! Text frames carry a `type`-tagged JSON object with camelCase payload
//! keys. Outbound messages are fully typed; inbound frames are dispatched
//! from raw `serde_json::Value`s (relayed messages must be forwarded
//! verbatim apart from the `to`/`sender` rewrite), with the payload
//! structs below deserialized per handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The three disjoint room namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomType {
    #[serde(rename = "ip")]
    Ip,
    #[serde(rename = "secret")]
    Secret,
    #[serde(rename = "public-id")]
    PublicId,
}

/// Display and device name pair shown to other peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Name {
    pub display_name: String,
    pub device_name: String,
}

/// What a peer sees of another occupant of a shared room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    pub name: Name,
    pub rtc_supported: bool,
}

/// Payload of `ws-config`, pushed once right after the upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsConfig {
    /// Opaque ICE/TURN blob, handed through untouched.
    pub rtc_config: Value,
    pub ws_fallback: bool,
    pub chunk_size: u64,
    pub max_parallel_transfers: u32,
    pub disable_throttling: bool,
}

/// Chunk size advertised to clients for fallback transfers (10 MiB).
pub const CHUNK_SIZE: u64 = 10_485_760;

/// Parallel transfer cap advertised to clients.
pub const MAX_PARALLEL_TRANSFERS: u32 = 8;

/// Server → client control messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    WsConfig {
        ws_config: WsConfig,
    },
    DisplayName {
        display_name: String,
        device_name: String,
        peer_id: String,
        peer_id_hash: String,
    },
    Ping,
    Peers {
        peers: Vec<PeerInfo>,
        room_type: RoomType,
        room_id: String,
    },
    PeerJoined {
        peer: PeerInfo,
        room_type: RoomType,
        room_id: String,
    },
    PeerLeft {
        peer_id: String,
        room_type: RoomType,
        room_id: String,
        disconnect: bool,
    },
    PairDeviceInitiated {
        room_secret: String,
        pair_key: String,
    },
    PairDeviceJoined {
        room_secret: String,
        peer_id: String,
    },
    PairDeviceCanceled {
        pair_key: String,
    },
    PairDeviceJoinKeyInvalid,
    JoinKeyRateLimit,
    SecretRoomDeleted {
        room_secret: String,
    },
    RoomSecretRegenerated {
        old_room_secret: String,
        new_room_secret: String,
    },
    PublicRoomCreated {
        room_id: String,
    },
    PublicRoomIdInvalid {
        public_room_id: String,
    },
    PublicRoomLeft,
}

/// Payload of `room-secrets` and `room-secrets-deleted`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSecretsPayload {
    pub room_secrets: Vec<String>,
}

/// Payload of `pair-device-join`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairDeviceJoinPayload {
    pub pair_key: String,
}

/// Payload of `regenerate-room-secret`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateRoomSecretPayload {
    pub room_secret: String,
}

/// Payload of `join-public-room`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPublicRoomPayload {
    pub public_room_id: String,
    #[serde(default)]
    pub create_if_invalid: bool,
}

/// Message types relayed through the hub only when `ws_fallback` is on.
pub const WS_RELAY_TYPES: &[&str] = &[
    "request",
    "header",
    "partition",
    "partition-received",
    "progress",
    "files-transfer-response",
    "file-transfer-complete",
    "message-transfer-complete",
    "text",
    "display-name-changed",
    "ws-chunk",
    "ws-chunk-binary",
];
