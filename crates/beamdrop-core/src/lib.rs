//! beamdrop-core: shared protocol library for the beamdrop hub.
//!
//! Provides the JSON control-message types, the fixed-header binary relay
//! frame codec, peer-identity helpers (id validation, salted hashing), and
//! display/device name derivation.

pub mod error;
pub mod frame;
pub mod identity;
pub mod messages;
pub mod naming;

// Re-export commonly used items at crate root.
pub use error::{HubError, HubResult};
pub use frame::{RelayFrame, RelayRoute};
pub use identity::{is_peer_id, peer_id_hash, PEER_ID_LEN};
pub use messages::{Name, PeerInfo, RoomType, ServerMessage, WsConfig};
pub use naming::derive_name;
