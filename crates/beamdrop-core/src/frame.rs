//! Fixed-header binary relay frames.
//!
//! Wire format:
//!
//! ```text
//! bytes [0..36)    recipient peer id (ASCII, UUID text form)
//! byte  [36]       route marker: 'i' = sender's ip room, 's' = secret room
//! bytes [37..101)  secret-room key, right-padded (used when marker = 's')
//! bytes [101..)    opaque payload, forwarded untouched
//! ```

use crate::identity::{is_peer_id, PEER_ID_LEN};

pub const MARKER_IP: u8 = b'i';
pub const MARKER_SECRET: u8 = b's';

/// Width of the fixed secret-room key field.
pub const SECRET_FIELD_LEN: usize = 64;

/// Total header length before the payload.
pub const HEADER_LEN: usize = PEER_ID_LEN + 1 + SECRET_FIELD_LEN;

/// Routing selector carried in the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayRoute {
    /// Deliver within the sender's ip room.
    Ip,
    /// Deliver within the named secret room.
    Secret(String),
}

/// A parsed binary relay frame. Payload bytes are borrowed, never copied.
#[derive(Debug, PartialEq, Eq)]
pub struct RelayFrame<'a> {
    pub recipient_id: &'a str,
    pub route: RelayRoute,
    pub payload: &'a [u8],
}

impl<'a> RelayFrame<'a> {
    /// Parse a frame. Returns `None` for anything malformed: short frame,
    /// non-UUID-shaped recipient, unknown marker.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        let recipient_id = std::str::from_utf8(&data[..PEER_ID_LEN]).ok()?;
        if !is_peer_id(recipient_id) {
            return None;
        }
        let route = match data[PEER_ID_LEN] {
            MARKER_IP => RelayRoute::Ip,
            MARKER_SECRET => {
                let field = std::str::from_utf8(&data[PEER_ID_LEN + 1..HEADER_LEN]).ok()?;
                RelayRoute::Secret(field.trim_end_matches(['\0', ' ']).to_string())
            }
            _ => return None,
        };
        Some(Self {
            recipient_id,
            route,
            payload: &data[HEADER_LEN..],
        })
    }

    /// Encode a frame. The secret field is zero-padded; secrets longer
    /// than the field are truncated to its width.
    pub fn encode(recipient_id: &str, route: &RelayRoute, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(recipient_id.as_bytes());
        frame.resize(PEER_ID_LEN, 0);
        match route {
            RelayRoute::Ip => {
                frame.push(MARKER_IP);
                frame.resize(HEADER_LEN, 0);
            }
            RelayRoute::Secret(secret) => {
                frame.push(MARKER_SECRET);
                let bytes = secret.as_bytes();
                let take = bytes.len().min(SECRET_FIELD_LEN);
                frame.extend_from_slice(&bytes[..take]);
                frame.resize(HEADER_LEN, 0);
            }
        }
        frame.extend_from_slice(payload);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECIPIENT: &str = "c7b9e2f1-0a3d-4e5f-8b6c-1d2e3f4a5b6c";

    #[test]
    fn parse_ip_route() {
        let data = RelayFrame::encode(RECIPIENT, &RelayRoute::Ip, b"HELLO");
        let frame = RelayFrame::parse(&data).unwrap();
        assert_eq!(frame.recipient_id, RECIPIENT);
        assert_eq!(frame.route, RelayRoute::Ip);
        assert_eq!(frame.payload, b"HELLO");
    }

    #[test]
    fn parse_secret_route_trims_padding() {
        let data = RelayFrame::encode(RECIPIENT, &RelayRoute::Secret("abc123".into()), b"x");
        let frame = RelayFrame::parse(&data).unwrap();
        assert_eq!(frame.route, RelayRoute::Secret("abc123".into()));
        assert_eq!(frame.payload, b"x");
    }

    #[test]
    fn parse_secret_route_trims_spaces() {
        let mut data = Vec::new();
        data.extend_from_slice(RECIPIENT.as_bytes());
        data.push(MARKER_SECRET);
        let mut field = [b' '; SECRET_FIELD_LEN];
        field[..3].copy_from_slice(b"key");
        data.extend_from_slice(&field);
        data.extend_from_slice(b"payload");
        let frame = RelayFrame::parse(&data).unwrap();
        assert_eq!(frame.route, RelayRoute::Secret("key".into()));
    }

    #[test]
    fn empty_payload_is_valid() {
        let data = RelayFrame::encode(RECIPIENT, &RelayRoute::Ip, b"");
        let frame = RelayFrame::parse(&data).unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn short_frame_is_rejected() {
        let data = RelayFrame::encode(RECIPIENT, &RelayRoute::Ip, b"HELLO");
        assert!(RelayFrame::parse(&data[..HEADER_LEN - 1]).is_none());
        assert!(RelayFrame::parse(b"").is_none());
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        let mut data = RelayFrame::encode(RECIPIENT, &RelayRoute::Ip, b"HELLO");
        data[0] = b'!';
        assert!(RelayFrame::parse(&data).is_none());
    }

    #[test]
    fn unknown_marker_is_rejected() {
        let mut data = RelayFrame::encode(RECIPIENT, &RelayRoute::Ip, b"HELLO");
        data[PEER_ID_LEN] = b'x';
        assert!(RelayFrame::parse(&data).is_none());
    }
}
