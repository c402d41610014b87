//! Peer identity helpers: id-shape validation and salted hashing.
//!
//! Peer ids are UUID-shaped 36-character ASCII strings, stable across
//! reconnects via a client cookie. The salted hash lets clients pair a
//! display name with an id without learning the raw cookie value of a
//! third party; the salt is drawn once per process, so hashes are stable
//! for the process lifetime only.

use sha2::{Digest, Sha256};

/// Length of a peer id on the wire (UUID text form).
pub const PEER_ID_LEN: usize = 36;

/// Check whether `s` is UUID-shaped: 36 ASCII characters with hyphens at
/// the canonical positions and hex digits everywhere else.
pub fn is_peer_id(s: &str) -> bool {
    if s.len() != PEER_ID_LEN {
        return false;
    }
    s.bytes().enumerate().all(|(i, b)| match i {
        8 | 13 | 18 | 23 => b == b'-',
        _ => b.is_ascii_hexdigit(),
    })
}

/// Salted SHA-256 of a peer id, hex encoded.
pub fn peer_id_hash(peer_id: &str, salt: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(peer_id.as_bytes());
    hasher.update(salt);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_uuid() {
        assert!(is_peer_id("c7b9e2f1-0a3d-4e5f-8b6c-1d2e3f4a5b6c"));
        assert!(is_peer_id("ABCDEF01-2345-6789-abcd-ef0123456789"));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(!is_peer_id(""));
        assert!(!is_peer_id("c7b9e2f1-0a3d-4e5f-8b6c-1d2e3f4a5b6"));
        assert!(!is_peer_id("c7b9e2f1-0a3d-4e5f-8b6c-1d2e3f4a5b6c0"));
    }

    #[test]
    fn rejects_misplaced_hyphens() {
        assert!(!is_peer_id("c7b9e2f10a-3d-4e5f-8b6c-1d2e3f4a5b6c"));
        assert!(!is_peer_id("c7b9e2f1-0a3d-4e5f-8b6c-1d2e3f4a5b-c"));
    }

    #[test]
    fn rejects_non_hex() {
        assert!(!is_peer_id("g7b9e2f1-0a3d-4e5f-8b6c-1d2e3f4a5b6c"));
        assert!(!is_peer_id("c7b9e2f1-0a3d-4e5f-8b6c-1d2e3f4a5b6 "));
    }

    #[test]
    fn hash_is_salted_and_stable() {
        let id = "c7b9e2f1-0a3d-4e5f-8b6c-1d2e3f4a5b6c";
        let a = peer_id_hash(id, b"salt-one");
        let b = peer_id_hash(id, b"salt-one");
        let c = peer_id_hash(id, b"salt-two");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64); // SHA-256 = 32 bytes = 64 hex chars
    }
}
