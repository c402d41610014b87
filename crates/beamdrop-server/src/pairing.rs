//! Short-lived pair-key directory for device pairing.
//!
//! A pair key rendezvous two devices into a freshly minted room secret.
//! The directory owns each entry; the creating peer holds only the key
//! string as a back-link, which the hub clears on removal.

use std::collections::HashMap;

use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

/// Length of a minted room secret.
pub const ROOM_SECRET_LEN: usize = 256;

const PUBLIC_ROOM_ID_LEN: usize = 5;
const PUBLIC_ROOM_ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A pending pairing created by `pair-device-initiate`.
#[derive(Debug, Clone)]
pub struct PairEntry {
    pub room_secret: String,
    /// Connection that created the entry.
    pub creator_conn: u64,
    /// Peer id of the creator; a joiner presenting the same id is refused.
    pub creator_id: String,
}

#[derive(Debug, Default)]
pub struct PairKeyDirectory {
    entries: HashMap<String, PairEntry>,
}

impl PairKeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a key not currently in the directory.
    ///
    /// Keys are uniform 6-digit decimal strings; drawing in
    /// `1_000_000..2_000_000` and dropping the leading `1` preserves
    /// leading zeros.
    pub fn allocate_key(&self) -> String {
        let mut rng = OsRng;
        loop {
            let n: u32 = rng.gen_range(1_000_000..2_000_000);
            let key = n.to_string().split_off(1);
            if !self.entries.contains_key(&key) {
                return key;
            }
        }
    }

    pub fn insert(&mut self, key: String, entry: PairEntry) {
        self.entries.insert(key, entry);
    }

    pub fn get(&self, key: &str) -> Option<&PairEntry> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<PairEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 256-character alphanumeric room secret from the OS RNG.
pub fn generate_room_secret() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(ROOM_SECRET_LEN)
        .map(char::from)
        .collect()
}

/// 5-character lowercase alphanumeric public room id.
pub fn generate_public_room_id() -> String {
    let mut rng = OsRng;
    (0..PUBLIC_ROOM_ID_LEN)
        .map(|_| PUBLIC_ROOM_ID_CHARS[rng.gen_range(0..PUBLIC_ROOM_ID_CHARS.len())] as char)
        .collect()
}
