//! Deterministic peer naming.
//!
//! The display name is derived from the peer id alone, so a returning
//! device keeps its name across reconnects; the device name is sniffed
//! from the User-Agent header.

use sha2::{Digest, Sha256};

use crate::messages::Name;

const ADJECTIVES: &[&str] = &[
    "Amber", "Arctic", "Bold", "Brave", "Bright", "Calm", "Clever", "Coral",
    "Crimson", "Daring", "Eager", "Emerald", "Gentle", "Golden", "Happy",
    "Indigo", "Jolly", "Lively", "Lucky", "Mellow", "Misty", "Noble",
    "Olive", "Proud", "Quick", "Royal", "Scarlet", "Silent", "Silver",
    "Swift", "Violet", "Witty",
];

const ANIMALS: &[&str] = &[
    "Badger", "Bison", "Condor", "Crane", "Dolphin", "Falcon", "Ferret",
    "Fox", "Gazelle", "Gecko", "Heron", "Ibex", "Jackal", "Koala", "Lemur",
    "Lynx", "Magpie", "Marmot", "Marten", "Mole", "Otter", "Owl", "Panda",
    "Penguin", "Puffin", "Raven", "Salmon", "Seal", "Stork", "Tapir",
    "Walrus", "Weasel",
];

/// Derive the `{displayName, deviceName}` pair for a peer.
pub fn derive_name(peer_id: &str, user_agent: &str) -> Name {
    Name {
        display_name: display_name(peer_id),
        device_name: device_name(user_agent),
    }
}

/// Adjective-animal pair selected by the digest of the peer id.
fn display_name(peer_id: &str) -> String {
    let digest = Sha256::digest(peer_id.as_bytes());
    let adjective = ADJECTIVES[digest[0] as usize % ADJECTIVES.len()];
    let animal = ANIMALS[digest[1] as usize % ANIMALS.len()];
    format!("{adjective} {animal}")
}

/// Coarse "OS Browser" label from the User-Agent; enough for a human to
/// tell their own devices apart.
fn device_name(user_agent: &str) -> String {
    let os = sniff_os(user_agent);
    let browser = sniff_browser(user_agent);
    match (os, browser) {
        (Some(os), Some(browser)) => format!("{os} {browser}"),
        (Some(os), None) => os.to_string(),
        (None, Some(browser)) => browser.to_string(),
        (None, None) => "Unknown Device".to_string(),
    }
}

fn sniff_os(ua: &str) -> Option<&'static str> {
    // iPad reports "Macintosh" on modern Safari, check mobile markers first
    if ua.contains("iPhone") {
        Some("iPhone")
    } else if ua.contains("iPad") {
        Some("iPad")
    } else if ua.contains("Android") {
        Some("Android")
    } else if ua.contains("Windows") {
        Some("Windows")
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        Some("Mac")
    } else if ua.contains("CrOS") {
        Some("ChromeOS")
    } else if ua.contains("Linux") {
        Some("Linux")
    } else {
        None
    }
}

fn sniff_browser(ua: &str) -> Option<&'static str> {
    // order matters: Edge and Opera carry a Chrome token, Chrome carries Safari
    if ua.contains("Edg/") || ua.contains("Edge/") {
        Some("Edge")
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        Some("Opera")
    } else if ua.contains("Firefox/") {
        Some("Firefox")
    } else if ua.contains("Chrome/") || ua.contains("CriOS/") {
        Some("Chrome")
    } else if ua.contains("Safari/") {
        Some("Safari")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIREFOX_LINUX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0";
    const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) \
         AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1";
    const EDGE_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0";

    #[test]
    fn display_name_is_deterministic() {
        let id = "c7b9e2f1-0a3d-4e5f-8b6c-1d2e3f4a5b6c";
        let a = derive_name(id, FIREFOX_LINUX);
        let b = derive_name(id, CHROME_WINDOWS);
        assert_eq!(a.display_name, b.display_name);
    }

    #[test]
    fn display_name_varies_with_id() {
        let a = derive_name("c7b9e2f1-0a3d-4e5f-8b6c-1d2e3f4a5b6c", "");
        let b = derive_name("00000000-0000-4000-8000-000000000000", "");
        // not guaranteed in general, but these two digests differ
        assert_ne!(a.display_name, b.display_name);
    }

    #[test]
    fn device_name_sniffing() {
        assert_eq!(device_name(FIREFOX_LINUX), "Linux Firefox");
        assert_eq!(device_name(CHROME_WINDOWS), "Windows Chrome");
        assert_eq!(device_name(SAFARI_IPHONE), "iPhone Safari");
        assert_eq!(device_name(EDGE_WINDOWS), "Windows Edge");
        assert_eq!(device_name(""), "Unknown Device");
    }
}
