//! Stable node identity (spec §3 "Identity", §9 "Identity semantics").
//!
//! Equality is defined solely by `(uuid, mac_address)` — name and IP may
//! change across boots. The UUID is derived deterministically from the
//! MAC address so a node recognizes itself across restarts even before any
//! persisted record is consulted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// DNS namespace UUID, matching the original implementation's
/// `uuid.uuid3(uuid.NAMESPACE_DNS, mac_address)` derivation.
const NAMESPACE_DNS: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
]);

/// Derives a stable UUID from a MAC address.
///
/// Colons are stripped before hashing, matching
/// `mac_address.replace(':', '')` in the original implementation.
#[must_use]
pub fn uuid_from_mac_address(mac_address: &str) -> Uuid {
    let stripped: String = mac_address.chars().filter(|c| *c != ':').collect();
    Uuid::new_v3(&NAMESPACE_DNS, stripped.as_bytes())
}

/// The stable identity of an Audera node (streamer or player).
///
/// Invariant (spec I4): equality depends only on `(uuid, mac_address)`;
/// re-running [`Identity::refreshed`] with a different `address` preserves
/// `name` and `uuid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Immutable human-readable name, chosen once at first start.
    pub name: String,
    /// UUID derived deterministically from `mac_address`.
    pub uuid: Uuid,
    /// Media access control address of the network adapter.
    pub mac_address: String,
    /// Current IP address; may change across boots.
    pub address: String,
}

impl Identity {
    /// Creates a fresh identity for first start.
    #[must_use]
    pub fn new(name: impl Into<String>, mac_address: impl Into<String>, address: impl Into<String>) -> Self {
        let mac_address = mac_address.into();
        let uuid = uuid_from_mac_address(&mac_address);
        Self {
            name: name.into(),
            uuid,
            mac_address,
            address: address.into(),
        }
    }

    /// Returns the first 8 hex characters of the UUID, for log lines.
    #[must_use]
    pub fn short_uuid(&self) -> String {
        self.uuid.simple().to_string()[..8].to_string()
    }

    /// Re-emits this identity with the current IP, preserving name and uuid.
    ///
    /// This is the "re-emitted on every start with the current IP" lifecycle
    /// rule from spec §3: a node changing IPs keeps its durable record.
    #[must_use]
    pub fn refreshed(&self, current_address: impl Into<String>) -> Self {
        Self {
            name: self.name.clone(),
            uuid: self.uuid,
            mac_address: self.mac_address.clone(),
            address: current_address.into(),
        }
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid && self.mac_address == other.mac_address
    }
}

impl Eq for Identity {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_derivation_is_deterministic() {
        let a = uuid_from_mac_address("AA:BB:CC:DD:EE:FF");
        let b = uuid_from_mac_address("AA:BB:CC:DD:EE:FF");
        assert_eq!(a, b);
    }

    #[test]
    fn uuid_derivation_ignores_colon_formatting() {
        let with_colons = uuid_from_mac_address("AA:BB:CC:DD:EE:FF");
        let without_colons = uuid_from_mac_address("AABBCCDDEEFF");
        assert_eq!(with_colons, without_colons);
    }

    #[test]
    fn identity_equality_ignores_name_and_address() {
        let a = Identity::new("kitchen", "AA:BB:CC:DD:EE:FF", "192.168.1.10");
        let b = Identity::new("living-room", "AA:BB:CC:DD:EE:FF", "192.168.1.20");
        assert_eq!(a, b);
    }

    #[test]
    fn identity_equality_distinguishes_mac() {
        let a = Identity::new("kitchen", "AA:BB:CC:DD:EE:FF", "192.168.1.10");
        let b = Identity::new("kitchen", "11:22:33:44:55:66", "192.168.1.10");
        assert_ne!(a, b);
    }

    // I4: re-running identity update with a different IP preserves name and uuid.
    #[test]
    fn refreshed_preserves_name_and_uuid() {
        let original = Identity::new("kitchen", "AA:BB:CC:DD:EE:FF", "192.168.1.10");
        let refreshed = original.refreshed("192.168.1.99");
        assert_eq!(refreshed.name, original.name);
        assert_eq!(refreshed.uuid, original.uuid);
        assert_eq!(refreshed.address, "192.168.1.99");
        assert_eq!(refreshed, original);
    }
}
