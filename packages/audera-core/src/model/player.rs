//! Player and Group data model (spec §3 "Player", "Group").

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A discovered output node, as persisted by the config collaborator.
///
/// Invariant I5: `playing ⇒ enabled ∧ connected`; disabling or disconnecting
/// forces `playing := false`. All mutators below maintain this invariant —
/// there is no way to construct a `Player` with `playing=true` while
/// `enabled=false` or `connected=false` short of mutating the fields
/// directly, which this module does not expose outside the struct's own
/// methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub uuid: Uuid,
    pub mac_address: String,
    pub address: String,
    pub provider: String,
    /// Loudness, 0 (muted) to 100.
    pub volume: u8,
    pub channels: u8,
    pub enabled: bool,
    pub connected: bool,
    pub playing: bool,
}

impl Player {
    /// Creates a new player record from an identity, defaulting to enabled,
    /// disconnected, and not playing (a freshly discovered player has not
    /// yet completed the sync handshake).
    #[must_use]
    pub fn from_identity(identity: &crate::identity::Identity) -> Self {
        Self {
            name: identity.name.clone(),
            uuid: identity.uuid,
            mac_address: identity.mac_address.clone(),
            address: identity.address.clone(),
            provider: "audera".to_string(),
            volume: 50,
            channels: 2,
            enabled: true,
            connected: false,
            playing: false,
        }
    }

    /// Short UUID for log lines (first hex group).
    #[must_use]
    pub fn short_uuid(&self) -> String {
        self.uuid.to_string().split('-').next().unwrap_or_default().to_string()
    }

    /// Marks the player as playing. No-op (returns `false`) if not currently
    /// `enabled ∧ connected` (invariant I5).
    pub fn play(&mut self) -> bool {
        if self.enabled && self.connected {
            self.playing = true;
            true
        } else {
            false
        }
    }

    /// Marks the player as stopped.
    pub fn stop(&mut self) {
        self.playing = false;
    }

    /// Marks the player connected. Does not by itself start playback.
    pub fn connect(&mut self) {
        self.connected = true;
    }

    /// Marks the player disconnected, forcing `playing := false` (invariant I5).
    pub fn disconnect(&mut self) {
        self.connected = false;
        self.playing = false;
    }

    /// Enables the player.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Disables the player, forcing `playing := false` (invariant I5).
    pub fn disable(&mut self) {
        self.enabled = false;
        self.playing = false;
    }

    /// Whether this player is a candidate for attachment: `enabled ∧ connected`
    /// (spec §6.3 `get_all_available`).
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.enabled && self.connected
    }
}

/// A named bag of player UUIDs (spec §3 "Group").
///
/// Invariant: `playing ⇒ enabled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub uuid: Uuid,
    pub players: Vec<Uuid>,
    pub provider: String,
    pub volume: u8,
    pub enabled: bool,
    pub playing: bool,
}

impl Group {
    #[must_use]
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
            players: Vec::new(),
            provider: "audera".to_string(),
            volume: 50,
            enabled: true,
            playing: false,
        }
    }

    /// Marks the group playing. No-op (returns `false`) if not `enabled`.
    pub fn play(&mut self) -> bool {
        if self.enabled {
            self.playing = true;
            true
        } else {
            false
        }
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    /// Disables the group, forcing `playing := false`.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.playing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_player() -> Player {
        let identity = crate::identity::Identity::new("kitchen", "AA:BB:CC:DD:EE:FF", "10.0.0.5");
        Player::from_identity(&identity)
    }

    // I5: enabled=false or connected=false always forces playing=false.
    #[test]
    fn disconnect_forces_not_playing() {
        let mut p = make_player();
        p.connect();
        assert!(p.play());
        assert!(p.playing);

        p.disconnect();
        assert!(!p.playing);
        assert!(!p.connected);
    }

    #[test]
    fn disable_forces_not_playing() {
        let mut p = make_player();
        p.connect();
        assert!(p.play());

        p.disable();
        assert!(!p.playing);
        assert!(!p.enabled);
    }

    #[test]
    fn play_requires_enabled_and_connected() {
        let mut p = make_player();
        // Not connected yet.
        assert!(!p.play());
        assert!(!p.playing);
    }

    #[test]
    fn group_disable_forces_not_playing() {
        let mut g = Group::new("Downstairs", Uuid::new_v4());
        assert!(g.play());
        g.disable();
        assert!(!g.playing);
    }
}
