//! Config collaborator interface (spec §4.10, §6.3) and a non-durable
//! default implementation (SPEC_FULL §6.6).
//!
//! The core only ever *consumes* this trait — spec §1 places the durable
//! store out of scope as a feature. [`InMemoryConfigStore`] exists so the
//! rest of the crate has something real to run and test against; it
//! persists an optional JSON snapshot the same way `thaumic-core`'s
//! `ManualSpeakerConfig` does (temp-file-then-rename, one global lock
//! serializing writes), but any real collaborator only needs to implement
//! [`ConfigStore`].

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuderaError, AuderaResult};
use crate::identity::Identity;
use crate::model::audio::{AudioDevice, AudioInterface, DeviceRole};
use crate::model::player::{Group, Player};
use crate::model::session::Session;

/// Every tunable named across spec.md, bundled with its `const` default
/// (SPEC_FULL §4.13). Grounded on `thaumic-core/src/state.rs`'s `Config`
/// (serde `Deserialize`/`Serialize`, all-sensible-defaults struct) and
/// `protocol_constants.rs`'s named constants-with-rationale style.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sync_interval_secs: u64,
    pub stream_port: u16,
    pub sync_port: u16,
    pub output_queue_capacity: usize,
    pub playback_delay_secs: f64,
    pub min_playback_delay_secs: f64,
    pub max_playback_delay_secs: f64,
    pub rtt_history_size: usize,
    pub time_out_secs: u64,
    pub low_jitter: f64,
    pub high_jitter: f64,
    pub low_rtt: f64,
    pub high_rtt: f64,
    /// Reinstated RTT/jitter adaptive rule (SPEC_FULL §4.14, REDESIGN
    /// FLAG), disabled by default to match "absent it, playback_delay is
    /// constant" (spec §4.5).
    pub adaptive_playback_delay: bool,
    #[serde(default)]
    pub interface: AudioInterface,
    /// Path to the optional JSON snapshot backing [`InMemoryConfigStore`].
    /// `None` keeps state in memory only.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_interval_secs: crate::constants::SYNC_INTERVAL_SECS,
            stream_port: crate::constants::STREAM_PORT,
            sync_port: crate::constants::SYNC_PORT,
            output_queue_capacity: crate::constants::OUTPUT_QUEUE_CAPACITY,
            playback_delay_secs: crate::constants::PLAYBACK_DELAY_SECS,
            min_playback_delay_secs: crate::constants::MIN_PLAYBACK_DELAY_SECS,
            max_playback_delay_secs: crate::constants::MAX_PLAYBACK_DELAY_SECS,
            rtt_history_size: crate::constants::RTT_HISTORY_SIZE,
            time_out_secs: crate::constants::TIME_OUT_SECS,
            low_jitter: crate::constants::LOW_JITTER,
            high_jitter: crate::constants::HIGH_JITTER,
            low_rtt: crate::constants::LOW_RTT,
            high_rtt: crate::constants::HIGH_RTT,
            adaptive_playback_delay: false,
            interface: AudioInterface::default(),
            snapshot_path: None,
        }
    }
}

/// Narrow, consumed-only interface the core calls (spec §6.3).
///
/// All reads are synchronous point-in-time snapshots (spec §5: "callers
/// must tolerate stale values"); mutators are total and return the new
/// record. Reads/mutators on a UUID that no longer exists fail with
/// [`AuderaError::NotFound`].
pub trait ConfigStore: Send + Sync {
    fn get_interface(&self) -> AudioInterface;
    fn update_interface(&self, iface: AudioInterface) -> AudioInterface;

    fn get_device(&self, role: DeviceRole) -> AudioDevice;
    fn update_device(&self, role: DeviceRole, device: AudioDevice) -> AudioDevice;

    /// Looks up a player by (uuid, mac_address) equality (spec I4); creates
    /// one from `initial` if no matching record exists yet.
    fn get_or_create_identity(&self, initial: Identity) -> Identity;

    fn player_get_or_create(&self, identity: &Identity) -> Player;
    fn player_play(&self, uuid: Uuid) -> AuderaResult<Player>;
    fn player_stop(&self, uuid: Uuid) -> AuderaResult<Player>;
    fn player_connect(&self, uuid: Uuid) -> AuderaResult<Player>;
    fn player_disconnect(&self, uuid: Uuid) -> AuderaResult<Player>;
    /// Players with `enabled ∧ connected` (spec §6.3 `get_all_available`).
    fn players_available(&self) -> Vec<Player>;

    fn session_update(&self, session: Session) -> Session;
    fn session_attach_group(&self, session_uuid: Uuid, group: &Group) -> AuderaResult<Session>;
    fn session_attach_players(&self, session_uuid: Uuid, players: Vec<Uuid>) -> AuderaResult<Session>;
    fn session_detach(&self, session_uuid: Uuid) -> AuderaResult<Session>;
    fn session_delete(&self, uuid: Uuid) -> AuderaResult<()>;
}

/// On-disk snapshot shape (SPEC_FULL §3.1: same field names round-trip as
/// the original's `to_dict`/`from_dict`).
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    identity: Option<Identity>,
    interface: AudioInterface,
    input_device: AudioDevice,
    output_device: AudioDevice,
    players: Vec<Player>,
    sessions: Vec<Session>,
}

/// Non-durable default [`ConfigStore`] (SPEC_FULL §6.6). Optionally backed
/// by a JSON snapshot file saved after every mutator call.
pub struct InMemoryConfigStore {
    identity: RwLock<Option<Identity>>,
    interface: RwLock<AudioInterface>,
    input_device: RwLock<AudioDevice>,
    output_device: RwLock<AudioDevice>,
    players: DashMap<Uuid, Player>,
    sessions: DashMap<Uuid, Session>,
    snapshot_path: Option<PathBuf>,
    /// Serializes all file writes, matching `ManualSpeakerConfig`'s
    /// `CONFIG_LOCK` — the in-memory maps already synchronize themselves,
    /// but concurrent writers to the same file would otherwise interleave.
    write_lock: Mutex<()>,
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self {
            identity: RwLock::new(None),
            interface: RwLock::new(AudioInterface::default()),
            input_device: RwLock::new(AudioDevice::new(String::new(), 0, DeviceRole::Input)),
            output_device: RwLock::new(AudioDevice::new(String::new(), 0, DeviceRole::Output)),
            players: DashMap::new(),
            sessions: DashMap::new(),
            snapshot_path: None,
            write_lock: Mutex::new(()),
        }
    }
}

impl InMemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (or creates) a store backed by a JSON snapshot at `path`,
    /// loading any existing state.
    #[must_use]
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut store = Self {
            snapshot_path: Some(path.clone()),
            ..Self::default()
        };
        store.load(&path);
        store
    }

    fn load(&mut self, path: &Path) {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return;
        };
        let Ok(snapshot) = serde_json::from_str::<Snapshot>(&contents) else {
            log::warn!("[Config] Snapshot at {} is unreadable; starting fresh.", path.display());
            return;
        };
        *self.identity.get_mut() = snapshot.identity;
        *self.interface.get_mut() = snapshot.interface;
        *self.input_device.get_mut() = snapshot.input_device;
        *self.output_device.get_mut() = snapshot.output_device;
        for player in snapshot.players {
            self.players.insert(player.uuid, player);
        }
        for session in snapshot.sessions {
            self.sessions.insert(session.uuid, session);
        }
    }

    fn save(&self) {
        let Some(path) = &self.snapshot_path else { return };
        let snapshot = Snapshot {
            identity: self.identity.read().clone(),
            interface: *self.interface.read(),
            input_device: self.input_device.read().clone(),
            output_device: self.output_device.read().clone(),
            players: self.players.iter().map(|r| r.value().clone()).collect(),
            sessions: self.sessions.iter().map(|r| r.value().clone()).collect(),
        };

        let _guard = self.write_lock.lock();
        let Ok(contents) = serde_json::to_string_pretty(&snapshot) else { return };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("[Config] Failed to create snapshot directory: {e}");
                return;
            }
        }
        let temp_path = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&temp_path, contents) {
            log::warn!("[Config] Failed to write snapshot: {e}");
            return;
        }
        if let Err(e) = std::fs::rename(&temp_path, path) {
            log::warn!("[Config] Failed to commit snapshot: {e}");
        }
    }

    fn device_slot(&self, role: DeviceRole) -> &RwLock<AudioDevice> {
        match role {
            DeviceRole::Input => &self.input_device,
            DeviceRole::Output => &self.output_device,
        }
    }

    fn mutate_player(&self, uuid: Uuid, f: impl FnOnce(&mut Player)) -> AuderaResult<Player> {
        let mut entry = self
            .players
            .get_mut(&uuid)
            .ok_or_else(|| AuderaError::NotFound(uuid.to_string()))?;
        f(&mut entry);
        let result = entry.clone();
        drop(entry);
        self.save();
        Ok(result)
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get_interface(&self) -> AudioInterface {
        *self.interface.read()
    }

    fn update_interface(&self, iface: AudioInterface) -> AudioInterface {
        *self.interface.write() = iface;
        self.save();
        iface
    }

    fn get_device(&self, role: DeviceRole) -> AudioDevice {
        self.device_slot(role).read().clone()
    }

    fn update_device(&self, role: DeviceRole, device: AudioDevice) -> AudioDevice {
        *self.device_slot(role).write() = device.clone();
        self.save();
        device
    }

    fn get_or_create_identity(&self, initial: Identity) -> Identity {
        let mut slot = self.identity.write();
        match slot.as_ref() {
            Some(existing) if *existing == initial => existing.clone(),
            Some(existing) => {
                // Preserve the durable name/uuid; only the IP may move (spec I4, §9).
                let refreshed = existing.refreshed(initial.address);
                *slot = Some(refreshed.clone());
                drop(slot);
                self.save();
                refreshed
            }
            None => {
                *slot = Some(initial.clone());
                drop(slot);
                self.save();
                initial
            }
        }
    }

    fn player_get_or_create(&self, identity: &Identity) -> Player {
        if let Some(existing) = self.players.get(&identity.uuid) {
            return existing.clone();
        }
        let player = Player::from_identity(identity);
        self.players.insert(player.uuid, player.clone());
        self.save();
        player
    }

    fn player_play(&self, uuid: Uuid) -> AuderaResult<Player> {
        self.mutate_player(uuid, |p| {
            p.play();
        })
    }

    fn player_stop(&self, uuid: Uuid) -> AuderaResult<Player> {
        self.mutate_player(uuid, Player::stop)
    }

    fn player_connect(&self, uuid: Uuid) -> AuderaResult<Player> {
        self.mutate_player(uuid, Player::connect)
    }

    fn player_disconnect(&self, uuid: Uuid) -> AuderaResult<Player> {
        self.mutate_player(uuid, Player::disconnect)
    }

    fn players_available(&self) -> Vec<Player> {
        self.players
            .iter()
            .filter(|r| r.is_available())
            .map(|r| r.value().clone())
            .collect()
    }

    fn session_update(&self, session: Session) -> Session {
        self.sessions.insert(session.uuid, session.clone());
        self.save();
        session
    }

    fn session_attach_group(&self, session_uuid: Uuid, group: &Group) -> AuderaResult<Session> {
        let mut entry = self
            .sessions
            .get_mut(&session_uuid)
            .ok_or_else(|| AuderaError::NotFound(session_uuid.to_string()))?;
        entry.attach_group(group);
        let result = entry.clone();
        drop(entry);
        self.save();
        Ok(result)
    }

    fn session_attach_players(&self, session_uuid: Uuid, players: Vec<Uuid>) -> AuderaResult<Session> {
        let mut entry = self
            .sessions
            .get_mut(&session_uuid)
            .ok_or_else(|| AuderaError::NotFound(session_uuid.to_string()))?;
        entry.attach_players(players);
        let result = entry.clone();
        drop(entry);
        self.save();
        Ok(result)
    }

    fn session_detach(&self, session_uuid: Uuid) -> AuderaResult<Session> {
        let mut entry = self
            .sessions
            .get_mut(&session_uuid)
            .ok_or_else(|| AuderaError::NotFound(session_uuid.to_string()))?;
        entry.detach_all();
        let result = entry.clone();
        drop(entry);
        self.save();
        Ok(result)
    }

    fn session_delete(&self, uuid: Uuid) -> AuderaResult<()> {
        self.sessions
            .remove(&uuid)
            .map(|_| ())
            .ok_or_else(|| AuderaError::NotFound(uuid.to_string()))?;
        self.save();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::session::Attachment;

    fn identity(mac: &str) -> Identity {
        Identity::new("kitchen", mac, "10.0.0.5")
    }

    #[test]
    fn config_default_matches_spec_constants() {
        let config = Config::default();
        assert_eq!(config.stream_port, crate::constants::STREAM_PORT);
        assert_eq!(config.sync_port, crate::constants::SYNC_PORT);
        assert_eq!(config.playback_delay_secs, crate::constants::PLAYBACK_DELAY_SECS);
        assert!(!config.adaptive_playback_delay);
    }

    #[test]
    fn get_or_create_identity_is_idempotent_by_uuid_mac() {
        let store = InMemoryConfigStore::new();
        let first = store.get_or_create_identity(identity("AA:BB:CC:DD:EE:FF"));
        let second = store.get_or_create_identity(Identity::new("renamed", "AA:BB:CC:DD:EE:FF", "10.0.0.9"));
        assert_eq!(first.uuid, second.uuid);
        assert_eq!(second.name, "kitchen");
        assert_eq!(second.address, "10.0.0.9");
    }

    #[test]
    fn player_disconnect_forces_not_playing_through_store() {
        let store = InMemoryConfigStore::new();
        let identity = identity("AA:BB:CC:DD:EE:FF");
        let player = store.player_get_or_create(&identity);
        store.player_connect(player.uuid).unwrap();
        store.player_play(player.uuid).unwrap();
        let disconnected = store.player_disconnect(player.uuid).unwrap();
        assert!(!disconnected.playing);
        assert!(!disconnected.connected);
    }

    #[test]
    fn players_available_filters_enabled_and_connected() {
        let store = InMemoryConfigStore::new();
        let a = store.player_get_or_create(&identity("AA:BB:CC:DD:EE:FF"));
        let b = store.player_get_or_create(&identity("11:22:33:44:55:66"));
        store.player_connect(a.uuid).unwrap();

        let available = store.players_available();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].uuid, a.uuid);
        let _ = b;
    }

    #[test]
    fn mutating_unknown_player_is_not_found() {
        let store = InMemoryConfigStore::new();
        let err = store.player_play(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AuderaError::NotFound(_)));
    }

    #[test]
    fn session_attach_group_clears_player_list() {
        let store = InMemoryConfigStore::new();
        let session = store.session_update(Session::new("living room", Uuid::new_v4()));
        store
            .session_attach_players(session.uuid, vec![Uuid::new_v4()])
            .unwrap();

        let group = Group::new("Downstairs", Uuid::new_v4());
        let updated = store.session_attach_group(session.uuid, &group).unwrap();
        assert!(matches!(updated.attachment, Attachment::Group(uuid) if uuid == group.uuid));
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = InMemoryConfigStore::open(&path);
            let player = store.player_get_or_create(&identity("AA:BB:CC:DD:EE:FF"));
            store.player_connect(player.uuid).unwrap();
        }

        let reopened = InMemoryConfigStore::open(&path);
        let available = reopened.players_available();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].mac_address, "AA:BB:CC:DD:EE:FF");
    }
}
