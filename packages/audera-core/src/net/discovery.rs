//! Discovery service (spec §4.4 "Discovery service (C4)", §6.4 "Discovery").
//!
//! Players advertise themselves over mDNS/DNS-SD; the streamer browses for
//! them. The browser is the only source of truth for "who exists" (persisted
//! Player records are a cache, not authoritative) — so this module exposes
//! an in-memory visible-players map plus attach/detach events, not a query
//! against the config collaborator.
//!
//! Grounded on the teacher's [`mdns_advertise.rs`] (service registration,
//! lifecycle, shutdown idempotence) and [`sonos/discovery/mdns.rs`] (browse
//! loop, resolved-service parsing, `stop_browse` on completion).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use mdns_sd::{ResolvedService, ServiceDaemon, ServiceEvent};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::constants::{INSTANCE_PREFIX, SERVICE_TYPE};
use crate::error::{AuderaError, AuderaResult};
use crate::model::Player;

/// One attach/detach notification emitted by the browser side (streamer).
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    PlayerSeen(Player),
    PlayerGone(Uuid),
}

/// Advertises this node's [`Player`] record over mDNS. Re-registering with
/// updated fields is done by dropping and recreating the advertiser — the
/// `mdns-sd` daemon has no in-place TXT-record update, mirroring the
/// teacher's one-shot `ServiceInfo::new` + `register` + unregister-on-drop
/// pattern.
pub struct Advertiser {
    daemon: ServiceDaemon,
    service_fullname: String,
    shutdown_called: AtomicBool,
}

impl Advertiser {
    /// Registers (or re-registers, by constructing a fresh instance) this
    /// player's record at `advertise_ip:port` (spec §6.4: port = the stream
    /// port). TXT record carries every Player field as a string (spec §4.4:
    /// "announced record carries the full Player record as properties").
    pub fn register(player: &Player, advertise_ip: IpAddr, port: u16) -> AuderaResult<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| AuderaError::ClockUnreachable(format!("mdns daemon init: {e}")))?;

        let instance_name = format!("{}@{}", INSTANCE_PREFIX, player.mac_address.replace(':', ""));
        let txt = player_to_txt(player);

        let service = mdns_sd::ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &format!("{}.local.", instance_name),
            advertise_ip,
            port,
            Some(txt),
        )
        .map_err(|e| AuderaError::ClockUnreachable(format!("mdns service build: {e}")))?;

        let fullname = service.get_fullname().to_string();
        daemon
            .register(service)
            .map_err(|e| AuderaError::ClockUnreachable(format!("mdns register: {e}")))?;

        log::info!(
            "[Discovery] Advertising '{}' at {}:{}",
            instance_name,
            advertise_ip,
            port
        );

        Ok(Self {
            daemon,
            service_fullname: fullname,
            shutdown_called: AtomicBool::new(false),
        })
    }

    /// Unregisters the service. Idempotent: a second call is a no-op.
    pub fn shutdown(&self) {
        if self.shutdown_called.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.daemon.unregister(&self.service_fullname) {
            log::warn!("[Discovery] Failed to unregister service: {}", e);
        }
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn player_to_txt(player: &Player) -> HashMap<String, String> {
    let mut txt = HashMap::new();
    txt.insert("name".to_string(), player.name.clone());
    txt.insert("uuid".to_string(), player.uuid.to_string());
    txt.insert("mac_address".to_string(), player.mac_address.clone());
    txt.insert("address".to_string(), player.address.clone());
    txt.insert("provider".to_string(), player.provider.clone());
    txt.insert("volume".to_string(), player.volume.to_string());
    txt.insert("channels".to_string(), player.channels.to_string());
    txt.insert("enabled".to_string(), player.enabled.to_string());
    txt.insert("connected".to_string(), player.connected.to_string());
    txt.insert("playing".to_string(), player.playing.to_string());
    txt
}

fn txt_get<'a>(txt: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    txt.get(key).map(String::as_str)
}

fn parse_player_txt(txt: &HashMap<String, String>) -> Option<Player> {
    Some(Player {
        name: txt_get(txt, "name")?.to_string(),
        uuid: txt_get(txt, "uuid")?.parse().ok()?,
        mac_address: txt_get(txt, "mac_address")?.to_string(),
        address: txt_get(txt, "address")?.to_string(),
        provider: txt_get(txt, "provider").unwrap_or("audera").to_string(),
        volume: txt_get(txt, "volume").and_then(|v| v.parse().ok()).unwrap_or(50),
        channels: txt_get(txt, "channels").and_then(|v| v.parse().ok()).unwrap_or(2),
        enabled: txt_get(txt, "enabled").map(|v| v == "true").unwrap_or(true),
        connected: txt_get(txt, "connected").map(|v| v == "true").unwrap_or(false),
        playing: txt_get(txt, "playing").map(|v| v == "true").unwrap_or(false),
    })
}

/// Browses for players on the LAN and maintains an in-memory visible-players
/// map, emitting [`DiscoveryEvent`]s on every addition or removal.
pub struct Browser {
    daemon: ServiceDaemon,
    visible: DashMap<Uuid, Player>,
}

impl Browser {
    pub fn new() -> AuderaResult<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| AuderaError::ClockUnreachable(format!("mdns daemon init: {e}")))?;
        Ok(Self {
            daemon,
            visible: DashMap::new(),
        })
    }

    /// Returns a snapshot of currently-visible players.
    #[must_use]
    pub fn visible_players(&self) -> Vec<Player> {
        self.visible.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Runs the browse loop until `cancel` fires, forwarding events on
    /// `events`. Each resolved service updates (or inserts) the visible map
    /// and forwards `PlayerSeen`; a `ServiceRemoved` clears the entry and
    /// forwards `PlayerGone` (spec §4.4: "additions and removals trigger
    /// session attach/detach").
    pub async fn run(
        &self,
        events: mpsc::Sender<DiscoveryEvent>,
        cancel: tokio_util::sync::CancellationToken,
    ) -> AuderaResult<()> {
        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| AuderaError::ClockUnreachable(format!("mdns browse: {e}")))?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = receiver.recv_async() => {
                    match event {
                        Ok(ServiceEvent::ServiceResolved(info)) => {
                            if let Some(player) = parse_resolved(&info) {
                                let uuid = player.uuid;
                                self.visible.insert(uuid, player.clone());
                                let _ = events.send(DiscoveryEvent::PlayerSeen(player)).await;
                            }
                        }
                        Ok(ServiceEvent::ServiceRemoved(_, fullname)) => {
                            if let Some(uuid) = uuid_for_fullname(&self.visible, &fullname) {
                                self.visible.remove(&uuid);
                                let _ = events.send(DiscoveryEvent::PlayerGone(uuid)).await;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            log::debug!("[Discovery] Browse channel closed: {:?}", e);
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.daemon.stop_browse(SERVICE_TYPE) {
            log::warn!("[Discovery] Failed to stop browse: {:?}", e);
        }
        Ok(())
    }
}

fn uuid_for_fullname(visible: &DashMap<Uuid, Player>, fullname: &str) -> Option<Uuid> {
    visible
        .iter()
        .find(|entry| fullname.contains(&entry.value().mac_address.replace(':', "")))
        .map(|entry| *entry.key())
}

fn parse_resolved(info: &ResolvedService) -> Option<Player> {
    let txt: HashMap<String, String> = info
        .txt_properties
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();
    parse_player_txt(&txt)
}

/// Resolves the local outbound IP and MAC used to build this node's
/// [`crate::identity::Identity`] and advertised address, with a short probe
/// timeout (spec has no retry policy here; this is infrastructure, not a
/// probe kind from §7).
pub async fn local_address() -> AuderaResult<IpAddr> {
    local_ip_address::local_ip()
        .map_err(|e| AuderaError::ClockUnreachable(format!("local ip lookup: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_player() -> Player {
        let identity = crate::identity::Identity::new("kitchen", "AA:BB:CC:DD:EE:FF", "10.0.0.5");
        Player::from_identity(&identity)
    }

    #[test]
    fn txt_round_trips_player_fields() {
        let player = sample_player();
        let txt = player_to_txt(&player);
        let parsed = parse_player_txt(&txt).unwrap();
        assert_eq!(parsed, player);
    }

    #[test]
    fn txt_missing_required_field_is_none() {
        let mut txt = player_to_txt(&sample_player());
        txt.remove("uuid");
        assert!(parse_player_txt(&txt).is_none());
    }
}
