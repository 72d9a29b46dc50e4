//! Application bootstrap and dependency wiring (spec §2 data-flow,
//! composed here into the two node roles).
//!
//! This is the composition root, grounded on `thaumic-core::bootstrap`'s
//! `bootstrap_services`: the single place where every service for a role is
//! instantiated and wired together, so the dependency graph is visible in
//! one place rather than threaded ad hoc through `main`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::clock::ReferenceClock;
use crate::config::{Config, ConfigStore, InMemoryConfigStore};
use crate::error::{AuderaError, AuderaResult};
use crate::identity::Identity;
use crate::net::Browser;
use crate::streamer::StreamerPipeline;
use crate::supervisor::ReadinessEvents;

/// Every service wired up for the streamer role.
pub struct StreamerServices {
    pub identity: Identity,
    pub config_store: Arc<dyn ConfigStore>,
    pub clock: ReferenceClock,
    pub pipeline: Arc<StreamerPipeline>,
    pub browser: Arc<Browser>,
    pub events: ReadinessEvents,
    pub cancel: CancellationToken,
}

impl StreamerServices {
    /// Initiates graceful shutdown: cancels every background task and
    /// closes the streaming session (spec §5 "cooperative... must close any
    /// writer it owns").
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning streamer shutdown...");
        self.cancel.cancel();
        self.pipeline.session().close().await;
        self.events.clear_all();
        log::info!("[Bootstrap] Streamer shutdown complete.");
    }
}

/// Every service wired up for the player role.
pub struct PlayerServices {
    pub identity: Identity,
    pub config_store: Arc<dyn ConfigStore>,
    pub clock: ReferenceClock,
    pub events: ReadinessEvents,
    pub cancel: CancellationToken,
}

impl PlayerServices {
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning player shutdown...");
        self.cancel.cancel();
        self.events.clear_all();
        log::info!("[Bootstrap] Player shutdown complete.");
    }
}

fn resolve_identity(config_store: &dyn ConfigStore, name: &str, mac_address: &str, address: &str) -> Identity {
    let initial = Identity::new(name, mac_address, address);
    config_store.get_or_create_identity(initial)
}

/// Bootstraps the streamer role's services (spec §4.7/§4.9).
///
/// Wiring order: config store → identity → reference clock → discovery
/// browser → streaming session / streamer pipeline → readiness events. The
/// caller (the `apps/cli` collaborator) is responsible for spawning the
/// supervised task set and for calling [`StreamerServices::shutdown`] on
/// signal.
pub fn bootstrap_streamer(config: &Config, name: &str, mac_address: &str, address: &str) -> AuderaResult<StreamerServices> {
    let config_store: Arc<dyn ConfigStore> = match &config.snapshot_path {
        Some(path) => Arc::new(InMemoryConfigStore::open(path)),
        None => Arc::new(InMemoryConfigStore::new()),
    };
    config_store.update_interface(config.interface);

    let identity = resolve_identity(config_store.as_ref(), name, mac_address, address);

    let clock = ReferenceClock::new(crate::clock::DEFAULT_NTP_SERVER);

    let browser = Arc::new(Browser::new().map_err(|e| {
        log::error!("[Bootstrap] Failed to start discovery browser: {e}");
        e
    })?);

    let pipeline = Arc::new(StreamerPipeline::new(
        Arc::clone(&config_store),
        clock.clone(),
        config.playback_delay_secs,
    ));

    let cancel = CancellationToken::new();
    let events = ReadinessEvents::new();

    Ok(StreamerServices {
        identity,
        config_store,
        clock,
        pipeline,
        browser,
        events,
        cancel,
    })
}

/// Bootstraps the player role's services (spec §4.8/§4.9).
pub fn bootstrap_player(config: &Config, name: &str, mac_address: &str, address: &str) -> AuderaResult<PlayerServices> {
    let config_store: Arc<dyn ConfigStore> = match &config.snapshot_path {
        Some(path) => Arc::new(InMemoryConfigStore::open(path)),
        None => Arc::new(InMemoryConfigStore::new()),
    };
    config_store.update_interface(config.interface);

    let identity = resolve_identity(config_store.as_ref(), name, mac_address, address);
    let clock = ReferenceClock::new(crate::clock::DEFAULT_NTP_SERVER);

    let cancel = CancellationToken::new();
    let events = ReadinessEvents::new();

    Ok(PlayerServices {
        identity,
        config_store,
        clock,
        events,
        cancel,
    })
}

/// Maps a CLI role string to a bootstrap call, matching the "unknown role"
/// exit-code 22 (EINVAL) behavior of spec §6.5. `apps/cli` is expected to
/// parse the role with `clap` first, so this mainly serves direct callers
/// of the library (tests, embedders) who bypass the CLI.
pub fn validate_role(role: &str) -> AuderaResult<()> {
    match role {
        "streamer" | "player" => Ok(()),
        other => Err(AuderaError::NotFound(format!("unknown role: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_role_accepts_known_roles() {
        assert!(validate_role("streamer").is_ok());
        assert!(validate_role("player").is_ok());
    }

    #[test]
    fn validate_role_rejects_unknown() {
        assert!(validate_role("amplifier").is_err());
    }

    #[tokio::test]
    async fn bootstrap_player_resolves_identity_and_interface() {
        let config = Config::default();
        let services = bootstrap_player(&config, "kitchen", "AA:BB:CC:DD:EE:FF", "10.0.0.5").unwrap();
        assert_eq!(services.identity.name, "kitchen");
        assert_eq!(services.config_store.get_interface(), config.interface);
    }
}
