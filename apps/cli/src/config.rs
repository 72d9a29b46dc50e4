//! CLI configuration: YAML file plus environment overrides, converted to
//! [`audera_core::Config`].
//!
//! Grounded on `thaumic-server`'s `config.rs`: same `load` → `apply_env_overrides`
//! → `to_core_config` shape, same env-var-per-field override style.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// CLI-facing configuration, loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Human-readable node name. `None` falls back to the OS hostname.
    /// Override: `AUDERA_NAME`
    pub name: Option<String>,

    /// TCP port for the deadline-stamped audio broadcast.
    /// Override: `AUDERA_STREAM_PORT`
    pub stream_port: u16,

    /// TCP port for the pairwise wall-clock sync probe.
    /// Override: `AUDERA_SYNC_PORT`
    pub sync_port: u16,

    /// Interval in seconds between reference-clock probes.
    pub sync_interval_secs: u64,

    /// Fixed (or initial, if adaptive) playback delay headroom, in seconds.
    /// Override: `AUDERA_PLAYBACK_DELAY_SECS`
    pub playback_delay_secs: f64,

    /// Reinstates the RTT/jitter adaptive playback-delay rule (spec §9).
    pub adaptive_playback_delay: bool,

    /// IP address to advertise (player role) or bind from (streamer role).
    /// If unset, auto-detected via the local outbound route.
    /// Override: `AUDERA_ADVERTISE_IP`
    pub advertise_ip: Option<IpAddr>,

    /// Directory for the persisted JSON config snapshot. `None` keeps state
    /// in memory only for the lifetime of the process.
    /// Override: `AUDERA_DATA_DIR`
    pub data_dir: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        let core = audera_core::Config::default();
        Self {
            name: None,
            stream_port: core.stream_port,
            sync_port: core.sync_port,
            sync_interval_secs: core.sync_interval_secs,
            playback_delay_secs: core.playback_delay_secs,
            adaptive_playback_delay: core.adaptive_playback_delay,
            advertise_ip: None,
            data_dir: None,
        }
    }
}

impl CliConfig {
    /// Loads configuration from an optional YAML file, then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AUDERA_NAME") {
            self.name = Some(val);
        }
        if let Ok(val) = std::env::var("AUDERA_STREAM_PORT") {
            if let Ok(port) = val.parse() {
                self.stream_port = port;
            }
        }
        if let Ok(val) = std::env::var("AUDERA_SYNC_PORT") {
            if let Ok(port) = val.parse() {
                self.sync_port = port;
            }
        }
        if let Ok(val) = std::env::var("AUDERA_PLAYBACK_DELAY_SECS") {
            if let Ok(secs) = val.parse() {
                self.playback_delay_secs = secs;
            }
        }
        if let Ok(val) = std::env::var("AUDERA_ADVERTISE_IP") {
            if let Ok(ip) = val.parse() {
                self.advertise_ip = Some(ip);
            }
        }
        // AUDERA_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs.
    }

    /// Converts to `audera-core`'s [`audera_core::Config`].
    pub fn to_core_config(&self) -> audera_core::Config {
        audera_core::Config {
            sync_interval_secs: self.sync_interval_secs,
            stream_port: self.stream_port,
            sync_port: self.sync_port,
            playback_delay_secs: self.playback_delay_secs,
            adaptive_playback_delay: self.adaptive_playback_delay,
            snapshot_path: self.data_dir.as_ref().map(|dir| dir.join("state.json")),
            ..Default::default()
        }
    }
}
