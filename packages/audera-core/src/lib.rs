//! Audera core: multi-room synchronized audio streaming.
//!
//! This crate implements every collaborator from spec §4 (C1–C10) as a
//! narrow, independently testable module, and composes them in
//! [`bootstrap`] for the two node roles (`streamer`, `player`). `apps/cli`
//! is a thin shell around this crate: argument parsing, logging
//! initialization, and signal handling only — every behavior lives here so
//! a future embedding host can reuse it directly (mirrors the
//! `thaumic-core` / `apps/server` split this crate is grounded on).

pub mod audio;
pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod frame;
pub mod identity;
pub mod model;
pub mod net;
pub mod player;
pub mod session;
pub mod streamer;
pub mod supervisor;
pub mod util;

pub use bootstrap::{bootstrap_player, bootstrap_streamer, validate_role, PlayerServices, StreamerServices};
pub use config::{Config, ConfigStore, InMemoryConfigStore};
pub use error::{AuderaError, AuderaResult};
pub use identity::Identity;
pub use session::StreamingSession;
pub use streamer::StreamerPipeline;
pub use supervisor::{run_supervised, ReadinessEvents};
