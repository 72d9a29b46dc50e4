//! Networking: discovery (C4) and the peer-sync probe (C5).

pub mod discovery;
pub mod sync;

pub use discovery::{Advertiser, Browser, DiscoveryEvent};
pub use sync::{adapt_playback_delay, probe_peer, run_sync_acceptor, serve_one_probe, RttHistory};
