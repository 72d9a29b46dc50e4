//! Streamer pipeline state machine (spec §4.7 "Streamer pipeline (C7)").
//!
//! Idle → Syncing → Streaming → Drain, looping for the lifetime of the
//! node. Owns the input endpoint, the streaming session, and the
//! discovery-fed set of currently visible players.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::InputEndpoint;
use crate::clock::ReferenceClock;
use crate::config::ConfigStore;
use crate::constants::{SYNC_PORT, TIME_OUT_SECS};
use crate::error::AuderaResult;
use crate::frame;
use crate::model::audio::AudioInterface;
use crate::model::player::Player;
use crate::net::{probe_peer, DiscoveryEvent};
use crate::session::StreamingSession;

/// Current phase of the streamer state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Syncing,
    Streaming,
    Drain,
}

fn now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Per-player pairwise offset, kept by the streamer so it knows how to
/// interpret each player's [`crate::net::sync`] round (spec §4.5).
#[derive(Debug, Clone, Copy, Default)]
struct PeerState {
    offset: f64,
}

/// Drives the streamer state machine for the lifetime of the process.
pub struct StreamerPipeline {
    config: Arc<dyn ConfigStore>,
    clock: ReferenceClock,
    session: Arc<StreamingSession>,
    peers: DashMap<Uuid, PeerState>,
    playback_delay: std::sync::atomic::AtomicU64, // bit-pattern of an f64, see crate::util::AtomicF64
}

impl StreamerPipeline {
    #[must_use]
    pub fn new(config: Arc<dyn ConfigStore>, clock: ReferenceClock, playback_delay_secs: f64) -> Self {
        Self {
            session: Arc::new(StreamingSession::new(Arc::clone(&config))),
            config,
            clock,
            peers: DashMap::new(),
            playback_delay: std::sync::atomic::AtomicU64::new(playback_delay_secs.to_bits()),
        }
    }

    #[must_use]
    pub fn session(&self) -> Arc<StreamingSession> {
        Arc::clone(&self.session)
    }

    fn playback_delay(&self) -> f64 {
        f64::from_bits(self.playback_delay.load(std::sync::atomic::Ordering::Relaxed))
    }

    pub fn set_playback_delay(&self, value: f64) {
        self.playback_delay.store(value.to_bits(), std::sync::atomic::Ordering::Relaxed);
    }

    /// Runs one pairwise sync round against every given player address
    /// (spec §4.7 "Syncing"), concurrently, storing each resulting offset.
    /// Failures are logged and that player is simply not attached this
    /// round — discovery will offer it again.
    pub async fn sync_round(&self, players: &[Player]) {
        let clock_offset = self.clock.offset();
        let attempts = players.iter().map(|player| {
            let addr = format!("{}:{}", player.address, SYNC_PORT);
            let uuid = player.uuid;
            async move {
                match probe_peer(&addr, clock_offset).await {
                    Ok((offset, _rtt)) => Some((uuid, offset)),
                    Err(e) => {
                        log::warn!("[Streamer] Sync probe to player {uuid} ({addr}) failed: {e}");
                        None
                    }
                }
            }
        });

        for result in futures::future::join_all(attempts).await {
            if let Some((uuid, offset)) = result {
                self.peers.insert(uuid, PeerState { offset });
            }
        }
    }

    /// Captures one chunk from `input`, stamps it with a deadline, and fans
    /// it out to every attached sink (spec §4.7 "Streaming").
    pub async fn stream_one_chunk(&self, chunk: &[u8]) -> Vec<Uuid> {
        let deadline = now() + self.clock.offset() + self.playback_delay();
        let wire = frame::encode(deadline, chunk);
        self.session.fan_out(&wire).await
    }

    /// Attaches a newly-discovered or reappearing player: opens the sync
    /// connection's sibling stream socket, attaches its sink, and marks it
    /// connected in the config collaborator.
    pub async fn attach_player(&self, player: &Player, stream_sink: TcpStream) -> AuderaResult<()> {
        let (_read, write) = stream_sink.into_split();
        self.session.attach(player.clone(), write);
        let _ = self.config.player_connect(player.uuid);
        let _ = self.config.player_play(player.uuid);
        Ok(())
    }

    pub async fn detach_player(&self, uuid: Uuid) {
        self.session.detach(uuid).await;
        self.peers.remove(&uuid);
    }
}

/// Runs the C7 state machine loop until `cancel` fires.
///
/// `discovery_events` feeds Idle→Syncing transitions and re-sync on
/// reappearance (spec §8 scenario 5); `current_interface`/`current_device`
/// are polled every iteration — a change from the previous iteration
/// triggers the Drain phase (spec §4.7 "Input changes are detected by
/// polling...").
///
/// `chunks` is the capture channel fed by `input` (kept alive here only to
/// hold the capture device open; its stream thread publishes into `chunks`
/// on its own, see [`crate::audio::input`]). Chunks are only drained from
/// `chunks` while `Phase::Streaming` is active — during `Phase::Drain` the
/// channel is left unpolled, so `try_send` on the capture thread silently
/// drops chunks instead of the streamer fanning out audio through a drain
/// window (spec §4.7 "Drain", §8 scenario 4, §11.4).
pub async fn run(
    pipeline: Arc<StreamerPipeline>,
    input: Option<InputEndpoint>,
    mut chunks: mpsc::Receiver<Bytes>,
    mut discovery_events: mpsc::Receiver<DiscoveryEvent>,
    open_stream_sink: impl Fn(Player) -> tokio::task::JoinHandle<AuderaResult<(Player, TcpStream)>> + Send + Sync + 'static,
    cancel: CancellationToken,
) {
    let _input = input;
    let mut phase = Phase::Idle;
    let mut last_interface: Option<AudioInterface> = None;
    let mut newly_attached_since_last_iteration = false;

    loop {
        if cancel.is_cancelled() {
            pipeline.session.close().await;
            return;
        }

        match phase {
            Phase::Idle => {
                tokio::select! {
                    _ = cancel.cancelled() => { pipeline.session.close().await; return; }
                    event = discovery_events.recv() => {
                        match event {
                            Some(DiscoveryEvent::PlayerSeen(player)) => {
                                if let Ok(Ok((player, stream))) = open_stream_sink(player).await {
                                    let _ = pipeline.attach_player(&player, stream).await;
                                    newly_attached_since_last_iteration = true;
                                }
                                phase = Phase::Syncing;
                            }
                            Some(DiscoveryEvent::PlayerGone(uuid)) => {
                                pipeline.detach_player(uuid).await;
                            }
                            None => return,
                        }
                    }
                }
            }
            Phase::Syncing => {
                let players = pipeline.session.players();
                pipeline.sync_round(&players).await;
                phase = Phase::Streaming;
            }
            Phase::Streaming => {
                let current_interface = pipeline.config.get_interface();
                let interface_changed = last_interface.is_some_and(|prev| prev != current_interface);
                last_interface = Some(current_interface);

                if interface_changed {
                    log::info!("[Streamer] Restarting the audio stream: interface changed to {current_interface:?}");
                }

                if newly_attached_since_last_iteration || interface_changed {
                    newly_attached_since_last_iteration = false;
                    phase = Phase::Drain;
                    continue;
                }

                if pipeline.session.is_empty() {
                    phase = Phase::Idle;
                    continue;
                }

                // Captured chunks are only drained here, while Streaming is
                // active; Drain (below) leaves `chunks` unpolled so capture
                // genuinely stalls instead of fanning audio through the
                // drain window.
                tokio::select! {
                    _ = cancel.cancelled() => { pipeline.session.close().await; return; }
                    event = discovery_events.recv() => {
                        match event {
                            Some(DiscoveryEvent::PlayerSeen(player)) => {
                                if let Ok(Ok((player, stream))) = open_stream_sink(player).await {
                                    let _ = pipeline.attach_player(&player, stream).await;
                                    newly_attached_since_last_iteration = true;
                                }
                            }
                            Some(DiscoveryEvent::PlayerGone(uuid)) => {
                                pipeline.detach_player(uuid).await;
                            }
                            None => return,
                        }
                    }
                    chunk = chunks.recv() => {
                        if let Some(chunk) = chunk {
                            let _ = pipeline.stream_one_chunk(&chunk).await;
                        }
                    }
                    () = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
                }
            }
            Phase::Drain => {
                tokio::select! {
                    _ = cancel.cancelled() => { pipeline.session.close().await; return; }
                    () = tokio::time::sleep(std::time::Duration::from_secs(TIME_OUT_SECS)) => {}
                }
                phase = Phase::Syncing;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InMemoryConfigStore;
    use crate::identity::Identity;

    fn make_pipeline() -> StreamerPipeline {
        let config = Arc::new(InMemoryConfigStore::new()) as Arc<dyn ConfigStore>;
        let clock = ReferenceClock::new("127.0.0.1:1");
        StreamerPipeline::new(config, clock, 2.0)
    }

    #[test]
    fn playback_delay_round_trips() {
        let pipeline = make_pipeline();
        assert_eq!(pipeline.playback_delay(), 2.0);
        pipeline.set_playback_delay(3.5);
        assert_eq!(pipeline.playback_delay(), 3.5);
    }

    #[tokio::test]
    async fn stream_one_chunk_stamps_a_deadline_and_fans_out_to_nobody() {
        let pipeline = make_pipeline();
        let failed = pipeline.stream_one_chunk(&[0u8; 16]).await;
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn detach_player_removes_from_session_and_peers() {
        let pipeline = make_pipeline();
        let player = Player::from_identity(&Identity::new("kitchen", "AA:BB:CC:DD:EE:FF", "10.0.0.5"));
        pipeline.peers.insert(player.uuid, PeerState::default());
        pipeline.detach_player(player.uuid).await;
        assert!(!pipeline.peers.contains_key(&player.uuid));
    }
}
