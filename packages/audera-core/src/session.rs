//! Streaming session: the streamer-side in-memory sink routing map (spec
//! §3 "Session routing map", §4.6 "Streaming session (C6)").
//!
//! This is distinct from the *persisted* [`crate::model::session::Session`]
//! routing decision — that is what the config collaborator stores; this is
//! the runtime map of player UUID → live TCP write-half the streamer
//! pipeline (C7) actually writes frames to.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::ConfigStore;
use crate::model::player::Player;

struct Sink {
    writer: Mutex<OwnedWriteHalf>,
    player: Player,
}

/// Tracks attached players and their sinks (spec §4.6).
///
/// Invariant I3: a player is only ever present here while its sink is
/// healthy. A write failure on any sink removes that entry before the next
/// fan-out iteration — never any other player's.
pub struct StreamingSession {
    sinks: DashMap<Uuid, Arc<Sink>>,
    config: Arc<dyn ConfigStore>,
}

impl StreamingSession {
    #[must_use]
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        Self {
            sinks: DashMap::new(),
            config,
        }
    }

    /// Attaches `player`'s sink. Idempotent (R2): attaching an already
    /// attached player replaces its sink (the new connection wins) but the
    /// map still holds exactly one entry for that UUID.
    pub fn attach(&self, player: Player, writer: OwnedWriteHalf) {
        self.sinks.insert(
            player.uuid,
            Arc::new(Sink {
                writer: Mutex::new(writer),
                player,
            }),
        );
    }

    /// Detaches a player. Idempotent (R2): detaching an absent player is a
    /// no-op.
    pub async fn detach(&self, player_uuid: Uuid) {
        if let Some((_, sink)) = self.sinks.remove(&player_uuid) {
            let mut writer = sink.writer.lock().await;
            let _ = writer.shutdown().await;
            let _ = self.config.player_stop(player_uuid);
        }
    }

    #[must_use]
    pub fn is_attached(&self, player_uuid: Uuid) -> bool {
        self.sinks.contains_key(&player_uuid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Read-only snapshot of currently attached (player, uuid) pairs, for
    /// callers that need to enumerate without holding a write path open.
    #[must_use]
    pub fn players(&self) -> Vec<Player> {
        self.sinks.iter().map(|r| r.value().player.clone()).collect()
    }

    /// Writes `frame` to every current sink concurrently (spec §9
    /// "Cooperative fan-out with many writers" — never a sequential loop).
    /// Sinks whose write fails are detached; returns the UUIDs detached
    /// this round.
    pub async fn fan_out(&self, frame: &[u8]) -> Vec<Uuid> {
        let targets: Vec<(Uuid, Arc<Sink>)> = self
            .sinks
            .iter()
            .map(|r| (*r.key(), r.value().clone()))
            .collect();

        let writes = targets.into_iter().map(|(uuid, sink)| {
            let frame = frame.to_vec();
            async move {
                let mut writer = sink.writer.lock().await;
                match writer.write_all(&frame).await.and(writer.flush().await) {
                    Ok(()) => None,
                    Err(e) => {
                        log::warn!("[Session] Sink for player {uuid} failed: {e}; detaching.");
                        Some(uuid)
                    }
                }
            }
        });

        let results = futures::future::join_all(writes).await;
        let failed: Vec<Uuid> = results.into_iter().flatten().collect();
        for uuid in &failed {
            self.detach(*uuid).await;
        }
        failed
    }

    /// Closes every sink and clears the config collaborator's `playing`
    /// flag for each (spec §4.6 `close()`). Idempotent.
    pub async fn close(&self) {
        let uuids: Vec<Uuid> = self.sinks.iter().map(|r| *r.key()).collect();
        for uuid in uuids {
            self.detach(uuid).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InMemoryConfigStore;
    use crate::identity::Identity;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (accept_result, connect_result) = tokio::join!(listener.accept(), connect);
        (accept_result.unwrap().0, connect_result.unwrap())
    }

    fn player(mac: &str) -> Player {
        Player::from_identity(&Identity::new("kitchen", mac, "10.0.0.5"))
    }

    // R2: attach is idempotent; at most one sink per player UUID.
    #[tokio::test]
    async fn attach_twice_leaves_one_sink() {
        let config = Arc::new(InMemoryConfigStore::new()) as Arc<dyn ConfigStore>;
        let session = StreamingSession::new(config);
        let p = player("AA:BB:CC:DD:EE:FF");

        let (server_a, _client_a) = loopback_pair().await;
        session.attach(p.clone(), server_a.into_split().1);
        assert_eq!(session.len(), 1);

        let (server_b, _client_b) = loopback_pair().await;
        session.attach(p.clone(), server_b.into_split().1);
        assert_eq!(session.len(), 1);
    }

    // R2: detach is idempotent after the first.
    #[tokio::test]
    async fn detach_twice_is_a_noop_after_first() {
        let config = Arc::new(InMemoryConfigStore::new()) as Arc<dyn ConfigStore>;
        let session = StreamingSession::new(config);
        let p = player("AA:BB:CC:DD:EE:FF");

        let (server, _client) = loopback_pair().await;
        session.attach(p.clone(), server.into_split().1);

        session.detach(p.uuid).await;
        assert!(!session.is_attached(p.uuid));
        session.detach(p.uuid).await;
        assert!(!session.is_attached(p.uuid));
    }

    // I3: a write failure on one sink detaches only that player.
    #[tokio::test]
    async fn fan_out_detaches_only_the_failing_sink() {
        let config = Arc::new(InMemoryConfigStore::new()) as Arc<dyn ConfigStore>;
        let session = StreamingSession::new(config);

        let healthy = player("AA:BB:CC:DD:EE:FF");
        let (healthy_server, healthy_client) = loopback_pair().await;
        session.attach(healthy.clone(), healthy_server.into_split().1);

        let failing = player("11:22:33:44:55:66");
        let (failing_server, failing_client) = loopback_pair().await;
        drop(failing_client); // force the peer closed before the write
        session.attach(failing.clone(), failing_server.into_split().1);

        // Give the OS a beat to observe the peer close, then write twice so
        // the reset surfaces on the write rather than silently buffering.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let _ = session.fan_out(b"hello").await;
        let failed = session.fan_out(b"hello").await;

        assert!(failed.contains(&failing.uuid) || !session.is_attached(failing.uuid));
        assert!(session.is_attached(healthy.uuid));
        drop(healthy_client);
    }

    #[tokio::test]
    async fn close_detaches_every_player() {
        let config = Arc::new(InMemoryConfigStore::new()) as Arc<dyn ConfigStore>;
        let session = StreamingSession::new(config);
        let p = player("AA:BB:CC:DD:EE:FF");
        let (server, _client) = loopback_pair().await;
        session.attach(p.clone(), server.into_split().1);

        session.close().await;
        assert!(session.is_empty());
    }
}
