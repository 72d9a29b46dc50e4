//! Playback pipeline (spec §4.8 "Playback pipeline (C8)"): the sync
//! acceptor and stream acceptor. The render callback itself lives in
//! [`crate::audio::output`] — it runs on the dedicated audio thread, not
//! the cooperative loop this module drives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::audio::queue::QueueProducer;
use crate::audio::OutputEndpoint;
use crate::error::{AuderaError, AuderaResult};
use crate::frame::{FrameError, FrameReader};
use crate::net::sync::run_sync_acceptor;

/// Runs the stream acceptor (spec §4.8b): gated on `sync_ready`, accepts
/// one streamer connection at a time, reads delimited frames, and pushes
/// them onto the bounded output queue. Setting `buffer_ready` after the
/// first successful push.
///
/// A length-mismatched frame (spec §8 scenario 3) is dropped and logged
/// without tearing down the connection; a missing delimiter or a closed
/// connection ends this streamer's turn and the acceptor waits for the
/// next one.
pub async fn run_stream_acceptor(
    listener: TcpListener,
    mut producer: QueueProducer,
    buffer_ready: Arc<AtomicBool>,
    mut sync_ready: watch::Receiver<bool>,
    cancel: CancellationToken,
) -> AuderaResult<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = sync_ready.wait_for(|ready| *ready) => {
                if result.is_err() {
                    return Ok(());
                }
            }
        }

        let (stream, addr) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted.map_err(AuderaError::Io)?,
        };
        if let Err(e) = socket2::SockRef::from(&stream).set_nodelay(true) {
            log::warn!("[Player] Failed to set TCP_NODELAY on stream accept: {e}");
        }
        log::info!("[Player] Accepted stream connection from {addr}");

        let mut reader = FrameReader::new(stream);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                frame = reader.read_frame() => {
                    match frame {
                        Ok(Ok(decoded)) => {
                            if producer.try_push(decoded).is_ok() {
                                buffer_ready.store(true, Ordering::Relaxed);
                            }
                            // Queue full: dropped silently (spec §9 SPSC
                            // policy — congestion drops audio, never blocks).
                        }
                        Ok(Err(FrameError::LengthMismatch { declared, observed })) => {
                            log::warn!(
                                "[Audio] Incomplete packet: header declared {declared} bytes, observed {observed} bytes; dropping."
                            );
                        }
                        Ok(Err(FrameError::BoundedReadExceeded(max))) => {
                            log::warn!("[Player] No frame delimiter found within {max} bytes; closing connection.");
                            break;
                        }
                        Ok(Err(FrameError::ConnectionClosed)) => {
                            log::info!("[Player] Streamer connection closed.");
                            break;
                        }
                        Err(e) => {
                            log::warn!("[Player] Stream connection error: {e}");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Composes the sync acceptor and stream acceptor, plus wiring the
/// resulting streamer offset into the render callback's shared state
/// (spec §4.8: "on each player... the sync-ready event gates the stream
/// acceptor").
pub struct PlaybackPipeline {
    output: OutputEndpoint,
    sync_ready_tx: watch::Sender<bool>,
    sync_ready_rx: watch::Receiver<bool>,
    buffer_ready: Arc<AtomicBool>,
}

impl PlaybackPipeline {
    #[must_use]
    pub fn new(output: OutputEndpoint) -> Self {
        let (sync_ready_tx, sync_ready_rx) = watch::channel(false);
        Self {
            output,
            sync_ready_tx,
            sync_ready_rx,
            buffer_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn buffer_ready(&self) -> bool {
        self.buffer_ready.load(Ordering::Relaxed)
    }

    /// Runs the sync acceptor and stream acceptor concurrently until
    /// `cancel` fires or either returns (spec §4.9: a composite task at the
    /// player). Every newly-measured streamer offset (spec §4.5) is pushed
    /// straight into the render callback's shared state via
    /// [`OutputEndpoint::set_streamer_offset`].
    pub async fn run(
        self,
        sync_listener: TcpListener,
        stream_listener: TcpListener,
        producer: QueueProducer,
        player_clock_offset: impl Fn() -> f64 + Send + Sync + 'static,
        cancel: CancellationToken,
    ) -> AuderaResult<()> {
        let PlaybackPipeline {
            output,
            sync_ready_tx,
            sync_ready_rx,
            buffer_ready,
        } = self;

        let offset_sink = Arc::new(output);
        let on_offset = {
            let offset_sink = Arc::clone(&offset_sink);
            move |offset: f64| offset_sink.set_streamer_offset(offset)
        };

        let sync_fut = run_sync_acceptor(sync_listener, player_clock_offset, on_offset, sync_ready_tx, cancel.clone());
        let stream_fut = run_stream_acceptor(stream_listener, producer, buffer_ready, sync_ready_rx, cancel.clone());

        let (sync_result, stream_result) = tokio::join!(sync_fut, stream_fut);
        sync_result?;
        stream_result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue;
    use crate::frame;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    async fn loopback() -> (TcpListener, std::net::SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    // Spec §8 scenario 3: a header/payload length mismatch is dropped and
    // logged, queue depth unchanged, connection stays open for more frames.
    #[tokio::test]
    async fn incomplete_packet_is_dropped_and_connection_stays_open() {
        let (listener, addr) = loopback().await;
        let (producer, mut consumer) = queue::bounded(4);
        let buffer_ready = Arc::new(AtomicBool::new(false));
        let (_tx, rx) = watch::channel(true);
        let cancel = CancellationToken::new();

        let acceptor = tokio::spawn(run_stream_acceptor(listener, producer, Arc::clone(&buffer_ready), rx, cancel.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();

        use bytes::{BufMut, BytesMut};
        let mut bad = BytesMut::new();
        bad.put_u32(4096);
        bad.put_f64_le(100.0);
        bad.extend_from_slice(&vec![0xAB; 3000]);
        bad.extend_from_slice(crate::constants::FRAME_DELIMITER);
        client.write_all(&bad).await.unwrap();

        let good = frame::encode(200.0, &[1, 2, 3, 4]);
        client.write_all(&good).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let decoded = consumer.try_pop();
        assert_eq!(decoded.map(|f| f.payload.to_vec()), Some(vec![1, 2, 3, 4]));
        assert!(buffer_ready.load(Ordering::Relaxed));

        cancel.cancel();
        drop(client);
        let _ = acceptor.await;
    }
}
