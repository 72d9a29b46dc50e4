//! Reference-clock probe (spec §4.1 "Reference-clock probe (C1)").
//!
//! Periodically queries an external NTP time source and stores the offset
//! `external_now - local_now`. Failure is logged and retried at the same
//! interval; this probe never crashes the pipeline (spec §7 kind 2). The
//! wire protocol is a minimal hand-rolled NTPv3 client/server exchange over
//! UDP — the same "build the raw protocol message by hand over a socket"
//! idiom `sonos/discovery/ssdp.rs` uses for SSDP M-SEARCH, applied here to
//! NTP instead of a dependency such as `ntplib` (the original's Python
//! dependency), since nothing in the corpus pulls in an NTP crate.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::constants::{SYNC_INTERVAL_SECS, TIME_OUT_SECS};
use crate::error::AuderaError;
use crate::util::AtomicF64;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
const NTP_UNIX_EPOCH_DELTA: u64 = 2_208_988_800;

/// Default reference time source, matching the player side of the original
/// implementation (`audera.ntp.Synchronizer(server='pool.ntp.org')`).
pub const DEFAULT_NTP_SERVER: &str = "pool.ntp.org:123";

fn now_secs_since_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Shared, atomically-updated reference-clock offset.
///
/// Offset updates are monotone in *wall time* but not in *value* (spec
/// §4.1): consumers must read the latest value per frame rather than cache
/// it, which is why this stores the offset as bits in an `AtomicU64` behind
/// a cheap [`ReferenceClock::offset`] accessor instead of a lock.
#[derive(Clone)]
pub struct ReferenceClock {
    offset: Arc<AtomicF64>,
    server: String,
}

impl ReferenceClock {
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            offset: Arc::new(AtomicF64::new(0.0)),
            server: server.into(),
        }
    }

    /// Returns the latest known offset (seconds); 0.0 until the first
    /// successful probe completes.
    #[must_use]
    pub fn offset(&self) -> f64 {
        self.offset.load()
    }

    fn set_offset(&self, value: f64) {
        self.offset.store(value);
    }

    /// Performs one NTP exchange and returns the measured offset, without
    /// touching the stored value. Split out for testability.
    pub async fn probe_once(&self) -> Result<f64, AuderaError> {
        query_offset(&self.server).await
    }

    /// Runs the periodic probe loop until `cancel` fires. Logs and retries
    /// on failure at the same `interval` rather than propagating the error
    /// (spec §4.1, §7 kind 2, §8 scenario 6).
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("[Clock] Reference clock probe cancelled.");
                    return;
                }
                result = self.probe_once() => {
                    match result {
                        Ok(offset) => {
                            self.set_offset(offset);
                            log::info!("[Clock] ntp_offset updated to {:.7} sec.", offset);
                        }
                        Err(e) => {
                            log::info!(
                                "[Clock] Reference clock source unreachable ({}); retaining last offset, retrying in {} sec.",
                                e,
                                interval.as_secs()
                            );
                        }
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

impl Default for ReferenceClock {
    fn default() -> Self {
        Self::new(DEFAULT_NTP_SERVER)
    }
}

/// Default probe interval (spec §4.1: 600s).
#[must_use]
pub fn default_interval() -> Duration {
    Duration::from_secs(SYNC_INTERVAL_SECS)
}

async fn query_offset(server: &str) -> Result<f64, AuderaError> {
    let addr: SocketAddr = tokio::net::lookup_host(server)
        .await
        .map_err(|e| AuderaError::ClockUnreachable(format!("resolving {server}: {e}")))?
        .next()
        .ok_or_else(|| AuderaError::ClockUnreachable(format!("no addresses for {server}")))?;

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| AuderaError::ClockUnreachable(format!("bind: {e}")))?;
    socket
        .connect(addr)
        .await
        .map_err(|e| AuderaError::ClockUnreachable(format!("connect to {addr}: {e}")))?;

    let mut request = [0u8; 48];
    request[0] = 0x1B; // LI=0, VN=3, Mode=3 (client)

    let t1 = now_secs_since_epoch();
    socket
        .send(&request)
        .await
        .map_err(|e| AuderaError::ClockUnreachable(format!("send: {e}")))?;

    let mut response = [0u8; 48];
    let n = timeout(Duration::from_secs(TIME_OUT_SECS), socket.recv(&mut response))
        .await
        .map_err(|_| AuderaError::ClockUnreachable("timed out waiting for NTP reply".into()))?
        .map_err(|e| AuderaError::ClockUnreachable(format!("recv: {e}")))?;
    let t4 = now_secs_since_epoch();

    if n < 48 {
        return Err(AuderaError::ClockUnreachable(format!(
            "short NTP reply ({n} bytes)"
        )));
    }

    let t2 = ntp_timestamp_to_unix(&response[32..40]);
    let t3 = ntp_timestamp_to_unix(&response[40..48]);

    let offset = ((t2 - t1) + (t3 - t4)) / 2.0;
    if !offset.is_finite() {
        return Err(AuderaError::ClockUnreachable(
            "NTP server returned a non-finite offset".into(),
        ));
    }
    Ok(offset)
}

fn ntp_timestamp_to_unix(bytes: &[u8]) -> f64 {
    let seconds = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let fraction = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    (seconds as f64 - NTP_UNIX_EPOCH_DELTA as f64) + (fraction as f64 / u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_defaults_to_zero() {
        let clock = ReferenceClock::default();
        assert_eq!(clock.offset(), 0.0);
    }

    #[test]
    fn set_offset_round_trips_through_atomic_bits() {
        let clock = ReferenceClock::new(DEFAULT_NTP_SERVER);
        clock.set_offset(1.2345);
        assert!((clock.offset() - 1.2345).abs() < f64::EPSILON);
        // Offset can move non-monotonically in value (spec §4.1).
        clock.set_offset(-0.5);
        assert_eq!(clock.offset(), -0.5);
    }

    #[test]
    fn ntp_timestamp_decodes_known_value() {
        // 1900-01-01 + NTP_UNIX_EPOCH_DELTA seconds, zero fraction, is the Unix epoch.
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&(NTP_UNIX_EPOCH_DELTA as u32).to_be_bytes());
        assert_eq!(ntp_timestamp_to_unix(&bytes), 0.0);
    }

    #[tokio::test]
    async fn unreachable_server_is_logged_and_non_fatal() {
        // Port 0 after connect() will fail locally without any network access.
        let result = query_offset("127.0.0.1:1").await;
        assert!(result.is_err());
    }
}
