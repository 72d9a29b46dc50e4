//! Fixed protocol and tuning constants.
//!
//! Protocol constants (delimiter, endianness) must never change without a
//! wire-format bump; tuning constants are the defaults surfaced through
//! [`crate::config::Config`] and can be overridden at runtime.

/// mDNS/DNS-SD service type used for player discovery (spec §4.4, §6.4).
pub const SERVICE_TYPE: &str = "_audera._tcp.local.";

/// Default TCP port for the deadline-stamped audio broadcast (spec §6.1).
pub const STREAM_PORT: u16 = 5000;

/// Default TCP port for the pairwise wall-clock sync probe (spec §6.2).
pub const SYNC_PORT: u16 = 5001;

/// Fixed 12-byte frame delimiter (spec §4.3): `0xFF 0xFE 0xFD 0xFC` + `"audera"` + `0x00 0x00`.
///
/// The original implementation builds this as `PACKET_TERMINATOR (4) +
/// NAME.encode() (6) + PACKET_ESCAPE * 2 (2)` = 12 bytes; spec.md's prose
/// annotation of "13 bytes" does not match its own literal byte listing.
/// This follows the literal sequence (and the original source), not the
/// miscounted annotation — see DESIGN.md.
pub const FRAME_DELIMITER: &[u8; 12] = b"\xFF\xFE\xFD\xFC\x61\x75\x64\x65\x72\x61\x00\x00";

/// Interval in seconds between reference-clock (C1) probes.
pub const SYNC_INTERVAL_SECS: u64 = 600;

/// Interval in seconds between peer-sync (C5) rounds.
pub const PING_INTERVAL_SECS: u64 = 2;

/// Bounded history size for round-trip-time samples (C5).
pub const RTT_HISTORY_SIZE: usize = 10;

/// Default fixed playback delay headroom added at the streamer (seconds).
pub const PLAYBACK_DELAY_SECS: f64 = 2.0;

/// Minimum playback delay the adaptive rule (spec §9, §4.14) may shrink to.
pub const MIN_PLAYBACK_DELAY_SECS: f64 = 1.0;

/// Maximum playback delay the adaptive rule may grow to.
pub const MAX_PLAYBACK_DELAY_SECS: f64 = 5.0;

/// Jitter (stdev of RTT history) below which the adaptive rule shrinks delay.
pub const LOW_JITTER: f64 = 0.01;

/// Jitter above which the adaptive rule grows delay.
pub const HIGH_JITTER: f64 = 0.05;

/// Mean RTT below which the adaptive rule shrinks delay.
pub const LOW_RTT: f64 = 0.1;

/// Mean RTT above which the adaptive rule grows delay.
pub const HIGH_RTT: f64 = 0.5;

/// Step size applied to the playback delay by the adaptive rule.
pub const PLAYBACK_DELAY_STEP_SECS: f64 = 0.05;

/// Bounded output-queue depth (frames) at the player (spec §4.2).
pub const OUTPUT_QUEUE_CAPACITY: usize = 10;

/// Cooperative timeout applied to every connect/sleep/cancellation point (spec §5).
pub const TIME_OUT_SECS: u64 = 5;

/// Default number of frames per audio chunk.
pub const DEFAULT_CHUNK_FRAMES: u32 = 1024;

/// Default sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default channel count.
pub const DEFAULT_CHANNELS: u16 = 2;

/// mDNS instance-name prefix (spec §6.4: instance name `raop@<mac>`),
/// inherited from the original implementation's AirPlay-compatible naming
/// (`examples/original_source/audera/player.py`, `streamer.py`). This is
/// the wire-visible service name, not the Rust package name — do not
/// replace with the crate/binary name.
pub const INSTANCE_PREFIX: &str = "raop";
