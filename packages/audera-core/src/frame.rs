//! Deadline-stamped audio frame codec (spec §4.3 "Frame codec").
//!
//! Wire layout: `len(4 bytes, big-endian u32) | deadline(8 bytes, IEEE-754
//! double, little-endian) | payload(len bytes) | delimiter(12 bytes)`. The
//! delimiter is the fixed sequence in [`crate::constants::FRAME_DELIMITER`].
//! Writers always append the delimiter verbatim; readers frame on it,
//! scanning the incoming byte stream rather than trusting the header's
//! `len` field to know how much to read — this is what lets the player
//! detect a header/payload length mismatch (spec §8 scenario 3) instead of
//! silently consuming bytes into the next frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::FRAME_DELIMITER;

/// Bounded-read ceiling (spec §7 kind 4: "delimiter not found within a
/// bounded read"). No legitimate chunk comes close to this; it exists only
/// to cap memory growth against a stream that never produces a delimiter.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const HEADER_LEN: usize = 4 + 8;

/// A decoded frame: its deadline and PCM payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Absolute wall-clock deadline (seconds since epoch), as stamped by the streamer.
    pub deadline: f64,
    pub payload: Bytes,
}

/// Reasons a frame failed validation (spec §7 kind 4).
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    /// The header's declared `len` did not match the payload bytes actually
    /// observed before the delimiter.
    #[error("incomplete packet: header declared {declared} bytes, observed {observed}")]
    LengthMismatch { declared: usize, observed: usize },

    /// No delimiter appeared within [`MAX_FRAME_BYTES`] of stream data.
    #[error("no frame delimiter found within {0} bytes")]
    BoundedReadExceeded(usize),

    /// The underlying connection closed mid-frame.
    #[error("connection closed while reading a frame")]
    ConnectionClosed,
}

/// Encodes one frame: `len | deadline | payload | delimiter`.
#[must_use]
pub fn encode(deadline: f64, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len() + FRAME_DELIMITER.len());
    buf.put_u32(payload.len() as u32);
    buf.put_f64_le(deadline);
    buf.put_slice(payload);
    buf.put_slice(FRAME_DELIMITER);
    buf.freeze()
}

/// Parses one complete wire packet (header + payload + delimiter, delimiter
/// included) previously located by scanning for [`FRAME_DELIMITER`].
fn parse_packet(packet: &[u8]) -> Result<DecodedFrame, FrameError> {
    debug_assert!(packet.ends_with(FRAME_DELIMITER));

    let observed = packet.len().saturating_sub(HEADER_LEN + FRAME_DELIMITER.len());
    let mut header = &packet[..HEADER_LEN];
    let declared = header.get_u32() as usize;
    let deadline = header.get_f64_le();

    if observed != declared {
        return Err(FrameError::LengthMismatch { declared, observed });
    }

    let payload_start = HEADER_LEN;
    let payload_end = packet.len() - FRAME_DELIMITER.len();
    Ok(DecodedFrame {
        deadline,
        payload: Bytes::copy_from_slice(&packet[payload_start..payload_end]),
    })
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    if haystack.len() < FRAME_DELIMITER.len() {
        return None;
    }
    haystack
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER.as_slice())
}

/// Incrementally reads delimiter-framed [`DecodedFrame`]s off an async
/// byte stream, retaining any bytes read past one frame's delimiter for
/// the next call (TCP gives no guarantee that reads land on frame
/// boundaries).
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(8192),
        }
    }

    /// Reads and validates the next frame, per spec §4.3/§7 kind 4.
    ///
    /// Returns `Ok(Err(FrameError))` for a validation failure that should
    /// be dropped while the connection stays open (length mismatch), and
    /// `Err(std::io::Error)` for a connection-level failure the caller
    /// should treat as a peer detach.
    pub async fn read_frame(&mut self) -> std::io::Result<Result<DecodedFrame, FrameError>> {
        loop {
            if let Some(pos) = find_delimiter(&self.buf) {
                let frame_end = pos + FRAME_DELIMITER.len();
                let packet = self.buf.split_to(frame_end);
                return Ok(parse_packet(&packet));
            }

            if self.buf.len() > MAX_FRAME_BYTES {
                return Ok(Err(FrameError::BoundedReadExceeded(MAX_FRAME_BYTES)));
            }

            let mut chunk = [0u8; 4096];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(Err(FrameError::ConnectionClosed));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // R1: encode -> decode round-trips payload bytes and the deadline exactly.
    #[tokio::test]
    async fn round_trip_preserves_payload_and_deadline() {
        let payload = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let wire = encode(12345.678, &payload);

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let decoded = reader.read_frame().await.unwrap().unwrap();

        assert_eq!(decoded.payload.as_ref(), payload.as_slice());
        assert!((decoded.deadline - 12345.678).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn zero_deadline_round_trips_exactly() {
        let wire = encode(0.0, &[9, 9, 9]);
        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let decoded = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(decoded.deadline, 0.0);
    }

    // Spec §8 scenario 3: header declares 4096 bytes, only 3000 bytes of
    // actual payload precede a correctly-formed delimiter.
    #[tokio::test]
    async fn incomplete_packet_is_a_length_mismatch() {
        let mut wire = BytesMut::new();
        wire.put_u32(4096);
        wire.put_f64_le(100.0);
        wire.extend_from_slice(&vec![0xAB; 3000]);
        wire.extend_from_slice(FRAME_DELIMITER);

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let result = reader.read_frame().await.unwrap();
        assert_eq!(
            result,
            Err(FrameError::LengthMismatch {
                declared: 4096,
                observed: 3000
            })
        );
    }

    #[tokio::test]
    async fn reads_two_frames_back_to_back() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode(1.0, &[1, 2, 3]));
        wire.extend_from_slice(&encode(2.0, &[4, 5, 6, 7]));

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let first = reader.read_frame().await.unwrap().unwrap();
        let second = reader.read_frame().await.unwrap().unwrap();

        assert_eq!(first.payload.as_ref(), &[1, 2, 3]);
        assert_eq!(second.payload.as_ref(), &[4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn empty_stream_reports_connection_closed() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let result = reader.read_frame().await.unwrap();
        assert_eq!(result, Err(FrameError::ConnectionClosed));
    }
}
