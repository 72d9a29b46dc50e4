//! Output endpoint: opens a PCM output device and drives the render
//! callback (spec §4.2 "Audio I/O endpoints (C2)", §4.8 "Playback pipeline
//! (C8)(c) Render callback").
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream is built
//! and dropped on one dedicated thread, held alive only by a drop-guard
//! channel — the same shape as the pack's `haileys-bark` reference project
//! (`bark-device/src/sink.rs`'s `start_stream_thread`), the closest real
//! example of a realtime `cpal` render callback in the retrieved corpus.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{OutputCallbackInfo, StreamConfig};

use crate::audio::device;
use crate::audio::queue::QueueConsumer;
use crate::error::AuderaError;
use crate::model::audio::{AudioDevice, AudioInterface, SampleFormat};
use crate::util::AtomicF64;

fn to_cpal_config(iface: &AudioInterface) -> StreamConfig {
    StreamConfig {
        channels: iface.channels.count() as u16,
        sample_rate: cpal::SampleRate(iface.rate.hz()),
        buffer_size: cpal::BufferSize::Fixed(iface.chunk),
    }
}

/// Samples that can be written to a typed `cpal` output stream from raw
/// little-endian PCM bytes. Implemented locally (rather than reaching into
/// `cpal`'s own sample-conversion traits) so the conversion stays explicit
/// about the one byte order the wire protocol uses (spec §9 "Endianness").
trait PcmSample: cpal::Sample + Copy + Send + 'static {
    const WIDTH: usize;
    fn decode(bytes: &[u8]) -> Self;
}

impl PcmSample for i8 {
    const WIDTH: usize = 1;
    fn decode(bytes: &[u8]) -> Self {
        bytes[0] as i8
    }
}

impl PcmSample for i16 {
    const WIDTH: usize = 2;
    fn decode(bytes: &[u8]) -> Self {
        i16::from_le_bytes([bytes[0], bytes[1]])
    }
}

impl PcmSample for i32 {
    const WIDTH: usize = 4;
    fn decode(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Shared state the render callback reads from the audio thread and the
/// cooperative loop writes from its own thread.
///
/// `buffer_ready` (spec §4.8b) is tracked by the stream acceptor
/// ([`crate::player::run_stream_acceptor`]) on first successful enqueue, not
/// here — the render callback has no reason to know about it.
struct Shared {
    streamer_offset: AtomicF64,
}

/// Holds the dedicated thread alive for as long as the endpoint lives; the
/// stream is dropped, and playback stopped, when this is dropped.
struct StreamHandle {
    _drop_guard: std_mpsc::SyncSender<()>,
}

/// An open PCM output endpoint (spec §4.2 "output variant").
pub struct OutputEndpoint {
    interface: AudioInterface,
    device: AudioDevice,
    shared: Arc<Shared>,
    handle: StreamHandle,
}

impl OutputEndpoint {
    /// Opens the output device and starts the render callback, consuming
    /// frames from `consumer`.
    pub fn open(
        interface: AudioInterface,
        device_record: AudioDevice,
        consumer: QueueConsumer,
    ) -> Result<Self, AuderaError> {
        let shared = Arc::new(Shared {
            streamer_offset: AtomicF64::new(0.0),
        });

        let handle = start_stream_thread(interface, device_record.clone(), shared.clone(), consumer)?;

        Ok(Self {
            interface,
            device: device_record,
            shared,
            handle,
        })
    }

    /// Updates the latest known streamer offset (spec §4.8 step 3), read by
    /// the render callback on its own thread via [`AtomicF64`] — never
    /// blocking, satisfying §5's "non-blocking" render-callback contract.
    pub fn set_streamer_offset(&self, offset: f64) {
        self.shared.streamer_offset.store(offset);
    }

    /// Reopens with new parameters if they differ from the current ones,
    /// returning whether a change occurred (spec §4.2 `update`, R3).
    /// Never tears partway: the old stream is dropped only after the new
    /// one is confirmed open.
    pub fn update(
        &mut self,
        new_interface: AudioInterface,
        new_device: AudioDevice,
        consumer: QueueConsumer,
    ) -> Result<bool, AuderaError> {
        if new_interface == self.interface && new_device == self.device {
            return Ok(false);
        }

        let shared = Arc::new(Shared {
            streamer_offset: AtomicF64::new(self.shared.streamer_offset.load()),
        });
        let handle = start_stream_thread(new_interface, new_device.clone(), shared.clone(), consumer)?;

        self.handle = handle;
        self.shared = shared;
        self.interface = new_interface;
        self.device = new_device;
        Ok(true)
    }
}

fn start_stream_thread(
    interface: AudioInterface,
    device_record: AudioDevice,
    shared: Arc<Shared>,
    consumer: QueueConsumer,
) -> Result<StreamHandle, AuderaError> {
    let (result_tx, result_rx) = std_mpsc::sync_channel::<Result<(), AuderaError>>(0);
    let (guard_tx, guard_rx) = std_mpsc::sync_channel::<()>(0);

    std::thread::Builder::new()
        .name("audera-output".into())
        .spawn(move || match build_and_play(&interface, &device_record, shared, consumer) {
            Err(e) => {
                let _ = result_tx.send(Err(e));
            }
            Ok(stream) => {
                let _ = result_tx.send(Ok(()));
                let _ = guard_rx.recv();
                drop(stream);
            }
        })
        .map_err(|e| AuderaError::AudioDevice {
            role: "output",
            source: Box::new(e),
        })?;

    match result_rx.recv() {
        Ok(Ok(())) => Ok(StreamHandle { _drop_guard: guard_tx }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AuderaError::AudioDevice {
            role: "output",
            source: "output thread terminated before reporting readiness".into(),
        }),
    }
}

fn build_and_play(
    interface: &AudioInterface,
    device_record: &AudioDevice,
    shared: Arc<Shared>,
    consumer: QueueConsumer,
) -> Result<cpal::Stream, AuderaError> {
    let device = device::resolve(device_record)?;
    let config = to_cpal_config(interface);
    let expected_len = interface.chunk_byte_len();

    let stream = match interface.format {
        SampleFormat::Int8 => build_typed::<i8>(&device, &config, shared, consumer, expected_len)?,
        SampleFormat::Int16 => build_typed::<i16>(&device, &config, shared, consumer, expected_len)?,
        SampleFormat::Int24 | SampleFormat::Int32 => {
            build_typed::<i32>(&device, &config, shared, consumer, expected_len)?
        }
    };

    stream.play().map_err(|e| AuderaError::AudioDevice {
        role: "output",
        source: Box::new(e),
    })?;

    Ok(stream)
}

fn build_typed<T: PcmSample>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<Shared>,
    mut consumer: QueueConsumer,
    expected_len: usize,
) -> Result<cpal::Stream, AuderaError> {
    device
        .build_output_stream(
            config,
            move |data: &mut [T], info: &OutputCallbackInfo| {
                render(data, info, &shared, &mut consumer, expected_len);
            },
            move |err| {
                log::error!("[Audio] Output stream error: {err}");
            },
            None,
        )
        .map_err(|e| AuderaError::AudioDevice {
            role: "output",
            source: Box::new(e),
        })
}

/// Render callback body (spec §4.8c).
///
/// `cpal::StreamInstant` carries no absolute/epoch time, only
/// instant-to-instant durations (unlike PortAudio's `output_buffer_dac_time`
/// the original targets). We anchor the DAC-relative `callback → playback`
/// latency to a wall-clock sample taken at callback entry instead, which is
/// the Rust-idiomatic equivalent of steps 1–2's `dac_offset` composition —
/// the same anchoring `haileys-bark`'s render callback uses.
fn render<T: PcmSample>(
    data: &mut [T],
    info: &OutputCallbackInfo,
    shared: &Shared,
    consumer: &mut QueueConsumer,
    expected_len: usize,
) {
    let callback_now = now_secs();
    let latency = info
        .timestamp()
        .playback
        .duration_since(&info.timestamp().callback)
        .unwrap_or_default();
    let dac_playback_time = callback_now + latency.as_secs_f64();

    let streamer_offset = shared.streamer_offset.load();

    // 3: drop incomplete/late frames until a renderable one is at the head.
    loop {
        let Some(head) = consumer.peek() else { break };

        if head.payload.len() != expected_len {
            log::warn!(
                "[Audio] Incomplete packet: expected {} bytes, got {} bytes; dropping.",
                expected_len,
                head.payload.len()
            );
            consumer.try_pop();
            continue;
        }

        let target = head.deadline - streamer_offset;
        if target < dac_playback_time {
            log::warn!(
                "[Audio] Late packet: target {:.6} < dac_playback_time {:.6}; dropping.",
                target,
                dac_playback_time
            );
            consumer.try_pop();
            continue;
        }

        break;
    }

    // 4: pop the now-validated head, or emit silence.
    match consumer.try_pop() {
        Some(frame) if frame.payload.len() == expected_len => {
            for (sample, bytes) in data.iter_mut().zip(frame.payload.chunks_exact(T::WIDTH)) {
                *sample = T::decode(bytes);
            }
        }
        Some(_) | None => {
            data.fill(T::EQUILIBRIUM);
        }
    }
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::audio::{Channels, SampleRate};

    #[test]
    fn decodes_little_endian_samples() {
        assert_eq!(i16::decode(&[0x01, 0x00]), 1);
        assert_eq!(i16::decode(&[0xFF, 0xFF]), -1);
        assert_eq!(i32::decode(&[0x00, 0x00, 0x00, 0x01]), 16_777_216);
    }

    #[test]
    fn cpal_config_carries_rate_and_channels() {
        let iface = AudioInterface {
            format: SampleFormat::Int16,
            rate: SampleRate::Hz48000,
            channels: Channels::Stereo,
            chunk: 512,
        };
        let config = to_cpal_config(&iface);
        assert_eq!(config.sample_rate.0, 48000);
        assert_eq!(config.channels, 2);
    }
}
