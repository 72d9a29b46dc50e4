//! Input endpoint: opens a PCM capture device and forwards fixed-size
//! chunks to the streamer pipeline (spec §4.2 "Audio I/O endpoints (C2)",
//! §4.7 "Streamer pipeline (C7)": "in a tight loop read one chunk").
//!
//! Same dedicated-thread shape as [`crate::audio::output`] — `cpal::Stream`
//! is not portably `Send`, so it is built, played, and dropped on one
//! thread, kept alive by a drop-guard channel.

use std::sync::mpsc as std_mpsc;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::InputCallbackInfo;
use tokio::sync::mpsc;

use crate::audio::device;
use crate::error::AuderaError;
use crate::model::audio::{AudioDevice, AudioInterface, SampleFormat};

fn to_cpal_config(iface: &AudioInterface) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: iface.channels.count() as u16,
        sample_rate: cpal::SampleRate(iface.rate.hz()),
        buffer_size: cpal::BufferSize::Fixed(iface.chunk),
    }
}

trait PcmSample: cpal::Sample + Copy + Send + 'static {
    const WIDTH: usize;
    fn encode_into(self, out: &mut Vec<u8>);
}

impl PcmSample for i8 {
    const WIDTH: usize = 1;
    fn encode_into(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }
}

impl PcmSample for i16 {
    const WIDTH: usize = 2;
    fn encode_into(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

impl PcmSample for i32 {
    const WIDTH: usize = 4;
    fn encode_into(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

struct StreamHandle {
    _drop_guard: std_mpsc::SyncSender<()>,
}

/// An open PCM input endpoint feeding whole-chunk byte buffers to a
/// channel consumed by the streamer's capture loop (C7).
pub struct InputEndpoint {
    interface: AudioInterface,
    device: AudioDevice,
    _handle: StreamHandle,
}

impl InputEndpoint {
    /// Opens the input device and starts capture, publishing one `Bytes`
    /// chunk (exactly `interface.chunk_byte_len()` bytes) per callback
    /// invocation on `chunks`.
    pub fn open(
        interface: AudioInterface,
        device_record: AudioDevice,
        chunks: mpsc::Sender<Bytes>,
    ) -> Result<Self, AuderaError> {
        let handle = start_stream_thread(interface, device_record.clone(), chunks)?;
        Ok(Self {
            interface,
            device: device_record,
            _handle: handle,
        })
    }

    #[must_use]
    pub fn interface(&self) -> AudioInterface {
        self.interface
    }

    #[must_use]
    pub fn device(&self) -> &AudioDevice {
        &self.device
    }

    /// Reopens with new parameters if they differ from the current ones,
    /// returning whether a change occurred (spec §4.2 `update`, R3). Never
    /// tears partway: the old capture thread is dropped only after the new
    /// one is confirmed open.
    pub fn update(&mut self, new_interface: AudioInterface, new_device: AudioDevice, chunks: mpsc::Sender<Bytes>) -> Result<bool, AuderaError> {
        if new_interface == self.interface && new_device == self.device {
            return Ok(false);
        }

        let handle = start_stream_thread(new_interface, new_device.clone(), chunks)?;

        self._handle = handle;
        self.interface = new_interface;
        self.device = new_device;
        Ok(true)
    }
}

fn start_stream_thread(
    interface: AudioInterface,
    device_record: AudioDevice,
    chunks: mpsc::Sender<Bytes>,
) -> Result<StreamHandle, AuderaError> {
    let (result_tx, result_rx) = std_mpsc::sync_channel::<Result<(), AuderaError>>(0);
    let (guard_tx, guard_rx) = std_mpsc::sync_channel::<()>(0);

    std::thread::Builder::new()
        .name("audera-input".into())
        .spawn(move || match build_and_play(&interface, &device_record, chunks) {
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
            role: "input",
            source: Box::new(e),
        })?;

    match result_rx.recv() {
        Ok(Ok(())) => Ok(StreamHandle { _drop_guard: guard_tx }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(AuderaError::AudioDevice {
            role: "input",
            source: "input thread terminated before reporting readiness".into(),
        }),
    }
}

fn build_and_play(
    interface: &AudioInterface,
    device_record: &AudioDevice,
    chunks: mpsc::Sender<Bytes>,
) -> Result<cpal::Stream, AuderaError> {
    let device = device::resolve(device_record)?;
    let config = to_cpal_config(interface);
    let chunk_frames = interface.chunk as usize;

    let stream = match interface.format {
        SampleFormat::Int8 => build_typed::<i8>(&device, &config, chunks, chunk_frames)?,
        SampleFormat::Int16 => build_typed::<i16>(&device, &config, chunks, chunk_frames)?,
        SampleFormat::Int24 | SampleFormat::Int32 => {
            build_typed::<i32>(&device, &config, chunks, chunk_frames)?
        }
    };

    stream.play().map_err(|e| AuderaError::AudioDevice {
        role: "input",
        source: Box::new(e),
    })?;

    Ok(stream)
}

fn build_typed<T: PcmSample>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    chunks: mpsc::Sender<Bytes>,
    chunk_frames: usize,
) -> Result<cpal::Stream, AuderaError> {
    let expected_samples = chunk_frames * config.channels as usize;

    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &InputCallbackInfo| {
                let mut bytes = Vec::with_capacity(data.len() * T::WIDTH);
                for sample in data.iter().take(expected_samples) {
                    sample.encode_into(&mut bytes);
                }
                // A full cooperative-loop channel means the capture loop is
                // behind; dropping here is the same "congestion drops audio
                // rather than growing latency" policy as the render callback.
                let _ = chunks.try_send(Bytes::from(bytes));
            },
            move |err| {
                log::error!("[Audio] Input stream error: {err}");
            },
            None,
        )
        .map_err(|e| AuderaError::AudioDevice {
            role: "input",
            source: Box::new(e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_encodes_little_endian() {
        let mut out = Vec::new();
        1i16.encode_into(&mut out);
        assert_eq!(out, vec![0x01, 0x00]);
    }

    #[test]
    fn i32_encodes_little_endian() {
        let mut out = Vec::new();
        16_777_216i32.encode_into(&mut out);
        assert_eq!(out, vec![0x00, 0x00, 0x00, 0x01]);
    }
}
