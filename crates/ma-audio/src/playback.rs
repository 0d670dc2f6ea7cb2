//! Playback sink contract and cpal binding
//!
//! The sink consumes interleaved 16-bit stereo frames. `CpalPlayback` owns
//! the output stream and hands its writer half to the processing worker:
//! the writer pushes into a wait-free ring which the device callback
//! drains, so the write path blocks only on ring back-pressure, which is
//! the pipeline's real rate limiter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, Stream, StreamConfig};
use rtrb::{Consumer, Producer, RingBuffer};

use ma_core::{MicArrayError, Result};

/// Sink-side write failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The device side went away mid-stream; recoverable by `reset`.
    BrokenPipe,
    /// Unrecoverable sink failure.
    Failed(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BrokenPipe => write!(f, "broken pipe"),
            Self::Failed(message) => write!(f, "{message}"),
        }
    }
}

/// A consumer of interleaved (L, R) 16-bit frames.
pub trait PlaybackSink: Send {
    /// Write stereo frames; `frames.len()` must be even. Returns the
    /// number of frames written. May block on device back-pressure.
    fn write(&mut self, frames: &[i16]) -> std::result::Result<usize, SinkError>;

    /// Recover from a broken-pipe condition.
    fn reset(&mut self) -> Result<()>;
}

/// Discarding sink for headless operation and tests.
#[derive(Default)]
pub struct NullSink {
    frames_written: u64,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl PlaybackSink for NullSink {
    fn write(&mut self, frames: &[i16]) -> std::result::Result<usize, SinkError> {
        let count = frames.len() / 2;
        self.frames_written += count as u64;
        Ok(count)
    }

    fn reset(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Playback device binding. Owns the cpal stream; `writer()` detaches the
/// `Send` half that the worker thread writes through.
pub struct CpalPlayback {
    stream: Stream,
    producer: Option<Producer<i16>>,
    alive: Arc<AtomicBool>,
}

impl CpalPlayback {
    /// Open the default (or named) output device as a stereo stream and
    /// interpose a ring holding `ring_frames` frames.
    pub fn new(device_name: Option<&str>, sample_rate: u32, ring_frames: usize) -> Result<Self> {
        let device = open_output_device(device_name)?;
        let rate: cpal::SampleRate = sample_rate;

        let supported = device
            .supported_output_configs()
            .map_err(|e| MicArrayError::Playback(e.to_string()))?
            .find(|config| {
                config.channels() >= 2
                    && config.min_sample_rate() <= rate
                    && config.max_sample_rate() >= rate
                    && config.sample_format() == SampleFormat::F32
            })
            .ok_or_else(|| {
                MicArrayError::Playback(format!("no stereo output config @ {sample_rate} Hz"))
            })?;

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: rate,
            buffer_size: BufferSize::Default,
        };
        let device_channels = supported.channels() as usize;

        let (producer, mut consumer): (Producer<i16>, Consumer<i16>) =
            RingBuffer::new(ring_frames * 2);
        let alive = Arc::new(AtomicBool::new(true));
        let alive_cb = Arc::clone(&alive);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_exact_mut(device_channels) {
                        let left = consumer.pop().unwrap_or(0);
                        let right = consumer.pop().unwrap_or(0);
                        frame[0] = left as f32 / 32768.0;
                        if device_channels > 1 {
                            frame[1] = right as f32 / 32768.0;
                        }
                        for sample in frame.iter_mut().skip(2) {
                            *sample = 0.0;
                        }
                    }
                },
                move |err| {
                    log::error!("playback stream error: {err}");
                    alive_cb.store(false, Ordering::Release);
                },
                None,
            )
            .map_err(|e| MicArrayError::Playback(e.to_string()))?;

        Ok(Self {
            stream,
            producer: Some(producer),
            alive,
        })
    }

    /// Detach the writer half. Can be taken once.
    pub fn writer(&mut self) -> Result<CpalSinkWriter> {
        let producer = self.producer.take().ok_or_else(|| {
            MicArrayError::Playback("playback writer already taken".to_string())
        })?;
        Ok(CpalSinkWriter {
            producer,
            alive: Arc::clone(&self.alive),
        })
    }

    pub fn start(&self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| MicArrayError::Playback(e.to_string()))
    }

    pub fn stop(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| MicArrayError::Playback(e.to_string()))
    }
}

/// `Send` writer half of a `CpalPlayback`.
pub struct CpalSinkWriter {
    producer: Producer<i16>,
    alive: Arc<AtomicBool>,
}

impl PlaybackSink for CpalSinkWriter {
    fn write(&mut self, frames: &[i16]) -> std::result::Result<usize, SinkError> {
        let mut written = 0;
        let mut stalls = 0u32;
        while written < frames.len() {
            if !self.alive.load(Ordering::Acquire) {
                return Err(SinkError::BrokenPipe);
            }
            match self.producer.push(frames[written]) {
                Ok(()) => {
                    written += 1;
                    stalls = 0;
                }
                // Ring full: wait for the device callback to drain. A ring
                // that never drains means the stream stopped consuming.
                Err(_) => {
                    stalls += 1;
                    if stalls > 1000 {
                        return Err(SinkError::BrokenPipe);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
        Ok(written / 2)
    }

    fn reset(&mut self) -> Result<()> {
        // The device callback keeps draining; marking the stream alive
        // again lets writes resume after a transient error.
        self.alive.store(true, Ordering::Release);
        Ok(())
    }
}

fn open_output_device(device_name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    match device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| MicArrayError::Playback(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| MicArrayError::Playback(format!("output device not found: {name}"))),
        None => host
            .default_output_device()
            .ok_or_else(|| MicArrayError::Playback("no output device available".to_string())),
    }
}

/// Names of the available output devices, default device first.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut names = Vec::new();
    for device in host
        .output_devices()
        .map_err(|e| MicArrayError::Playback(e.to_string()))?
    {
        if let Ok(name) = device.name() {
            if Some(&name) == default_name.as_ref() {
                names.insert(0, name);
            } else {
                names.push(name);
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_counts_frames() {
        let mut sink = NullSink::new();
        assert_eq!(sink.write(&[0i16; 64]).unwrap(), 32);
        assert_eq!(sink.frames_written(), 32);
        assert!(sink.reset().is_ok());
    }

    #[test]
    fn test_sink_error_display() {
        assert_eq!(SinkError::BrokenPipe.to_string(), "broken pipe");
        assert_eq!(
            SinkError::Failed("device lost".into()).to_string(),
            "device lost"
        );
    }
}
