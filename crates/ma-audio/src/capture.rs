//! Capture source contract and cpal binding
//!
//! The pipeline core only requires that *some* producer delivers
//! interleaved 16-bit PCM chunks at a steady cadence, channel-major per
//! frame: `[f0c0, f0c1, .., f0c(M-1), f1c0, ..]`. Chunk lengths must be a
//! multiple of the channel count. `CpalCaptureSource` is the portable
//! device-backed implementation; tests substitute scripted sources.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, Stream, StreamConfig};

use ma_core::{MicArrayError, Result};

/// Per-chunk callback invoked from the capture thread.
pub type ChunkCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;

/// A producer of interleaved multi-channel PCM.
pub trait CaptureSource {
    /// Begin delivering chunks to `callback`. Idempotent starts are not
    /// required; the engine guards against double-start.
    fn start(&mut self, callback: ChunkCallback) -> Result<()>;

    /// Stop delivering chunks and release the device.
    fn stop(&mut self) -> Result<()>;
}

/// Capture binding over the default (or named) system input device.
pub struct CpalCaptureSource {
    device_name: Option<String>,
    channels: usize,
    sample_rate: u32,
    stream: Option<Stream>,
}

impl CpalCaptureSource {
    pub fn new(device_name: Option<&str>, channels: usize, sample_rate: u32) -> Self {
        Self {
            device_name: device_name.map(str::to_string),
            channels,
            sample_rate,
            stream: None,
        }
    }

    fn open_device(&self) -> Result<Device> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| MicArrayError::Capture(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| {
                    MicArrayError::Capture(format!("input device not found: {name}"))
                }),
            None => host
                .default_input_device()
                .ok_or_else(|| MicArrayError::Capture("no input device available".to_string())),
        }
    }
}

impl CaptureSource for CpalCaptureSource {
    fn start(&mut self, mut callback: ChunkCallback) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = self.open_device()?;
        let sample_rate: cpal::SampleRate = self.sample_rate;
        let channels = self.channels as u16;

        let supported = device
            .supported_input_configs()
            .map_err(|e| MicArrayError::Capture(e.to_string()))?
            .find(|config| {
                config.channels() >= channels
                    && config.min_sample_rate() <= sample_rate
                    && config.max_sample_rate() >= sample_rate
                    && config.sample_format() == SampleFormat::F32
            })
            .ok_or_else(|| {
                MicArrayError::Capture(format!(
                    "no input config for {} channels @ {} Hz",
                    channels, self.sample_rate
                ))
            })?;

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate,
            buffer_size: BufferSize::Default,
        };

        let device_channels = supported.channels() as usize;
        let wanted = self.channels;
        let mut chunk: Vec<i16> = Vec::new();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Repack the device's frame layout down to the array's
                    // channel count and convert to 16-bit PCM.
                    let frames = data.len() / device_channels;
                    chunk.clear();
                    chunk.reserve(frames * wanted);
                    for frame in data.chunks_exact(device_channels) {
                        for &sample in &frame[..wanted] {
                            chunk.push((sample.clamp(-1.0, 1.0) * 32767.0) as i16);
                        }
                    }
                    callback(&chunk);
                },
                move |err| {
                    log::error!("capture stream error: {err}");
                },
                None,
            )
            .map_err(|e| MicArrayError::Capture(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MicArrayError::Capture(e.to_string()))?;

        log::info!(
            "capture started: {} channels @ {} Hz",
            self.channels,
            self.sample_rate
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| MicArrayError::Capture(e.to_string()))?;
            log::info!("capture stopped");
        }
        Ok(())
    }
}

/// Names of the available input devices, default device first.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut names = Vec::new();
    for device in host
        .input_devices()
        .map_err(|e| MicArrayError::Capture(e.to_string()))?
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
