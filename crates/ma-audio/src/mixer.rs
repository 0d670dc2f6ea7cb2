//! Spatial stereo mixer
//!
//! Renders the downmixed mono block to interleaved stereo with panning
//! that tracks the estimated source angle and attenuation that tracks its
//! distance. Gains are constant within a block; the shared volume cell is
//! lock-free and clamped to [0, 1] on every store.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ma_core::{sample_to_pcm, MicArrayError, Result, Sample, SoundLocation};

use crate::playback::{PlaybackSink, SinkError};

/// Lock-free volume cell (f32 bits in an atomic word).
pub struct Volume(AtomicU32);

impl Volume {
    pub fn new(volume: f32) -> Self {
        Self(AtomicU32::new(volume.clamp(0.0, 1.0).to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Store a new volume, clamped to [0, 1].
    pub fn set(&self, volume: f32) {
        self.0
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}

/// Downmix-to-stereo renderer.
pub struct SpatialMixer {
    volume: Arc<Volume>,
    scratch: Vec<i16>,
}

impl SpatialMixer {
    pub fn new(volume: Arc<Volume>) -> Self {
        Self {
            volume,
            scratch: Vec::new(),
        }
    }

    /// Per-block stereo gains from the source location:
    /// pan from the azimuth, attenuation from the planar distance, both
    /// scaled by the location confidence and the output volume.
    pub fn gains(&self, location: &SoundLocation) -> (f32, f32) {
        let angle = location.y.atan2(location.x);
        let pan = (angle / PI).clamp(-1.0, 1.0);

        let distance = (location.x * location.x + location.y * location.y).sqrt();
        let attenuation = (1.0 / (1.0 + distance * 0.1)).clamp(0.1, 1.0);

        let scale = attenuation * location.confidence * self.volume.get();
        let left = ((1.0 - pan) * 0.5 + 0.5) * scale;
        let right = ((1.0 + pan) * 0.5 + 0.5) * scale;
        (left, right)
    }

    /// Render a mono block through the sink as interleaved (L, R) frames.
    /// A broken pipe resets the sink and carries on; any other sink
    /// failure propagates as a playback error.
    pub fn render(
        &mut self,
        mono: &[Sample],
        location: &SoundLocation,
        sink: &mut dyn PlaybackSink,
    ) -> Result<()> {
        let (gain_l, gain_r) = self.gains(location);

        self.scratch.resize(mono.len() * 2, 0);
        for (frame, &m) in self.scratch.chunks_exact_mut(2).zip(mono) {
            frame[0] = sample_to_pcm(m * gain_l);
            frame[1] = sample_to_pcm(m * gain_r);
        }

        match sink.write(&self.scratch) {
            Ok(_) => Ok(()),
            Err(SinkError::BrokenPipe) => {
                log::warn!("playback pipe broken, resetting sink");
                sink.reset()
            }
            Err(SinkError::Failed(message)) => Err(MicArrayError::Playback(message)),
        }
    }
}
