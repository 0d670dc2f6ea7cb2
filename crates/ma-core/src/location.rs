//! Source location and microphone geometry types

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Estimated 3D position of the dominant sound source, in meters relative
/// to the geometric centroid of the microphone array.
///
/// `confidence` is the average peak normalized cross-correlation across
/// the reference microphone pairs, in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SoundLocation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub confidence: f32,
}

impl SoundLocation {
    /// Origin with the given confidence (degenerate / low-confidence result).
    pub fn origin(confidence: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            confidence,
        }
    }

    /// Euclidean distance from the array centroid.
    pub fn distance(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// True when every field is a finite number.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.confidence.is_finite()
    }
}

/// Position of a single microphone, in meters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MicPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl MicPosition {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Default array geometry: an equally spaced ring of radius `spacing_mm`
/// millimeters in the z = 0 plane, microphone `i` at angle `2πi/M`.
pub fn ring_positions(num_microphones: usize, spacing_mm: f32) -> Vec<MicPosition> {
    let radius_m = spacing_mm / 1000.0;
    (0..num_microphones)
        .map(|i| {
            let angle = 2.0 * PI * i as f32 / num_microphones as f32;
            MicPosition::new(radius_m * angle.cos(), radius_m * angle.sin(), 0.0)
        })
        .collect()
}
