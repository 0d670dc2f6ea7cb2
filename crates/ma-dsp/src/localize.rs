//! TDOA source localization
//!
//! Estimates pairwise time differences of arrival against microphone 0 by
//! normalized cross-correlation, gates on the average peak correlation, and
//! solves a linearized trilateration system for the source position.
//!
//! Planar arrays (every microphone in one plane, including the default
//! ring) make the z column of the system structurally zero; the solver then
//! falls back to the in-plane 2x2 system with z fixed at 0. Collinear
//! arrays fail the reduced system's pivot as well and yield the origin.

use ma_core::{MicArrayError, MicPosition, Result, Sample, SoundLocation, SPEED_OF_SOUND};

/// Hard cap on the correlation search radius, samples.
const MAX_DELAY_SAMPLES: usize = 1000;

/// Pivots below this magnitude mark the system degenerate.
const PIVOT_EPS: f32 = 1e-10;

#[derive(Debug, Clone)]
pub struct LocalizerConfig {
    /// Number of microphones in the array.
    pub num_microphones: usize,
    /// Explicit microphone positions in meters; `None` places an equally
    /// spaced ring of radius `mic_spacing` in the z = 0 plane.
    pub mic_positions: Option<Vec<MicPosition>>,
    /// Ring radius for the default geometry, meters.
    pub mic_spacing: f32,
    /// Capture sample rate, Hz.
    pub sample_rate: u32,
    /// Speed of sound, m/s; values <= 0 select the default.
    pub speed_of_sound: f32,
    /// Minimum number of samples required for a correlation pass.
    pub correlation_window: usize,
    /// Average-confidence gate below which no position is solved.
    pub min_confidence: f32,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            num_microphones: 8,
            mic_positions: None,
            mic_spacing: 0.015,
            sample_rate: 16_000,
            speed_of_sound: SPEED_OF_SOUND,
            correlation_window: 1024,
            min_confidence: 0.3,
        }
    }
}

/// TDOA + trilateration localizer.
pub struct Localizer {
    positions: Vec<MicPosition>,
    mic_spacing: f32,
    sample_rate: f32,
    speed_of_sound: f32,
    correlation_window: usize,
    min_confidence: f32,

    delays: Vec<f32>,
    confidences: Vec<f32>,
}

impl Localizer {
    pub fn new(config: &LocalizerConfig) -> Result<Self> {
        let m = config.num_microphones;
        if m == 0 || m > ma_core::MAX_MICROPHONES {
            return Err(MicArrayError::InvalidParameter(format!(
                "invalid microphone count: {m}"
            )));
        }
        if config.sample_rate == 0 {
            return Err(MicArrayError::InvalidParameter(
                "sample rate must be > 0".to_string(),
            ));
        }

        let positions = match &config.mic_positions {
            Some(positions) => {
                if positions.len() != m {
                    return Err(MicArrayError::InvalidParameter(format!(
                        "{} positions supplied for {} microphones",
                        positions.len(),
                        m
                    )));
                }
                positions.clone()
            }
            None => default_ring(m, config.mic_spacing),
        };

        let speed_of_sound = if config.speed_of_sound > 0.0 {
            config.speed_of_sound
        } else {
            SPEED_OF_SOUND
        };

        Ok(Self {
            positions,
            mic_spacing: config.mic_spacing,
            sample_rate: config.sample_rate as f32,
            speed_of_sound,
            correlation_window: config.correlation_window,
            min_confidence: config.min_confidence,
            delays: vec![0.0; m],
            confidences: vec![0.0; m],
        })
    }

    /// Estimate the source location from synchronized per-channel buffers.
    ///
    /// `samples` is the usable length of each lane. Returns the origin with
    /// zero confidence when the buffers are shorter than the correlation
    /// window, with the computed confidence when the correlation gate or
    /// the trilateration pivot fails, and with zero confidence when the
    /// input produces non-finite arithmetic.
    pub fn process(&mut self, lanes: &[Vec<Sample>], samples: usize) -> Result<SoundLocation> {
        let m = self.positions.len();
        if lanes.len() != m {
            return Err(MicArrayError::InvalidParameter(format!(
                "{} lanes supplied for {} microphones",
                lanes.len(),
                m
            )));
        }
        if samples < self.correlation_window || lanes.iter().any(|l| l.len() < samples) {
            return Ok(SoundLocation::origin(0.0));
        }

        let max_delay = delay_search_radius(
            self.mic_spacing,
            self.speed_of_sound,
            self.sample_rate,
        );

        let reference = &lanes[0][..samples];
        self.delays[0] = 0.0;
        self.confidences[0] = 1.0;

        for i in 1..m {
            let target = &lanes[i][..samples];
            let mut best_delay = 0isize;
            let mut best_correlation = -1.0f32;

            for delay in -(max_delay as isize)..=(max_delay as isize) {
                let correlation = cross_correlate(reference, target, delay);
                if correlation > best_correlation {
                    best_correlation = correlation;
                    best_delay = delay;
                }
            }

            self.delays[i] = best_delay as f32;
            self.confidences[i] = best_correlation;
        }

        let avg_confidence =
            self.confidences.iter().sum::<f32>() / self.confidences.len() as f32;
        if !avg_confidence.is_finite() {
            return Ok(SoundLocation::origin(0.0));
        }
        // Pathological input (non-finite samples) surfaces as failed
        // correlations; keep the reported confidence within [0, 1].
        let avg_confidence = avg_confidence.clamp(0.0, 1.0);
        if avg_confidence < self.min_confidence {
            return Ok(SoundLocation::origin(avg_confidence));
        }

        for delay in &mut self.delays {
            *delay /= self.sample_rate;
        }

        let location = match self.trilaterate() {
            Some((x, y, z)) => SoundLocation {
                x,
                y,
                z,
                confidence: avg_confidence,
            },
            None => SoundLocation::origin(avg_confidence),
        };

        if !location.is_finite() {
            return Ok(SoundLocation::origin(0.0));
        }
        Ok(location)
    }

    /// Linearized trilateration over pairs (0, i), i < 4. One equation per
    /// pair: `2*d . p = dd^2 - |d|^2` with `dd` the delay-implied distance
    /// difference. Returns `None` when the system is degenerate.
    fn trilaterate(&self) -> Option<(f32, f32, f32)> {
        let m = self.positions.len();
        let mut rows: Vec<[f32; 4]> = Vec::with_capacity(3);

        for i in 1..m.min(4) {
            let dx = self.positions[i].x - self.positions[0].x;
            let dy = self.positions[i].y - self.positions[0].y;
            let dz = self.positions[i].z - self.positions[0].z;
            let dd = self.delays[i] * self.speed_of_sound;

            rows.push([
                2.0 * dx,
                2.0 * dy,
                2.0 * dz,
                dd * dd - (dx * dx + dy * dy + dz * dz),
            ]);
        }

        let planar = rows.iter().all(|r| r[2].abs() < PIVOT_EPS);
        if planar {
            if rows.len() < 2 {
                return None;
            }
            let reduced = [
                [rows[0][0], rows[0][1], rows[0][3]],
                [rows[1][0], rows[1][1], rows[1][3]],
            ];
            let [x, y] = solve_2x2(reduced)?;
            Some((x, y, 0.0))
        } else {
            if rows.len() < 3 {
                return None;
            }
            let full = [rows[0], rows[1], rows[2]];
            let [x, y, z] = solve_3x3(full)?;
            Some((x, y, z))
        }
    }

    /// Replace the microphone positions; the count must be preserved.
    pub fn set_positions(&mut self, positions: &[MicPosition]) -> Result<()> {
        if positions.len() != self.positions.len() {
            return Err(MicArrayError::InvalidParameter(format!(
                "{} positions supplied for {} microphones",
                positions.len(),
                self.positions.len()
            )));
        }
        self.positions.copy_from_slice(positions);
        Ok(())
    }

    pub fn positions(&self) -> &[MicPosition] {
        &self.positions
    }

    /// Array self-calibration is not implemented; accepted for interface
    /// compatibility and always succeeds without touching any state.
    pub fn calibrate(&mut self, _calibration_lanes: &[Vec<Sample>]) -> Result<()> {
        Ok(())
    }
}

fn default_ring(num_microphones: usize, spacing_m: f32) -> Vec<MicPosition> {
    use std::f32::consts::PI;
    (0..num_microphones)
        .map(|i| {
            let angle = 2.0 * PI * i as f32 / num_microphones as f32;
            MicPosition::new(spacing_m * angle.cos(), spacing_m * angle.sin(), 0.0)
        })
        .collect()
}

/// Correlation search radius: round trip across the array at the speed of
/// sound, capped at `MAX_DELAY_SAMPLES`.
fn delay_search_radius(spacing_m: f32, speed_of_sound: f32, sample_rate: f32) -> usize {
    let radius = (2.0 * spacing_m / speed_of_sound * sample_rate).ceil() as usize;
    radius.min(MAX_DELAY_SAMPLES)
}

/// Normalized cross-correlation of two equal-length signals at an integer
/// lag, computed over the overlapping region only.
fn cross_correlate(sig1: &[Sample], sig2: &[Sample], delay: isize) -> f32 {
    let len = sig1.len();
    let lag = delay.unsigned_abs();
    if lag >= len {
        return 0.0;
    }

    let (s1, s2) = if delay >= 0 {
        (&sig1[..len - lag], &sig2[lag..])
    } else {
        (&sig1[lag..], &sig2[..len - lag])
    };

    let mut correlation = 0.0f32;
    let mut norm1 = 0.0f32;
    let mut norm2 = 0.0f32;
    for (&a, &b) in s1.iter().zip(s2) {
        correlation += a * b;
        norm1 += a * a;
        norm2 += b * b;
    }

    let denominator = (norm1 * norm2).sqrt();
    if denominator > 0.0 {
        correlation / denominator
    } else {
        0.0
    }
}

/// Gaussian elimination with partial pivoting, 2 unknowns.
fn solve_2x2(mut a: [[f32; 3]; 2]) -> Option<[f32; 2]> {
    if a[1][0].abs() > a[0][0].abs() {
        a.swap(0, 1);
    }
    if a[0][0].abs() < PIVOT_EPS {
        return None;
    }
    let factor = a[1][0] / a[0][0];
    for k in 0..3 {
        a[1][k] -= factor * a[0][k];
    }
    if a[1][1].abs() < PIVOT_EPS {
        return None;
    }

    let y = a[1][2] / a[1][1];
    let x = (a[0][2] - a[0][1] * y) / a[0][0];
    Some([x, y])
}

/// Gaussian elimination with partial pivoting, 3 unknowns.
fn solve_3x3(mut a: [[f32; 4]; 3]) -> Option<[f32; 3]> {
    for i in 0..3 {
        let mut max_row = i;
        for j in i + 1..3 {
            if a[j][i].abs() > a[max_row][i].abs() {
                max_row = j;
            }
        }
        if max_row != i {
            a.swap(i, max_row);
        }
        if a[i][i].abs() < PIVOT_EPS {
            return None;
        }
        for j in i + 1..3 {
            let factor = a[j][i] / a[i][i];
            for k in i..4 {
                a[j][k] -= factor * a[i][k];
            }
        }
    }

    let mut x = [0.0f32; 3];
    for i in (0..3).rev() {
        x[i] = a[i][3];
        for j in i + 1..3 {
            x[i] -= a[i][j] * x[j];
        }
        x[i] /= a[i][i];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine_lane(samples: usize, freq: f32, rate: f32, shift: f32) -> Vec<Sample> {
        (0..samples)
            .map(|t| (2.0 * std::f32::consts::PI * freq * (t as f32 - shift) / rate).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_cross_correlate_identical_peaks_at_zero_lag() {
        let lane = sine_lane(2048, 1000.0, 16000.0, 0.0);
        let at_zero = cross_correlate(&lane, &lane, 0);
        assert_relative_eq!(at_zero, 1.0, epsilon = 1e-5);
        assert!(cross_correlate(&lane, &lane, 4) < at_zero);
    }

    #[test]
    fn test_cross_correlate_recovers_shift() {
        let reference = sine_lane(2048, 400.0, 16000.0, 0.0);
        let shifted = sine_lane(2048, 400.0, 16000.0, 3.0);

        let mut best = (0isize, -1.0f32);
        for delay in -8..=8 {
            let r = cross_correlate(&reference, &shifted, delay);
            if r > best.1 {
                best = (delay, r);
            }
        }
        assert_eq!(best.0, 3);
        assert!(best.1 > 0.99);
    }

    #[test]
    fn test_short_input_yields_zero_confidence_origin() {
        let config = LocalizerConfig {
            num_microphones: 4,
            ..Default::default()
        };
        let mut localizer = Localizer::new(&config).unwrap();

        let lanes = vec![vec![0.1f32; 512]; 4];
        let location = localizer.process(&lanes, 512).unwrap();
        assert_eq!(location, SoundLocation::origin(0.0));
    }

    #[test]
    fn test_lane_count_mismatch_is_invalid() {
        let config = LocalizerConfig {
            num_microphones: 4,
            ..Default::default()
        };
        let mut localizer = Localizer::new(&config).unwrap();
        let lanes = vec![vec![0.0f32; 2048]; 3];
        assert!(matches!(
            localizer.process(&lanes, 2048),
            Err(MicArrayError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_set_positions_preserves_count() {
        let config = LocalizerConfig {
            num_microphones: 4,
            ..Default::default()
        };
        let mut localizer = Localizer::new(&config).unwrap();

        let three = vec![MicPosition::default(); 3];
        assert!(localizer.set_positions(&three).is_err());

        let four = vec![MicPosition::new(0.0, 0.0, 0.1); 4];
        assert!(localizer.set_positions(&four).is_ok());
        assert_eq!(localizer.positions()[0].z, 0.1);
    }

    #[test]
    fn test_non_finite_reference_yields_zero_confidence() {
        let config = LocalizerConfig {
            num_microphones: 4,
            ..Default::default()
        };
        let mut localizer = Localizer::new(&config).unwrap();

        // An overflowing reference lane poisons every pairwise correlation
        let mut lanes = vec![vec![0.5f32; 2048]; 4];
        lanes[0][100] = f32::INFINITY;
        let location = localizer.process(&lanes, 2048).unwrap();
        assert_eq!(location.confidence, 0.0);
        assert_eq!((location.x, location.y, location.z), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_calibrate_is_a_noop() {
        let config = LocalizerConfig::default();
        let mut localizer = Localizer::new(&config).unwrap();
        let before = localizer.positions().to_vec();
        localizer.calibrate(&[vec![0.0; 1024]]).unwrap();
        assert_eq!(localizer.positions(), &before[..]);
    }

    #[test]
    fn test_delay_search_radius_caps() {
        assert_eq!(delay_search_radius(0.015, 343.0, 16000.0), 2);
        assert_eq!(delay_search_radius(100.0, 343.0, 48000.0), MAX_DELAY_SAMPLES);
    }
}
