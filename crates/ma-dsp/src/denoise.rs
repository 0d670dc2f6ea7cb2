//! Spectral-subtraction denoiser
//!
//! Streaming STFT overlap-add processor that subtracts a learned stationary
//! noise magnitude spectrum from each frame, preserving phase. The noise
//! profile is trained on caller-supplied noise-only segments; until it is
//! trained the processor is a near-identity transform.
//!
//! Frames of `frame_size` samples are taken at hop `frame_size - overlap`,
//! Hann windowed on analysis and synthesis, and recombined by overlap-add
//! with a periodized window-sum correction so unity gain is exact once the
//! first frame's transient has passed.

use std::f32::consts::PI;
use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use ma_core::{MicArrayError, Result, Sample};

/// Epsilon guarding the SNR divide.
const SNR_EPS: f32 = 1e-10;

/// Overlap-sum values below this are left uncorrected (degenerate windows).
const OLA_NORM_FLOOR: f32 = 1e-3;

/// Denoiser parameters. All fields are fixed after construction except
/// `noise_threshold`, which has a runtime setter.
#[derive(Debug, Clone)]
pub struct DenoiseConfig {
    /// STFT frame size, power of two.
    pub frame_size: usize,
    /// Overlap between consecutive frames, `< frame_size`.
    pub overlap: usize,
    /// Over-subtraction factor.
    pub alpha: f32,
    /// Spectral floor applied to fully suppressed bins.
    pub beta: f32,
    /// SNR gate below which a bin is floored outright.
    pub noise_threshold: f32,
    /// Algorithm name; only `"spectral_subtraction"` is recognized.
    pub algorithm: String,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            overlap: 512,
            alpha: 2.0,
            beta: 0.1,
            noise_threshold: 0.05,
            algorithm: "spectral_subtraction".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algorithm {
    SpectralSubtraction,
    Passthrough,
}

impl Algorithm {
    fn parse(name: &str) -> Self {
        match name {
            "spectral_subtraction" => Self::SpectralSubtraction,
            other => {
                log::warn!("unknown noise reduction algorithm {other:?}, passing audio through");
                Self::Passthrough
            }
        }
    }
}

/// Streaming spectral-subtraction denoiser for one channel.
///
/// STFT state is per-instance; run one instance per channel.
pub struct SpectralDenoiser {
    frame_size: usize,
    overlap: usize,
    hop: usize,
    alpha: f32,
    beta: f32,
    noise_threshold: f32,
    algorithm: Algorithm,

    window: Vec<f32>,
    /// Periodized analysis-times-synthesis window sum over all hops,
    /// indexed by position within a hop.
    ola_norm: Vec<f32>,

    fft_forward: Arc<dyn RealToComplex<f32>>,
    fft_inverse: Arc<dyn ComplexToReal<f32>>,

    /// Input accumulator; `fill` samples are valid.
    accumulator: Vec<f32>,
    fill: usize,
    /// Saved tail of the previous synthesized frame.
    overlap_tail: Vec<f32>,

    // Scratch
    time_buf: Vec<f32>,
    spectrum: Vec<Complex<f32>>,

    noise_spectrum: Vec<f32>,
    noise_profile_ready: bool,
}

impl SpectralDenoiser {
    pub fn new(config: &DenoiseConfig) -> Result<Self> {
        if !config.frame_size.is_power_of_two() || config.frame_size < 2 {
            return Err(MicArrayError::InvalidParameter(format!(
                "frame size {} is not a power of two",
                config.frame_size
            )));
        }
        if config.overlap >= config.frame_size {
            return Err(MicArrayError::InvalidParameter(format!(
                "overlap {} must be smaller than the frame size {}",
                config.overlap, config.frame_size
            )));
        }
        if config.alpha < 0.0 || config.beta < 0.0 || !(0.0..=1.0).contains(&config.beta) {
            return Err(MicArrayError::InvalidParameter(
                "alpha must be >= 0 and beta within [0, 1]".to_string(),
            ));
        }

        let frame_size = config.frame_size;
        let hop = frame_size - config.overlap;
        let num_bins = frame_size / 2 + 1;

        let window: Vec<f32> = (0..frame_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (frame_size - 1) as f32).cos()))
            .collect();

        // Sum of window^2 contributions landing on each within-hop offset.
        let mut ola_norm = vec![0.0f32; hop];
        for (i, norm) in ola_norm.iter_mut().enumerate() {
            let mut pos = i;
            while pos < frame_size {
                *norm += window[pos] * window[pos];
                pos += hop;
            }
        }

        let mut planner = RealFftPlanner::<f32>::new();

        Ok(Self {
            frame_size,
            overlap: config.overlap,
            hop,
            alpha: config.alpha,
            beta: config.beta,
            noise_threshold: config.noise_threshold,
            algorithm: Algorithm::parse(&config.algorithm),
            window,
            ola_norm,
            fft_forward: planner.plan_fft_forward(frame_size),
            fft_inverse: planner.plan_fft_inverse(frame_size),
            accumulator: vec![0.0; frame_size],
            fill: 0,
            overlap_tail: vec![0.0; config.overlap],
            time_buf: vec![0.0; frame_size],
            spectrum: vec![Complex::default(); num_bins],
            noise_spectrum: vec![0.0; num_bins],
            noise_profile_ready: false,
        })
    }

    /// Process a buffer in place. Output samples are emitted one frame
    /// behind the input as the accumulator fills; positions not yet covered
    /// by a completed frame keep their input values.
    pub fn process_in_place(&mut self, data: &mut [Sample]) {
        if self.algorithm == Algorithm::Passthrough {
            return;
        }

        let mut processed = 0;
        while processed < data.len() {
            let to_copy = (data.len() - processed).min(self.frame_size - self.fill);
            self.accumulator[self.fill..self.fill + to_copy]
                .copy_from_slice(&data[processed..processed + to_copy]);
            self.fill += to_copy;
            processed += to_copy;

            if self.fill >= self.frame_size {
                self.process_frame();

                let start = processed - to_copy;
                let emit = self.hop.min(data.len() - start);
                for i in 0..emit {
                    let norm = self.ola_norm[i];
                    data[start + i] = if norm > OLA_NORM_FLOOR {
                        self.time_buf[i] / norm
                    } else {
                        self.time_buf[i]
                    };
                }

                self.overlap_tail
                    .copy_from_slice(&self.time_buf[self.hop..self.frame_size]);
                self.accumulator.copy_within(self.hop.., 0);
                self.fill -= self.hop;
            }
        }
    }

    /// Window, transform, subtract, inverse-transform, and overlap-add one
    /// frame from the accumulator into `time_buf`.
    fn process_frame(&mut self) {
        for i in 0..self.frame_size {
            self.time_buf[i] = self.accumulator[i] * self.window[i];
        }
        self.fft_forward
            .process(&mut self.time_buf, &mut self.spectrum)
            .ok();

        self.subtract_noise();

        // realfft requires purely real DC and Nyquist bins
        self.spectrum[0].im = 0.0;
        if let Some(last) = self.spectrum.last_mut() {
            last.im = 0.0;
        }

        self.fft_inverse
            .process(&mut self.spectrum, &mut self.time_buf)
            .ok();

        let scale = 1.0 / self.frame_size as f32;
        for i in 0..self.frame_size {
            self.time_buf[i] *= scale * self.window[i];
        }
        for i in 0..self.overlap {
            self.time_buf[i] += self.overlap_tail[i];
        }
    }

    /// Per-bin magnitude gain; phase is carried through untouched.
    fn subtract_noise(&mut self) {
        for (bin, &noise) in self.spectrum.iter_mut().zip(&self.noise_spectrum) {
            let mut magnitude = bin.norm();
            let phase = bin.arg();

            if self.noise_profile_ready {
                let snr = magnitude / (noise + SNR_EPS);
                let gain = if snr > self.noise_threshold {
                    1.0 - self.alpha * (noise / magnitude)
                } else {
                    self.beta
                };
                magnitude *= gain.max(self.beta).min(1.0);
            }

            *bin = Complex::from_polar(magnitude, phase);
        }
    }

    /// Train the noise profile on a noise-only segment: windows of
    /// `frame_size` samples at half-frame hop, magnitudes averaged per bin.
    /// Replaces any previous profile. Segments shorter than one frame are
    /// ignored. Returns the number of frames averaged.
    pub fn train_noise_profile(&mut self, noise: &[Sample]) -> usize {
        let frame = self.frame_size;
        let hop = frame / 2;

        let mut accumulated = vec![0.0f32; self.noise_spectrum.len()];
        let mut frames = 0usize;
        let mut offset = 0usize;

        while offset + frame <= noise.len() {
            for i in 0..frame {
                self.time_buf[i] = noise[offset + i] * self.window[i];
            }
            self.fft_forward
                .process(&mut self.time_buf, &mut self.spectrum)
                .ok();
            for (acc, bin) in accumulated.iter_mut().zip(&self.spectrum) {
                *acc += bin.norm();
            }
            frames += 1;
            offset += hop;
        }

        if frames > 0 {
            for (dst, acc) in self.noise_spectrum.iter_mut().zip(&accumulated) {
                *dst = acc / frames as f32;
            }
            self.noise_profile_ready = true;
        }
        frames
    }

    /// Update the SNR gate at runtime.
    pub fn set_noise_threshold(&mut self, threshold: f32) {
        self.noise_threshold = threshold;
    }

    pub fn noise_profile_ready(&self) -> bool {
        self.noise_profile_ready
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Clear streaming state (accumulator and overlap tail), keeping the
    /// trained profile.
    pub fn reset(&mut self) {
        self.accumulator.fill(0.0);
        self.overlap_tail.fill(0.0);
        self.fill = 0;
    }
}
