//! ma-dsp: DSP processors for the micarray pipeline
//!
//! ## Modules
//! - `denoise` - Streaming STFT spectral subtraction with a trained noise
//!   profile (stationary background suppression, phase preserving)
//! - `localize` - Pairwise cross-correlation TDOA estimation and linear
//!   trilateration to a 3D source point with confidence

pub mod denoise;
pub mod localize;

pub use denoise::{DenoiseConfig, SpectralDenoiser};
pub use localize::{Localizer, LocalizerConfig};
