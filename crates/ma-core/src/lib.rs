//! ma-core: Shared types for the micarray workspace
//!
//! Provides the foundational types used across all micarray crates:
//! - `Sample` and 16-bit PCM conversion helpers
//! - `SoundLocation` / `MicPosition` geometry types
//! - `MicArrayError` taxonomy with stable numeric codes
//! - `ArrayConfig` configuration surface with defaults and validation

mod config;
mod error;
mod location;
mod sample;

pub use config::*;
pub use error::*;
pub use location::*;
pub use sample::*;

/// Maximum number of microphones in an array.
pub const MAX_MICROPHONES: usize = 16;

/// Maximum per-channel frame-block size in samples.
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Default capture sample rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Speed of sound in air at room temperature, m/s.
pub const SPEED_OF_SOUND: f32 = 343.0;

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
