//! ma-audio: Audio I/O and the real-time processing pipeline
//!
//! Provides:
//! - `ring` - Mutex-serialized capture ring buffer with drop-on-overflow
//! - `capture` / `playback` - Device contracts and their cpal bindings
//! - `mixer` - Location-tracked stereo rendering with atomic volume
//! - `engine` - The three-stage pipeline driver (capture -> process ->
//!   playback) owning threads, buffers, and lifecycle

mod capture;
mod engine;
mod mixer;
mod playback;
mod ring;

pub use capture::*;
pub use engine::*;
pub use mixer::*;
pub use playback::*;
pub use ring::*;
