//! Pipeline engine
//!
//! The driver owning the capture -> process -> playback pipeline: the
//! capture ring, the per-channel lanes and current location behind the
//! data mutex, one denoiser per channel, the localizer, the spatial mixer,
//! the playback sink, and the processing worker thread.
//!
//! Lock discipline: the ring's internal mutex and the data mutex are the
//! only two locks, never held together. The capture callback touches only
//! the ring; the worker pops a full frame-block, then takes the data mutex
//! for de-interleave, denoise, localize, and downmix; rendering happens
//! outside any lock. `current_location` copies under the data mutex, so
//! readers never observe a torn value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use ma_core::{pcm_to_sample, ArrayConfig, MicArrayError, Result, Sample, SoundLocation};
use ma_dsp::{DenoiseConfig, Localizer, LocalizerConfig, SpectralDenoiser};

use crate::capture::{CaptureSource, ChunkCallback};
use crate::mixer::{SpatialMixer, Volume};
use crate::playback::PlaybackSink;
use crate::ring::CaptureRing;

/// STFT frame size used by the per-channel denoisers.
const DENOISE_FRAME: usize = 1024;
/// Correlation window required by the localizer.
const CORRELATION_WINDOW: usize = 1024;
/// Frame-blocks of headroom in the capture ring.
const RING_BLOCKS: usize = 4;

/// State guarded by the data mutex.
struct PipelineState {
    lanes: Vec<Vec<Sample>>,
    location: SoundLocation,
    denoisers: Vec<SpectralDenoiser>,
    localizer: Localizer,
}

/// Everything the worker thread owns while running.
struct WorkerContext {
    ring: Arc<CaptureRing>,
    shared: Arc<Mutex<PipelineState>>,
    running: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<MicArrayError>>>,
    mixer: SpatialMixer,
    sink: Box<dyn PlaybackSink>,
    channels: usize,
    block: usize,
}

/// Microphone-array processing engine.
///
/// Owns every buffer and thread for the lifetime of a session; `stop` is
/// idempotent and `Drop` stops the pipeline.
pub struct MicArray {
    config: ArrayConfig,
    ring: Arc<CaptureRing>,
    shared: Arc<Mutex<PipelineState>>,
    volume: Arc<Volume>,
    running: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<MicArrayError>>>,
    source: Box<dyn CaptureSource>,
    sink: Option<Box<dyn PlaybackSink>>,
    worker: Option<JoinHandle<Box<dyn PlaybackSink>>>,
}

impl MicArray {
    /// Build the pipeline from a validated configuration, a capture
    /// producer, and a playback sink. All buffers and DSP state are
    /// allocated here; failures roll back automatically.
    pub fn new(
        config: ArrayConfig,
        source: Box<dyn CaptureSource>,
        sink: Box<dyn PlaybackSink>,
    ) -> Result<Self> {
        config.validate()?;
        config.log_summary();

        let channels = config.num_microphones;
        let block = config.dma_buffer_size;

        let denoisers = if config.noise_reduction_enable {
            let denoise_config = DenoiseConfig {
                frame_size: DENOISE_FRAME,
                overlap: DENOISE_FRAME / 2,
                noise_threshold: config.noise_threshold,
                algorithm: config.algorithm.clone(),
                ..Default::default()
            };
            (0..channels)
                .map(|_| SpectralDenoiser::new(&denoise_config))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let localizer = Localizer::new(&LocalizerConfig {
            num_microphones: channels,
            mic_positions: Some(ma_core::ring_positions(channels, config.mic_spacing)),
            mic_spacing: config.mic_spacing / 1000.0,
            sample_rate: config.sample_rate,
            correlation_window: CORRELATION_WINDOW,
            ..Default::default()
        })?;

        let shared = Arc::new(Mutex::new(PipelineState {
            lanes: vec![vec![0.0; block]; channels],
            location: SoundLocation::default(),
            denoisers,
            localizer,
        }));

        Ok(Self {
            ring: Arc::new(CaptureRing::new(RING_BLOCKS * block * channels)),
            volume: Arc::new(Volume::new(config.volume)),
            shared,
            running: Arc::new(AtomicBool::new(false)),
            failure: Arc::new(Mutex::new(None)),
            source,
            sink: Some(sink),
            worker: None,
            config,
        })
    }

    /// Start capture and the processing worker. Idempotent.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        log::info!("starting microphone array processing");
        if self.sink.is_none() {
            return Err(MicArrayError::Init(
                "playback sink unavailable".to_string(),
            ));
        }

        self.failure.lock().take();
        self.ring.clear();
        for denoiser in &mut self.shared.lock().denoisers {
            denoiser.reset();
        }
        self.running.store(true, Ordering::Release);

        let ring = Arc::clone(&self.ring);
        let channels = self.config.num_microphones;
        let callback: ChunkCallback = Box::new(move |chunk: &[i16]| {
            // The de-interleaver mirrors interleaving only when chunk
            // lengths are a multiple of the channel count.
            debug_assert_eq!(
                chunk.len() % channels,
                0,
                "capture chunk length must be a multiple of the channel count"
            );
            let usable = chunk.len() - chunk.len() % channels;
            if usable < chunk.len() {
                log::warn!(
                    "capture chunk of {} samples is not a multiple of {} channels, truncating",
                    chunk.len(),
                    channels
                );
            }
            if usable > 0 {
                let accepted = ring.push(&chunk[..usable]);
                if accepted < usable {
                    log::trace!("capture overrun: dropped {} samples", usable - accepted);
                }
            }
        });

        if let Err(e) = self.source.start(callback) {
            self.running.store(false, Ordering::Release);
            return Err(e);
        }

        let sink = self
            .sink
            .take()
            .ok_or_else(|| MicArrayError::Init("playback sink unavailable".to_string()))?;

        let context = WorkerContext {
            ring: Arc::clone(&self.ring),
            shared: Arc::clone(&self.shared),
            running: Arc::clone(&self.running),
            failure: Arc::clone(&self.failure),
            mixer: SpatialMixer::new(Arc::clone(&self.volume)),
            sink,
            channels,
            block: self.config.dma_buffer_size,
        };

        match thread::Builder::new()
            .name("micarray-dsp".to_string())
            .spawn(move || worker_loop(context))
        {
            Ok(handle) => {
                self.worker = Some(handle);
                log::info!("microphone array processing started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                let _ = self.source.stop();
                Err(MicArrayError::Init(format!(
                    "failed to spawn processing thread: {e}"
                )))
            }
        }
    }

    /// Stop the worker and capture. Idempotent; surfaces any error the
    /// worker recorded while running.
    pub fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);

        let had_worker = self.worker.is_some();
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(sink) => self.sink = Some(sink),
                Err(_) => {
                    return Err(MicArrayError::Init(
                        "processing thread panicked".to_string(),
                    ))
                }
            }
        }
        if had_worker {
            self.source.stop()?;
            log::info!("microphone array processing stopped");
        }

        if let Some(failure) = self.failure.lock().take() {
            return Err(failure);
        }
        Ok(())
    }

    /// Most recently computed source location, copied under the data mutex.
    pub fn current_location(&self) -> SoundLocation {
        self.shared.lock().location
    }

    /// Set the output volume, clamped to [0, 1]. Takes effect on the next
    /// rendered block.
    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    /// Update the denoisers' SNR gate.
    pub fn set_noise_threshold(&self, threshold: f32) {
        for denoiser in &mut self.shared.lock().denoisers {
            denoiser.set_noise_threshold(threshold);
        }
    }

    /// Train every channel's noise profile on a noise-only PCM segment.
    pub fn train_noise_profile(&self, noise: &[i16]) -> Result<()> {
        let samples: Vec<Sample> = noise.iter().map(|&s| pcm_to_sample(s)).collect();

        let mut state = self.shared.lock();
        if state.denoisers.is_empty() {
            log::warn!("noise reduction disabled, ignoring training segment");
            return Ok(());
        }
        for denoiser in &mut state.denoisers {
            if denoiser.train_noise_profile(&samples) == 0 {
                return Err(MicArrayError::InvalidParameter(
                    "noise segment shorter than one analysis frame".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Samples currently waiting in the capture ring.
    pub fn buffer_level(&self) -> usize {
        self.ring.level()
    }

    /// Samples dropped by the capture ring since the last start.
    pub fn dropped_samples(&self) -> u64 {
        self.ring.dropped()
    }

    /// Error recorded by the worker, if the pipeline stopped itself.
    pub fn last_error(&self) -> Option<MicArrayError> {
        self.failure.lock().clone()
    }

    pub fn config(&self) -> &ArrayConfig {
        &self.config
    }

    pub fn version() -> &'static str {
        ma_core::VERSION
    }
}

impl Drop for MicArray {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn worker_loop(mut ctx: WorkerContext) -> Box<dyn PlaybackSink> {
    log::info!("processing thread started");

    let frame_samples = ctx.block * ctx.channels;
    let mut chunk = vec![0i16; frame_samples];
    let mut mono = vec![0.0f32; ctx.block];

    while ctx.running.load(Ordering::Acquire) {
        if ctx.ring.level() >= frame_samples {
            let _popped = ctx.ring.pop(&mut chunk);
            debug_assert_eq!(_popped, frame_samples);

            let location = {
                let mut state = ctx.shared.lock();
                let state = &mut *state;

                // De-interleave: channel c owns interleaved positions
                // c, c + M, c + 2M, ..
                for (c, lane) in state.lanes.iter_mut().enumerate() {
                    for (j, sample) in lane.iter_mut().enumerate() {
                        *sample = pcm_to_sample(chunk[j * ctx.channels + c]);
                    }
                }

                for (lane, denoiser) in state.lanes.iter_mut().zip(&mut state.denoisers) {
                    denoiser.process_in_place(lane);
                }

                match state.localizer.process(&state.lanes, ctx.block) {
                    Ok(location) => {
                        state.location = location;
                        log::debug!(
                            "location: x={:.3} y={:.3} z={:.3} confidence={:.3}",
                            location.x,
                            location.y,
                            location.z,
                            location.confidence
                        );
                    }
                    Err(e) => log::error!("localization failed: {e}"),
                }

                for (j, out) in mono.iter_mut().enumerate() {
                    let mut sum = 0.0;
                    for lane in &state.lanes {
                        sum += lane[j];
                    }
                    *out = sum / ctx.channels as f32;
                }

                state.location
            };

            if let Err(e) = ctx.mixer.render(&mono, &location, ctx.sink.as_mut()) {
                log::error!("pipeline stopped by playback failure: {e}");
                *ctx.failure.lock() = Some(e);
                ctx.running.store(false, Ordering::Release);
                break;
            }
        }

        // Coarse pacing; the sink's blocking write is the rate limiter
        thread::sleep(Duration::from_millis(1));
    }

    log::info!("processing thread stopped");
    ctx.sink
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::SinkError;

    /// Capture double: hands the registered callback out so tests can
    /// feed chunks as if a device thread delivered them.
    struct TestSource {
        callback: Arc<Mutex<Option<ChunkCallback>>>,
        fail_start: bool,
    }

    impl TestSource {
        fn new() -> (Self, Arc<Mutex<Option<ChunkCallback>>>) {
            let callback = Arc::new(Mutex::new(None));
            (
                Self {
                    callback: Arc::clone(&callback),
                    fail_start: false,
                },
                callback,
            )
        }
    }

    impl CaptureSource for TestSource {
        fn start(&mut self, callback: ChunkCallback) -> Result<()> {
            if self.fail_start {
                return Err(MicArrayError::Capture("no such device".to_string()));
            }
            *self.callback.lock() = Some(callback);
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.callback.lock().take();
            Ok(())
        }
    }

    fn feed(callback: &Arc<Mutex<Option<ChunkCallback>>>, chunk: &[i16]) {
        if let Some(cb) = callback.lock().as_mut() {
            cb(chunk);
        }
    }

    /// Sink double collecting everything rendered.
    struct CollectSink {
        data: Arc<Mutex<Vec<i16>>>,
    }

    impl PlaybackSink for CollectSink {
        fn write(&mut self, frames: &[i16]) -> std::result::Result<usize, SinkError> {
            self.data.lock().extend_from_slice(frames);
            Ok(frames.len() / 2)
        }

        fn reset(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn small_config() -> ArrayConfig {
        ArrayConfig {
            num_microphones: 2,
            dma_buffer_size: 256,
            noise_reduction_enable: false,
            ..Default::default()
        }
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..400 {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_start_stop_idempotent() {
        let (source, _callback) = TestSource::new();
        let data = Arc::new(Mutex::new(Vec::new()));
        let sink = CollectSink {
            data: Arc::clone(&data),
        };

        let mut array =
            MicArray::new(small_config(), Box::new(source), Box::new(sink)).unwrap();
        assert!(!array.is_running());

        array.start().unwrap();
        assert!(array.is_running());
        array.start().unwrap();

        array.stop().unwrap();
        assert!(!array.is_running());
        array.stop().unwrap();

        // Restart after stop works
        array.start().unwrap();
        array.stop().unwrap();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (source, _callback) = TestSource::new();
        let sink = CollectSink {
            data: Arc::new(Mutex::new(Vec::new())),
        };
        let config = ArrayConfig {
            volume: 2.0,
            ..Default::default()
        };
        assert!(matches!(
            MicArray::new(config, Box::new(source), Box::new(sink)),
            Err(MicArrayError::Config(_))
        ));
    }

    #[test]
    fn test_failed_capture_start_rolls_back() {
        let (mut source, _callback) = TestSource::new();
        source.fail_start = true;
        let sink = CollectSink {
            data: Arc::new(Mutex::new(Vec::new())),
        };

        let mut array =
            MicArray::new(small_config(), Box::new(source), Box::new(sink)).unwrap();
        assert!(matches!(array.start(), Err(MicArrayError::Capture(_))));
        assert!(!array.is_running());
    }

    #[test]
    fn test_block_flows_through_pipeline() {
        let (source, callback) = TestSource::new();
        let data = Arc::new(Mutex::new(Vec::new()));
        let sink = CollectSink {
            data: Arc::clone(&data),
        };

        let mut array =
            MicArray::new(small_config(), Box::new(source), Box::new(sink)).unwrap();
        array.start().unwrap();

        // One full frame-block of interleaved samples across 2 channels
        let chunk = vec![1000i16; 256 * 2];
        feed(&callback, &chunk);

        assert!(
            wait_for(|| data.lock().len() >= 256 * 2),
            "no stereo frames rendered"
        );
        array.stop().unwrap();
        assert!(array.last_error().is_none());
    }

    #[test]
    fn test_ragged_chunk_is_truncated_not_fatal() {
        let (source, callback) = TestSource::new();
        let sink = CollectSink {
            data: Arc::new(Mutex::new(Vec::new())),
        };

        let mut array =
            MicArray::new(small_config(), Box::new(source), Box::new(sink)).unwrap();
        array.start().unwrap();

        // 7 samples across 2 channels: the trailing odd sample is dropped
        if cfg!(not(debug_assertions)) {
            feed(&callback, &[1i16; 7]);
            assert!(wait_for(|| array.buffer_level() == 6));
        }
        array.stop().unwrap();
    }

    #[test]
    fn test_worker_failure_surfaces_on_stop() {
        struct FailingSink;
        impl PlaybackSink for FailingSink {
            fn write(&mut self, _frames: &[i16]) -> std::result::Result<usize, SinkError> {
                Err(SinkError::Failed("device unplugged".to_string()))
            }
            fn reset(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let (source, callback) = TestSource::new();
        let mut array =
            MicArray::new(small_config(), Box::new(source), Box::new(FailingSink)).unwrap();
        array.start().unwrap();

        feed(&callback, &vec![500i16; 256 * 2]);
        assert!(wait_for(|| !array.is_running()));
        assert!(array.last_error().is_some());
        assert!(matches!(array.stop(), Err(MicArrayError::Playback(_))));
        // The failure is consumed; a second stop is clean
        array.stop().unwrap();
    }
}
