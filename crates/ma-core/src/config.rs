//! Array configuration
//!
//! Consumed once at initialization; every field is fixed for the lifetime
//! of a session except `volume`, which has a runtime setter on the engine.
//! The on-disk format is JSON; missing keys take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{MicArrayError, Result, DEFAULT_SAMPLE_RATE, MAX_BUFFER_SIZE, MAX_MICROPHONES};

/// Full configuration surface of the array pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayConfig {
    /// Number of microphones, 1..=16.
    pub num_microphones: usize,
    /// Ring radius of the default array geometry, millimeters.
    pub mic_spacing: f32,
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Frame-block size per channel, samples, 1..=8192.
    pub dma_buffer_size: usize,
    /// Enable per-channel noise reduction.
    pub noise_reduction_enable: bool,
    /// SNR gate for spectral subtraction.
    pub noise_threshold: f32,
    /// Denoising algorithm name; `"spectral_subtraction"` is the only
    /// recognized value, anything else passes audio through unchanged.
    pub algorithm: String,
    /// Output volume, 0.0..=1.0.
    pub volume: f32,
    /// Playback device name; `None` selects the system default.
    pub output_device: Option<String>,
    /// Capture device name; `None` selects the system default.
    pub input_device: Option<String>,
    /// Log level hint for the embedding binary (DEBUG/INFO/WARN/ERROR).
    pub log_level: String,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            num_microphones: 8,
            mic_spacing: 15.0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            dma_buffer_size: 1024,
            noise_reduction_enable: true,
            noise_threshold: 0.05,
            algorithm: "spectral_subtraction".to_string(),
            volume: 0.8,
            output_device: None,
            input_device: None,
            log_level: "INFO".to_string(),
        }
    }
}

impl ArrayConfig {
    /// Load a configuration file, falling back to defaults for absent keys.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            MicArrayError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            MicArrayError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all fields against their allowed ranges.
    pub fn validate(&self) -> Result<()> {
        if self.num_microphones < 1 || self.num_microphones > MAX_MICROPHONES {
            return Err(MicArrayError::Config(format!(
                "invalid number of microphones: {} (must be 1-{})",
                self.num_microphones, MAX_MICROPHONES
            )));
        }
        if self.mic_spacing <= 0.0 || !self.mic_spacing.is_finite() {
            return Err(MicArrayError::Config(format!(
                "invalid microphone spacing: {} (must be > 0)",
                self.mic_spacing
            )));
        }
        if self.dma_buffer_size == 0 || self.dma_buffer_size > MAX_BUFFER_SIZE {
            return Err(MicArrayError::Config(format!(
                "invalid DMA buffer size: {} (must be 1-{})",
                self.dma_buffer_size, MAX_BUFFER_SIZE
            )));
        }
        if self.sample_rate == 0 {
            return Err(MicArrayError::Config(format!(
                "invalid sample rate: {} (must be > 0)",
                self.sample_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(MicArrayError::Config(format!(
                "invalid volume: {} (must be 0.0-1.0)",
                self.volume
            )));
        }
        Ok(())
    }

    /// Log a one-time configuration summary at startup.
    pub fn log_summary(&self) {
        log::info!(
            "config: {} mics, {:.1}mm spacing, {} Hz, {}-sample blocks",
            self.num_microphones,
            self.mic_spacing,
            self.sample_rate,
            self.dma_buffer_size
        );
        log::info!(
            "config: noise reduction {} (threshold {:.3}, algorithm {}), volume {:.1}",
            if self.noise_reduction_enable {
                "enabled"
            } else {
                "disabled"
            },
            self.noise_threshold,
            self.algorithm,
            self.volume
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ArrayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.num_microphones, 8);
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.algorithm, "spectral_subtraction");
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let mut config = ArrayConfig {
            num_microphones: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(MicArrayError::Config(_))
        ));

        config.num_microphones = 17;
        assert!(config.validate().is_err());

        config = ArrayConfig {
            mic_spacing: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config = ArrayConfig {
            dma_buffer_size: 8193,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config = ArrayConfig {
            volume: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip_with_partial_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{{\"num_microphones\": 4, \"mic_spacing\": 30.0, \"volume\": 0.5}}"
        )
        .unwrap();

        let config = ArrayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.num_microphones, 4);
        assert_eq!(config.mic_spacing, 30.0);
        assert_eq!(config.volume, 0.5);
        // Absent keys fall back to defaults
        assert_eq!(config.dma_buffer_size, 1024);
        assert!(config.noise_reduction_enable);
    }

    #[test]
    fn test_file_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"volume\": 2.0}}").unwrap();
        assert!(ArrayConfig::from_file(file.path()).is_err());

        assert!(ArrayConfig::from_file("/nonexistent/micarray.json").is_err());
    }
}
