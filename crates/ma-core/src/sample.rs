//! Sample type and PCM conversion
//!
//! The wire format is signed 16-bit little-endian PCM. Inside the DSP path
//! samples are `f32` in [-1, 1]: divided by 32768 on input, clamped and
//! scaled by 32767 on output.

/// Internal audio sample type.
pub type Sample = f32;

/// Convert a 16-bit PCM sample to float in [-1, 1).
#[inline]
pub fn pcm_to_sample(s: i16) -> Sample {
    s as Sample / 32768.0
}

/// Convert a float sample to 16-bit PCM, clamping to [-1, 1].
#[inline]
pub fn sample_to_pcm(s: Sample) -> i16 {
    (s.clamp(-1.0, 1.0) * 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_round_trip_bounds() {
        assert_eq!(sample_to_pcm(0.0), 0);
        assert_eq!(sample_to_pcm(1.0), 32767);
        assert_eq!(sample_to_pcm(-1.0), -32767);
        // Out-of-range input clips instead of wrapping
        assert_eq!(sample_to_pcm(2.5), 32767);
        assert_eq!(sample_to_pcm(-2.5), -32767);
    }

    #[test]
    fn test_pcm_to_sample_scale() {
        assert!((pcm_to_sample(i16::MIN) + 1.0).abs() < 1e-6);
        assert!((pcm_to_sample(16384) - 0.5).abs() < 1e-6);
    }
}
