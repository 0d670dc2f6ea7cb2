//! Error taxonomy
//!
//! Every failure in the workspace maps onto one of these categories, each
//! with a stable negative code for embedders that consume numeric status.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MicArrayError {
    #[error("initialization failed: {0}")]
    Init(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("playback error: {0}")]
    Playback(String),

    #[error("allocation error: {0}")]
    Memory(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

impl MicArrayError {
    /// Stable numeric code. Success is represented by `Ok`, i.e. code 0.
    pub fn code(&self) -> i32 {
        match self {
            Self::Init(_) => -1,
            Self::Config(_) => -2,
            Self::Capture(_) => -3,
            Self::Playback(_) => -5,
            Self::Memory(_) => -6,
            Self::InvalidParameter(_) => -7,
        }
    }
}

pub type Result<T> = std::result::Result<T, MicArrayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(MicArrayError::Init("x".into()).code(), -1);
        assert_eq!(MicArrayError::Config("x".into()).code(), -2);
        assert_eq!(MicArrayError::Capture("x".into()).code(), -3);
        assert_eq!(MicArrayError::Playback("x".into()).code(), -5);
        assert_eq!(MicArrayError::Memory("x".into()).code(), -6);
        assert_eq!(MicArrayError::InvalidParameter("x".into()).code(), -7);
    }

    #[test]
    fn test_display_includes_detail() {
        let err = MicArrayError::Config("volume out of range".into());
        assert!(err.to_string().contains("volume out of range"));
    }
}
