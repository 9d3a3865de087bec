//! Error handling for the tracekit library.
//!
//! Validation failures for recorder configuration and incoming coordinates.
//! The per-fix pipeline itself never fails: bad input is rejected, not raised.

use std::fmt;

/// Unified error type for tracekit operations.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackError {
    /// Coordinates outside WGS84 ranges or non-finite
    InvalidCoordinates { latitude: f64, longitude: f64 },
    /// A sampling or filter threshold is negative or non-finite
    InvalidThreshold { name: &'static str, value: f64 },
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackError::InvalidCoordinates {
                latitude,
                longitude,
            } => {
                write!(
                    f,
                    "Invalid coordinates: lat {}, lng {}",
                    latitude, longitude
                )
            }
            TrackError::InvalidThreshold { name, value } => {
                write!(f, "Invalid threshold '{}': {}", name, value)
            }
        }
    }
}

impl std::error::Error for TrackError {}

/// Result type alias for tracekit operations.
pub type Result<T> = std::result::Result<T, TrackError>;

/// Check that a threshold is a finite, non-negative number.
pub(crate) fn check_threshold(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TrackError::InvalidThreshold { name, value })
    }
}
