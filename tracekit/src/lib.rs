//! # Tracekit
//!
//! Turns a noisy, push-based stream of GPS fixes into a clean, storable polyline.
//!
//! This library provides:
//! - Great-circle distance, distance formatting and day bucketing ([`geo_utils`])
//! - The jitter rejection applied to low-accuracy fixes ([`filter`])
//! - The `Idle`/`Tracking` recorder state machine that decides which fixes
//!   become [`RoutePoint`]s and where a new polyline segment starts ([`recorder`])
//!
//! Nothing in this crate performs I/O. The recorder returns decisions; the
//! caller owns persistence.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use tracekit::{Fix, RecorderConfig, TrackRecorder};
//!
//! let mut recorder = TrackRecorder::new(RecorderConfig::default());
//! recorder.start();
//!
//! let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
//! let outcome = recorder.handle_fix(Fix::new(35.6812, 139.7671, t0));
//!
//! // The first stored point of a session opens a new segment.
//! let point = outcome.stored.unwrap();
//! assert!(point.gap_before);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, TrackError};

// Geographic utilities (distance, formatting, sampling decision, day keys)
pub mod geo_utils;
pub use geo_utils::{day_key, format_distance, haversine_distance, should_store_point};

// Jitter rejection for low-accuracy fixes
pub mod filter;
pub use filter::{FilterTuning, NoiseFilter};

// Idle/Tracking state machine
pub mod recorder;
pub use recorder::{FixOutcome, RecorderConfig, RecorderState, TrackRecorder};

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude (decimal degrees, WGS84).
///
/// # Example
/// ```
/// use tracekit::GpsPoint;
/// let point = GpsPoint::new(35.681236, 139.767125); // Tokyo Station
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    /// Like [`GpsPoint::is_valid`], but reports the offending coordinates.
    pub fn validate(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(TrackError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

/// One raw position reading delivered by the positioning hardware.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub point: GpsPoint,
    /// Reported uncertainty radius in meters, when the source provides one
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            point: GpsPoint::new(latitude, longitude),
            accuracy: None,
            timestamp,
        }
    }

    pub fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy = Some(accuracy_meters);
        self
    }
}

/// A point paired with the time it was observed, used for sampling decisions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedPoint {
    pub point: GpsPoint,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
}

impl TimedPoint {
    pub fn new(point: GpsPoint, timestamp_ms: i64) -> Self {
        Self {
            point,
            timestamp_ms,
        }
    }
}

impl From<&Fix> for TimedPoint {
    fn from(fix: &Fix) -> Self {
        Self::new(fix.point, fix.timestamp.timestamp_millis())
    }
}

/// One recorded fix, as persisted in a day bucket. Immutable once written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "tISO")]
    pub timestamp: DateTime<Utc>,
    /// This point starts a new polyline segment (tracking resumed or discontinuity)
    #[serde(rename = "gapBefore", default)]
    pub gap_before: bool,
}

impl RoutePoint {
    pub fn new(lat: f64, lng: f64, timestamp: DateTime<Utc>, gap_before: bool) -> Self {
        Self {
            lat,
            lng,
            timestamp,
            gap_before,
        }
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.lat, self.lng)
    }

    /// Calendar-day bucket this point belongs to.
    pub fn day_key(&self) -> String {
        day_key(self.timestamp)
    }
}

/// Split a chronological point sequence into drawable segments at gap markers.
///
/// A segment never connects across a point with `gap_before`, so a paused
/// recording is not drawn as a straight line between the pause and resume spots.
pub fn split_segments(points: &[RoutePoint]) -> Vec<&[RoutePoint]> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (i, point) in points.iter().enumerate() {
        if point.gap_before && i > start {
            segments.push(&points[start..i]);
            start = i;
        }
    }
    if start < points.len() {
        segments.push(&points[start..]);
    }
    segments
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_554_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_gps_point_validation() {
        assert!(GpsPoint::new(35.681236, 139.767125).is_valid());
        assert!(!GpsPoint::new(91.0, 0.0).is_valid());
        assert!(!GpsPoint::new(0.0, 181.0).is_valid());
        assert!(!GpsPoint::new(f64::NAN, 0.0).is_valid());

        assert!(GpsPoint::new(-33.8688, 151.2093).validate().is_ok());
        assert_eq!(
            GpsPoint::new(95.0, 10.0).validate(),
            Err(TrackError::InvalidCoordinates {
                latitude: 95.0,
                longitude: 10.0
            })
        );
    }

    #[test]
    fn test_route_point_wire_names() {
        let point = RoutePoint::new(35.0, 135.0, at(0), true);
        let json = serde_json::to_value(point).unwrap();
        assert!(json.get("tISO").is_some());
        assert_eq!(json["gapBefore"], true);

        // gapBefore is optional on the wire
        let parsed: RoutePoint =
            serde_json::from_str(r#"{"lat":35.0,"lng":135.0,"tISO":"2024-05-01T09:00:00.000Z"}"#)
                .unwrap();
        assert!(!parsed.gap_before);
        assert_eq!(parsed.day_key(), "2024-05-01");
    }

    #[test]
    fn test_split_segments_at_gaps() {
        let points = vec![
            RoutePoint::new(35.0, 135.0, at(0), true),
            RoutePoint::new(35.001, 135.0, at(10), false),
            RoutePoint::new(35.002, 135.0, at(600), true),
            RoutePoint::new(35.003, 135.0, at(610), false),
            RoutePoint::new(35.004, 135.0, at(620), false),
        ];
        let segments = split_segments(&points);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 2);
        assert_eq!(segments[1].len(), 3);
    }

    #[test]
    fn test_split_segments_empty() {
        assert!(split_segments(&[]).is_empty());
    }
}
