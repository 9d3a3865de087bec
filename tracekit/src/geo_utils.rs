//! Geographic utilities.
//!
//! Pure functions with no state, safe to call from any thread.

use chrono::{DateTime, Utc};

use crate::{GpsPoint, TimedPoint};

/// Earth's mean radius in meters (spherical model).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Rendered by [`format_distance`] when the input is NaN or infinite.
pub const UNMEASURABLE: &str = "unmeasurable";

/// Great-circle distance between two points in meters (haversine formula).
///
/// Symmetric, and exactly zero for coincident points.
pub fn haversine_distance(a: &GpsPoint, b: &GpsPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    // Rounding can push h a hair above 1.0 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Human-readable approximate distance.
///
/// Below 1 km: whole meters (`~85m`). From 1 km: kilometers with one decimal
/// (`~1.3km`). Non-finite input renders as [`UNMEASURABLE`].
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() {
        return UNMEASURABLE.to_string();
    }
    if meters < 1000.0 {
        format!("~{}m", meters.round() as i64)
    } else {
        format!("~{:.1}km", meters / 1000.0)
    }
}

/// Sampling admission decision for the stored polyline.
///
/// With no previous point the sequence bootstraps and the point is stored.
/// Otherwise the point is stored when it moved at least `min_distance_meters`
/// OR at least `min_interval_ms` elapsed since `previous`.
pub fn should_store_point(
    previous: Option<&TimedPoint>,
    next: &TimedPoint,
    min_distance_meters: f64,
    min_interval_ms: i64,
) -> bool {
    let Some(previous) = previous else {
        return true;
    };

    if haversine_distance(&previous.point, &next.point) >= min_distance_meters {
        return true;
    }

    let elapsed = (next.timestamp_ms - previous.timestamp_ms).abs();
    elapsed >= min_interval_ms
}

/// Calendar-day bucket key (`YYYY-MM-DD`) for an instant, in UTC.
pub fn day_key(instant: DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d").to_string()
}

/// Total path length of a point sequence in meters.
pub fn path_length(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}
