//! App-layer types for persistence, export and sync.
//!
//! These are the canonical shapes the store hands out. Wire shapes (export
//! envelopes, legacy records) are converted into these at the boundary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracekit::geo_utils::path_length;
use tracekit::{GpsPoint, RoutePoint, split_segments};

// ============================================================================
// Places
// ============================================================================

/// A point of interest with its note and photos.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    /// Free text, possibly machine-geocoded
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub note: Option<String>,
    /// Capture order
    pub photos: Vec<Photo>,
}

impl Place {
    /// A fresh place with a generated id, stamped now.
    pub fn new(lat: f64, lng: f64, address: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            lat,
            lng,
            address: address.into(),
            created_at: Utc::now(),
            note: None,
            photos: Vec::new(),
        }
    }

    pub fn position(&self) -> GpsPoint {
        GpsPoint::new(self.lat, self.lng)
    }

    pub fn photo(&self, photo_id: &str) -> Option<&Photo> {
        self.photos.iter().find(|p| p.id == photo_id)
    }

    /// Fill in whatever identity a partially formed record is missing:
    /// id, address, photo ids (unique within the place). Blank notes become `None`.
    pub fn apply_identity_defaults(&mut self) {
        if self.id.trim().is_empty() {
            self.id = new_id();
        }
        if self.address.trim().is_empty() {
            self.address = crate::geocode::offline_address(self.lat, self.lng);
        }
        if self.note.as_deref().is_some_and(|n| n.trim().is_empty()) {
            self.note = None;
        }

        let mut seen = std::collections::HashSet::new();
        for photo in &mut self.photos {
            if photo.id.trim().is_empty() || !seen.insert(photo.id.clone()) {
                photo.id = new_id();
                seen.insert(photo.id.clone());
            }
        }
    }
}

/// One photo attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct Photo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Original-resolution image bytes
    pub blob: Option<Vec<u8>>,
    /// Cached small preview (`data:` URL)
    pub thumb_data_url: Option<String>,
}

impl Photo {
    pub fn new(blob: Option<Vec<u8>>, thumb_data_url: Option<String>) -> Self {
        Self {
            id: new_id(),
            created_at: Utc::now(),
            blob,
            thumb_data_url,
        }
    }

    /// Best available representation for display.
    pub fn display(&self) -> PhotoDisplay<'_> {
        if let Some(thumb) = self.thumb_data_url.as_deref().filter(|t| !t.is_empty()) {
            PhotoDisplay::Preview(thumb)
        } else if let Some(blob) = self.blob.as_deref().filter(|b| !b.is_empty()) {
            PhotoDisplay::Original(blob)
        } else {
            PhotoDisplay::Placeholder
        }
    }

    pub fn has_image(&self) -> bool {
        !matches!(self.display(), PhotoDisplay::Placeholder)
    }
}

/// How a photo can be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoDisplay<'a> {
    Preview(&'a str),
    Original(&'a [u8]),
    /// Neither bytes nor preview: render a "no image" tile
    Placeholder,
}

// ============================================================================
// Routes
// ============================================================================

/// All route points for one calendar day. Append-only, chronological.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteBucket {
    /// Day key, `YYYY-MM-DD`
    pub id: String,
    pub points: Vec<RoutePoint>,
}

impl RouteBucket {
    pub fn new(day_key: impl Into<String>) -> Self {
        Self {
            id: day_key.into(),
            points: Vec::new(),
        }
    }

    pub fn is_chronological(&self) -> bool {
        self.points
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    }

    /// Drawable segments, split at gap markers.
    pub fn segments(&self) -> Vec<&[RoutePoint]> {
        split_segments(&self.points)
    }

    /// Walked distance in meters, not counting jumps across gaps.
    pub fn distance_meters(&self) -> f64 {
        self.segments()
            .into_iter()
            .map(|segment| {
                let points: Vec<GpsPoint> = segment.iter().map(RoutePoint::point).collect();
                path_length(&points)
            })
            .sum()
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Everything the store holds, read in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Newest first
    pub places: Vec<Place>,
    /// Newest day first
    pub routes: Vec<RouteBucket>,
    pub exported_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl Snapshot {
    /// Keep only the selected places. `None` or an empty selection keeps everything.
    pub fn select_places(mut self, selected_ids: Option<&[String]>) -> Self {
        if let Some(ids) = selected_ids.filter(|ids| !ids.is_empty()) {
            self.places.retain(|place| ids.contains(&place.id));
        }
        self
    }
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
