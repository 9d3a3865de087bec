//! Wire shapes of the export envelope.
//!
//! ```json
//! {
//!   "places": [{ "id", "lat", "lng", "address", "createdAtISO", "note",
//!                "photos": [{ "id", "createdAtISO", "thumbDataURL", "photoPath" }] }],
//!   "routes": [{ "id", "date", "points": [{ "lat", "lng", "tISO", "gapBefore" }] }],
//!   "exportedAtISO": "...",
//!   "schemaVersion": 2
//! }
//! ```
//!
//! Envelopes are untrusted input, so almost every field tolerates absence,
//! and a `null` list or string reads as empty.
//! Exports from the single-photo era put `photoPath`/`thumbDataURL` on the
//! place itself and have no `photos` array.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracekit::RoutePoint;

use super::ExportOptions;
use crate::persistence::legacy_photo_id;
use crate::types::{RouteBucket, Snapshot};

/// Schema version assumed for envelopes that don't carry one.
const UNVERSIONED_SCHEMA: u32 = 1;

fn unversioned_schema() -> u32 {
    UNVERSIONED_SCHEMA
}

/// Read an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    #[serde(default, deserialize_with = "null_as_default")]
    pub places: Vec<ExportedPlace>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub routes: Vec<ExportedBucket>,
    #[serde(rename = "exportedAtISO", default = "Utc::now")]
    pub exported_at: DateTime<Utc>,
    #[serde(default = "unversioned_schema")]
    pub schema_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedPlace {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub address: String,
    #[serde(rename = "createdAtISO", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub photos: Vec<ExportedPhoto>,

    /// Single-photo era: archive path of the one photo
    #[serde(rename = "photoPath", default, skip_serializing_if = "Option::is_none")]
    pub legacy_photo_path: Option<String>,
    /// Single-photo era: preview of the one photo
    #[serde(rename = "thumbDataURL", default, skip_serializing_if = "Option::is_none")]
    pub legacy_thumb_data_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedPhoto {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "createdAtISO", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "thumbDataURL", default, skip_serializing_if = "Option::is_none")]
    pub thumb_data_url: Option<String>,
    #[serde(rename = "photoPath", default, skip_serializing_if = "Option::is_none")]
    pub photo_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedBucket {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Same as `id`; older exports may carry only this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub points: Vec<RoutePoint>,
}

// ============================================================================
// Place shapes
// ============================================================================

/// How an exported place carries its photos.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaceShape<'a> {
    Current(&'a [ExportedPhoto]),
    LegacySinglePhoto {
        photo_path: Option<&'a str>,
        thumb_data_url: Option<&'a str>,
    },
}

impl ExportedPlace {
    pub fn shape(&self) -> PlaceShape<'_> {
        let path = self.legacy_photo_path.as_deref().filter(|p| !p.is_empty());
        let thumb = self.legacy_thumb_data_url.as_deref().filter(|t| !t.is_empty());
        if self.photos.is_empty() && (path.is_some() || thumb.is_some()) {
            PlaceShape::LegacySinglePhoto {
                photo_path: path,
                thumb_data_url: thumb,
            }
        } else {
            PlaceShape::Current(&self.photos)
        }
    }

    /// The photo list in the current shape. A single-photo place yields one
    /// entry with a stable id derived from the place id.
    pub fn photo_entries(&self) -> Vec<ExportedPhoto> {
        match self.shape() {
            PlaceShape::Current(photos) => photos.to_vec(),
            PlaceShape::LegacySinglePhoto {
                photo_path,
                thumb_data_url,
            } => vec![ExportedPhoto {
                id: legacy_photo_id(&self.id),
                created_at: self.created_at,
                thumb_data_url: thumb_data_url.map(str::to_string),
                photo_path: photo_path.map(str::to_string),
            }],
        }
    }
}

impl ExportedBucket {
    pub fn into_bucket(self) -> RouteBucket {
        let id = if self.id.is_empty() {
            self.date.unwrap_or_default()
        } else {
            self.id
        };
        RouteBucket {
            id,
            points: self.points,
        }
    }
}

// ============================================================================
// Building
// ============================================================================

/// Archive path for a photo's original bytes.
pub fn media_path(place_id: &str, photo_id: &str) -> String {
    format!("media/{}/{}.jpg", place_id, photo_id)
}

/// Build the portable envelope for a snapshot.
///
/// Photos get a `photoPath` only when originals are requested and bytes
/// exist. Previews are dropped entirely when thumbnails are not requested.
pub fn build_envelope(snapshot: &Snapshot, options: &ExportOptions) -> ExportEnvelope {
    let places = snapshot
        .places
        .iter()
        .map(|place| ExportedPlace {
            id: place.id.clone(),
            lat: place.lat,
            lng: place.lng,
            address: place.address.clone(),
            created_at: Some(place.created_at),
            note: place.note.clone(),
            photos: place
                .photos
                .iter()
                .map(|photo| ExportedPhoto {
                    id: photo.id.clone(),
                    created_at: Some(photo.created_at),
                    thumb_data_url: if options.include_thumbnails {
                        photo.thumb_data_url.clone()
                    } else {
                        None
                    },
                    photo_path: (options.include_originals
                        && photo.blob.as_ref().is_some_and(|b| !b.is_empty()))
                    .then(|| media_path(&place.id, &photo.id)),
                })
                .collect(),
            legacy_photo_path: None,
            legacy_thumb_data_url: None,
        })
        .collect();

    let routes = snapshot
        .routes
        .iter()
        .map(|bucket| ExportedBucket {
            id: bucket.id.clone(),
            date: Some(bucket.id.clone()),
            points: bucket.points.clone(),
        })
        .collect();

    ExportEnvelope {
        places,
        routes,
        exported_at: snapshot.exported_at,
        schema_version: snapshot.schema_version,
    }
}
