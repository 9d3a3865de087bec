//! Single-photo record upgrade.
//!
//! Rows written before multi-photo support carry one inline image and one
//! inline preview on the place itself. They are resolved here, once, into
//! the current shape. Nothing above the store ever sees the old layout.

use crate::types::{Photo, Place};

/// Id given to the photo synthesized from a single-photo record.
///
/// Stable, so reading the same old row twice yields the same photo.
pub fn legacy_photo_id(place_id: &str) -> String {
    format!("{}-legacy", place_id)
}

/// A place as found on disk (or in an old export).
#[derive(Debug, Clone, PartialEq)]
pub enum PlaceRecord {
    Current(Place),
    LegacySinglePhoto {
        /// Everything except the photo list, which is empty
        place: Place,
        blob: Option<Vec<u8>>,
        thumb_data_url: Option<String>,
    },
}

impl PlaceRecord {
    /// Classify a place read alongside its inline single-photo columns.
    ///
    /// A record is legacy only when it has no photo list and the inline
    /// columns actually hold something.
    pub fn from_parts(
        place: Place,
        inline_blob: Option<Vec<u8>>,
        inline_thumb: Option<String>,
    ) -> Self {
        let blob = inline_blob.filter(|b| !b.is_empty());
        let thumb_data_url = inline_thumb.filter(|t| !t.is_empty());
        if place.photos.is_empty() && (blob.is_some() || thumb_data_url.is_some()) {
            PlaceRecord::LegacySinglePhoto {
                place,
                blob,
                thumb_data_url,
            }
        } else {
            PlaceRecord::Current(place)
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, PlaceRecord::LegacySinglePhoto { .. })
    }

    /// Resolve into the current shape.
    pub fn upgrade(self) -> Place {
        match self {
            PlaceRecord::Current(place) => place,
            PlaceRecord::LegacySinglePhoto {
                mut place,
                blob,
                thumb_data_url,
            } => {
                place.photos = vec![Photo {
                    id: legacy_photo_id(&place.id),
                    created_at: place.created_at,
                    blob,
                    thumb_data_url,
                }];
                place
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_shape_is_unchanged() {
        let mut place = Place::new(35.0, 135.0, "Shibuya");
        place.note = Some("coffee".into());
        place.photos = vec![Photo::new(Some(vec![1, 2]), None), Photo::new(None, None)];

        let record = PlaceRecord::from_parts(place.clone(), None, None);
        assert!(!record.is_legacy());
        let upgraded = record.upgrade();
        assert_eq!(upgraded, place);

        // Running the upgrade again is still a no-op
        assert_eq!(PlaceRecord::from_parts(upgraded, None, None).upgrade(), place);
    }

    #[test]
    fn test_legacy_synthesizes_one_photo() {
        let place = Place::new(35.0, 135.0, "Shibuya");
        let record =
            PlaceRecord::from_parts(place.clone(), Some(vec![9; 16]), Some("data:x".into()));
        assert!(record.is_legacy());

        let upgraded = record.upgrade();
        assert_eq!(upgraded.photos.len(), 1);
        let photo = &upgraded.photos[0];
        assert_eq!(photo.id, format!("{}-legacy", place.id));
        assert_eq!(photo.created_at, place.created_at);
        assert_eq!(photo.blob.as_deref(), Some(&[9u8; 16][..]));
        assert_eq!(photo.thumb_data_url.as_deref(), Some("data:x"));
    }

    #[test]
    fn test_photo_list_wins_over_inline_columns() {
        let mut place = Place::new(35.0, 135.0, "x");
        place.photos = vec![Photo::new(None, Some("data:new".into()))];
        let record = PlaceRecord::from_parts(place, Some(vec![1]), Some("data:old".into()));
        assert!(!record.is_legacy());
        assert_eq!(record.upgrade().photos.len(), 1);
    }

    #[test]
    fn test_empty_inline_columns_are_not_legacy() {
        let place = Place::new(35.0, 135.0, "x");
        let record = PlaceRecord::from_parts(place, Some(vec![]), Some(String::new()));
        assert!(!record.is_legacy());
        assert!(record.upgrade().photos.is_empty());
    }
}
