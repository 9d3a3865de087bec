//! # Persistence Store
//!
//! SQLite-backed owner of the canonical places and route buckets.
//!
//! ## Layout
//!
//! - `places` + `photos`: one row per place, photos ordered by `position`.
//!   Single-photo rows from schema v1 are upgraded on every read ([`legacy`]).
//! - `route_points`: one row per stored fix, keyed by `(day, seq)` ([`routes`]).
//! - `meta`: `{schemaVersion, updatedAt}` per write stream.
//!
//! Every mutation runs in one SQLite transaction behind the connection mutex,
//! so read-modify-write sequences never interleave.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info, warn};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params, params_from_iter};

use crate::error::StoreError;
use crate::migrations::{self, SCHEMA_VERSION};
use crate::types::{Photo, Place};

pub mod legacy;
mod routes;
mod snapshot;

pub use legacy::{PlaceRecord, legacy_photo_id};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Meta bookkeeping
// ============================================================================

/// Write stream a meta record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaKey {
    Places,
    Routes,
    Import,
}

impl MetaKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaKey::Places => "places-meta",
            MetaKey::Routes => "routes-meta",
            MetaKey::Import => "import-meta",
        }
    }
}

/// When a stream was last written, and by which schema.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetaRecord {
    pub schema_version: u32,
    pub updated_at: DateTime<Utc>,
}

fn touch_meta(conn: &Connection, key: MetaKey) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO meta (key, schema_version, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET
            schema_version = excluded.schema_version,
            updated_at = excluded.updated_at",
        params![key.as_str(), SCHEMA_VERSION, format_timestamp(Utc::now())],
    )?;
    Ok(())
}

// ============================================================================
// Timestamps
// ============================================================================

/// Fixed-width RFC 3339 so text order matches time order.
pub(crate) fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn timestamp_or_now(raw: &str, what: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(|| {
        warn!("[Store] Unparseable {} timestamp '{}', using now", what, raw);
        Utc::now()
    })
}

// ============================================================================
// Store
// ============================================================================

/// The single owned handle to local storage.
///
/// Open once at startup and share behind an `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at `path` and migrate it to the current schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self::from_connection(conn)?;
        info!("[Store] Opened {}", path.as_ref().display());
        Ok(store)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// The persisted schema version.
    pub fn schema_version(&self) -> StoreResult<u32> {
        let conn = self.lock()?;
        migrations::user_version(&conn)
    }

    pub fn meta(&self, key: MetaKey) -> StoreResult<Option<MetaRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT schema_version, updated_at FROM meta WHERE key = ?1",
                params![key.as_str()],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(schema_version, updated_at)| MetaRecord {
            schema_version,
            updated_at: timestamp_or_now(&updated_at, "meta"),
        }))
    }

    // ========================================================================
    // Places
    // ========================================================================

    /// All places, most recently created first.
    pub fn get_all_places(&self) -> StoreResult<Vec<Place>> {
        let conn = self.lock()?;
        read_places(&conn, None)
    }

    pub fn get_place(&self, id: &str) -> StoreResult<Option<Place>> {
        let conn = self.lock()?;
        Ok(read_places(&conn, Some(id))?.pop())
    }

    /// Insert or replace a place. Missing identity fields are filled in;
    /// the stored form is returned.
    pub fn put_place(&self, place: &Place) -> StoreResult<Place> {
        let mut place = place.clone();
        place.apply_identity_defaults();

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        write_place(&tx, &place)?;
        touch_meta(&tx, MetaKey::Places)?;
        tx.commit()?;

        debug!(
            "[Store] Put place {} ({} photos)",
            place.id,
            place.photos.len()
        );
        Ok(place)
    }

    /// Read-modify-write a place inside one transaction.
    ///
    /// Concurrent edits (a note change racing a photo attach) serialize here
    /// instead of overwriting each other.
    pub fn update_place<F>(&self, id: &str, edit: F) -> StoreResult<Place>
    where
        F: FnOnce(&mut Place),
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut place = read_places(&tx, Some(id))?
            .pop()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        edit(&mut place);
        // The edit may not re-key the record
        place.id = id.to_string();
        place.apply_identity_defaults();

        write_place(&tx, &place)?;
        touch_meta(&tx, MetaKey::Places)?;
        tx.commit()?;
        Ok(place)
    }

    /// Delete a place and its photos. Returns whether it existed.
    pub fn delete_place(&self, id: &str) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM photos WHERE place_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM places WHERE id = ?1", params![id])?;
        touch_meta(&tx, MetaKey::Places)?;
        tx.commit()?;

        if removed > 0 {
            debug!("[Store] Deleted place {}", id);
        }
        Ok(removed > 0)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

type PlaceRow = (Place, Option<Vec<u8>>, Option<String>);

fn map_place_row(row: &Row<'_>) -> rusqlite::Result<PlaceRow> {
    let created_at: String = row.get(4)?;
    let place = Place {
        id: row.get(0)?,
        lat: row.get(1)?,
        lng: row.get(2)?,
        address: row.get(3)?,
        created_at: timestamp_or_now(&created_at, "place"),
        note: row.get(5)?,
        photos: Vec::new(),
    };
    Ok((place, row.get(6)?, row.get(7)?))
}

/// Read places (one, or all newest first), upgrading single-photo rows.
pub(crate) fn read_places(conn: &Connection, id: Option<&str>) -> StoreResult<Vec<Place>> {
    let sql = if id.is_some() {
        "SELECT id, lat, lng, address, created_at, note, photo_blob, thumb_data_url
         FROM places WHERE id = ?1"
    } else {
        "SELECT id, lat, lng, address, created_at, note, photo_blob, thumb_data_url
         FROM places ORDER BY created_at DESC, rowid DESC"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(id), map_place_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut photos = read_photos(conn, id)?;
    let places = rows
        .into_iter()
        .map(|(mut place, inline_blob, inline_thumb)| {
            place.photos = photos.remove(&place.id).unwrap_or_default();
            let record = PlaceRecord::from_parts(place, inline_blob, inline_thumb);
            if record.is_legacy() {
                debug!("[Store] Upgrading single-photo record on read");
            }
            record.upgrade()
        })
        .collect();
    Ok(places)
}

fn read_photos(
    conn: &Connection,
    place_id: Option<&str>,
) -> StoreResult<std::collections::HashMap<String, Vec<Photo>>> {
    let sql = if place_id.is_some() {
        "SELECT place_id, id, created_at, blob, thumb_data_url
         FROM photos WHERE place_id = ?1 ORDER BY position"
    } else {
        "SELECT place_id, id, created_at, blob, thumb_data_url
         FROM photos ORDER BY place_id, position"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(place_id), |row| {
        let created_at: String = row.get(2)?;
        Ok((
            row.get::<_, String>(0)?,
            Photo {
                id: row.get(1)?,
                created_at: timestamp_or_now(&created_at, "photo"),
                blob: row.get(3)?,
                thumb_data_url: row.get(4)?,
            },
        ))
    })?;

    let mut by_place: std::collections::HashMap<String, Vec<Photo>> =
        std::collections::HashMap::new();
    for row in rows {
        let (place_id, photo) = row?;
        by_place.entry(place_id).or_default().push(photo);
    }
    Ok(by_place)
}

/// Upsert a place and replace its photo list. Clears the single-photo
/// columns: once written in the current shape, a row stays current.
pub(crate) fn write_place(conn: &Connection, place: &Place) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO places (id, lat, lng, address, created_at, note, photo_blob, thumb_data_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL)
         ON CONFLICT(id) DO UPDATE SET
            lat = excluded.lat,
            lng = excluded.lng,
            address = excluded.address,
            created_at = excluded.created_at,
            note = excluded.note,
            photo_blob = NULL,
            thumb_data_url = NULL",
        params![
            place.id,
            place.lat,
            place.lng,
            place.address,
            format_timestamp(place.created_at),
            place.note,
        ],
    )?;

    conn.execute("DELETE FROM photos WHERE place_id = ?1", params![place.id])?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO photos (place_id, id, position, created_at, blob, thumb_data_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, photo) in place.photos.iter().enumerate() {
        stmt.execute(params![
            place.id,
            photo.id,
            position as i64,
            format_timestamp(photo.created_at),
            photo.blob,
            photo.thumb_data_url,
        ])?;
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
