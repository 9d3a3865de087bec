use log::info;
use rusqlite::Connection;
use rusqlite_migration::{M, Migrations};

use crate::error::StoreError;

/// Schema version written by this build. Stored as SQLite `user_version`
/// and stamped on every export.
pub const SCHEMA_VERSION: u32 = 2;

/// v1: single-photo places. The inline photo columns stay in the table so
/// rows written back then can still be read and upgraded.
const V1_SINGLE_PHOTO: &str = r#"
    CREATE TABLE places (
        id TEXT PRIMARY KEY,
        lat REAL NOT NULL,
        lng REAL NOT NULL,
        address TEXT NOT NULL,
        created_at TEXT NOT NULL,
        note TEXT,
        photo_blob BLOB,
        thumb_data_url TEXT
    );
    CREATE INDEX idx_places_created_at ON places(created_at);

    -- One row per stored fix; seq orders points within a day
    CREATE TABLE route_points (
        day TEXT NOT NULL,
        seq INTEGER NOT NULL,
        lat REAL NOT NULL,
        lng REAL NOT NULL,
        recorded_at TEXT NOT NULL,
        gap_before INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (day, seq)
    );

    CREATE TABLE meta (
        key TEXT PRIMARY KEY,
        schema_version INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    );
"#;

/// v2: ordered multi-photo attachments.
const V2_PHOTOS: &str = r#"
    CREATE TABLE photos (
        place_id TEXT NOT NULL REFERENCES places(id) ON DELETE CASCADE,
        id TEXT NOT NULL,
        position INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        blob BLOB,
        thumb_data_url TEXT,
        PRIMARY KEY (place_id, id)
    );
    CREATE INDEX idx_photos_place_position ON photos(place_id, position);
"#;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(V1_SINGLE_PHOTO), M::up(V2_PHOTOS)])
}

/// Bring a connection up to [`SCHEMA_VERSION`].
pub fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    let before = user_version(conn)?;
    migrations().to_latest(conn)?;
    let after = user_version(conn)?;
    if before != after {
        info!("[Migrations] Schema upgraded from v{} to v{}", before, after);
    }
    Ok(())
}

/// The persisted schema version.
pub fn user_version(conn: &Connection) -> Result<u32, StoreError> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Apply only the single-photo schema. Used to reproduce databases written
/// before multi-photo support.
#[cfg(test)]
pub(crate) fn migrate_to_v1(conn: &mut Connection) -> Result<(), StoreError> {
    migrations().to_version(conn, 1)?;
    Ok(())
}
