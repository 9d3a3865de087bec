//! Whole-store reads and atomic replacement.

use chrono::Utc;
use log::info;
use rusqlite::TransactionBehavior;

use super::routes::{read_all_buckets, write_bucket};
use super::{MetaKey, Store, StoreResult, read_places, touch_meta, write_place};
use crate::error::StoreError;
use crate::migrations::SCHEMA_VERSION;
use crate::types::Snapshot;

impl Store {
    /// Read every place and bucket in one consistent pass.
    pub fn export_snapshot(&self) -> StoreResult<Snapshot> {
        let mut conn = self.lock()?;
        // Deferred read transaction: both reads see the same state
        let tx = conn.transaction()?;
        let places = read_places(&tx, None)?;
        let routes = read_all_buckets(&tx)?;
        tx.commit()?;

        Ok(Snapshot {
            places,
            routes,
            exported_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        })
    }

    /// Replace the entire store with `snapshot`.
    ///
    /// A snapshot from a newer schema is refused before anything is touched.
    /// Otherwise the clear and every write happen in one transaction: on any
    /// failure the previous contents remain.
    pub fn import_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        if snapshot.schema_version > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                found: snapshot.schema_version,
                supported: SCHEMA_VERSION,
            });
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(
            "DELETE FROM photos;
             DELETE FROM places;
             DELETE FROM route_points;",
        )?;

        for place in &snapshot.places {
            let mut place = place.clone();
            place.apply_identity_defaults();
            write_place(&tx, &place)?;
        }
        for bucket in &snapshot.routes {
            write_bucket(&tx, bucket)?;
        }
        touch_meta(&tx, MetaKey::Import)?;
        tx.commit()?;

        info!(
            "[Store] Imported {} places, {} route buckets",
            snapshot.places.len(),
            snapshot.routes.len()
        );
        Ok(())
    }

    /// Remove all places, buckets and meta records.
    pub fn clear_all(&self) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(
            "DELETE FROM photos;
             DELETE FROM places;
             DELETE FROM route_points;
             DELETE FROM meta;",
        )?;
        tx.commit()?;
        info!("[Store] Cleared all data");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Photo, Place, RouteBucket};
    use chrono::TimeZone;
    use tracekit::RoutePoint;

    fn seeded() -> Store {
        let store = Store::in_memory().unwrap();
        let mut place = Place::new(35.0, 135.0, "seed");
        place.photos = vec![Photo::new(Some(vec![1, 2, 3]), None)];
        store.put_place(&place).unwrap();
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        store
            .append_route_point("2024-05-01", &RoutePoint::new(35.0, 135.0, t, true))
            .unwrap();
        store
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let source = seeded();
        let snapshot = source.export_snapshot().unwrap();
        assert_eq!(snapshot.places.len(), 1);
        assert_eq!(snapshot.routes.len(), 1);
        assert_eq!(snapshot.schema_version, SCHEMA_VERSION);

        let target = Store::in_memory().unwrap();
        target
            .put_place(&Place::new(1.0, 1.0, "will be replaced"))
            .unwrap();
        target.import_snapshot(&snapshot).unwrap();

        assert_eq!(target.get_all_places().unwrap(), snapshot.places);
        assert_eq!(target.list_route_buckets().unwrap(), snapshot.routes);
        assert!(target.meta(MetaKey::Import).unwrap().is_some());
    }

    #[test]
    fn test_newer_schema_leaves_store_untouched() {
        let store = seeded();
        let before = store.export_snapshot().unwrap();

        let newer = Snapshot {
            places: vec![],
            routes: vec![],
            exported_at: Utc::now(),
            schema_version: SCHEMA_VERSION + 1,
        };
        assert!(matches!(
            store.import_snapshot(&newer),
            Err(StoreError::UnsupportedSchema { found, .. }) if found == SCHEMA_VERSION + 1
        ));

        let after = store.export_snapshot().unwrap();
        assert_eq!(after.places, before.places);
        assert_eq!(after.routes, before.routes);
    }

    #[test]
    fn test_failed_import_rolls_back() {
        let store = seeded();
        let before = store.export_snapshot().unwrap();

        // SQLite stores NaN as NULL, which the NOT NULL column refuses
        let good = Place::new(36.0, 136.0, "good");
        let bad = Place::new(f64::NAN, 136.0, "bad");
        let snapshot = Snapshot {
            places: vec![good, bad],
            routes: vec![RouteBucket::new("2024-06-01")],
            exported_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
        };
        assert!(store.import_snapshot(&snapshot).is_err());

        let after = store.export_snapshot().unwrap();
        assert_eq!(after.places, before.places);
        assert_eq!(after.routes, before.routes);
    }

    #[test]
    fn test_clear_all() {
        let store = seeded();
        store.clear_all().unwrap();
        assert!(store.get_all_places().unwrap().is_empty());
        assert!(store.list_route_buckets().unwrap().is_empty());
        assert!(store.meta(MetaKey::Places).unwrap().is_none());
    }
}
