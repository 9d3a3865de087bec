//! Day-bucketed route storage.

use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracekit::RoutePoint;

use super::{MetaKey, Store, StoreResult, format_timestamp, timestamp_or_now, touch_meta};
use crate::error::StoreError;
use crate::types::RouteBucket;

impl Store {
    /// Append one point to a day bucket, creating the bucket if needed.
    ///
    /// Fetch-tail, check, insert and meta update happen in one transaction,
    /// so rapid successive appends cannot lose or reorder points. A point
    /// older than the bucket's last point is rejected. Returns the bucket
    /// as it is after the append.
    pub fn append_route_point(&self, day_key: &str, point: &RoutePoint) -> StoreResult<RouteBucket> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let tail: Option<(i64, String)> = tx
            .query_row(
                "SELECT seq, recorded_at FROM route_points
                 WHERE day = ?1 ORDER BY seq DESC LIMIT 1",
                params![day_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let next_seq = match &tail {
            Some((seq, recorded_at)) => {
                let tail_time = timestamp_or_now(recorded_at, "route point");
                if point.timestamp < tail_time {
                    return Err(StoreError::NonChronological {
                        day: day_key.to_string(),
                        point: point.timestamp,
                        tail: tail_time,
                    });
                }
                seq + 1
            }
            None => {
                debug!("[Store] Creating route bucket {}", day_key);
                0
            }
        };

        insert_point(&tx, day_key, next_seq, point)?;
        touch_meta(&tx, MetaKey::Routes)?;
        let bucket = read_bucket(&tx, day_key)?;
        tx.commit()?;
        Ok(bucket)
    }

    /// Replace a whole bucket. Points are put in time order first.
    pub fn put_route_bucket(&self, bucket: &RouteBucket) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        write_bucket(&tx, bucket)?;
        touch_meta(&tx, MetaKey::Routes)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_route_bucket(&self, day_key: &str) -> StoreResult<Option<RouteBucket>> {
        let conn = self.lock()?;
        let bucket = read_bucket(&conn, day_key)?;
        Ok((!bucket.points.is_empty()).then_some(bucket))
    }

    /// All buckets, most recent day first.
    pub fn list_route_buckets(&self) -> StoreResult<Vec<RouteBucket>> {
        let conn = self.lock()?;
        read_all_buckets(&conn)
    }
}

fn insert_point(conn: &Connection, day_key: &str, seq: i64, point: &RoutePoint) -> StoreResult<()> {
    conn.prepare_cached(
        "INSERT INTO route_points (day, seq, lat, lng, recorded_at, gap_before)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?
    .execute(params![
        day_key,
        seq,
        point.lat,
        point.lng,
        format_timestamp(point.timestamp),
        point.gap_before,
    ])?;
    Ok(())
}

pub(super) fn write_bucket(conn: &Connection, bucket: &RouteBucket) -> StoreResult<()> {
    let mut points = bucket.points.clone();
    if !bucket.is_chronological() {
        warn!(
            "[Store] Bucket {} out of order, sorting {} points",
            bucket.id,
            points.len()
        );
        // Stable: equal timestamps keep their relative order
        points.sort_by_key(|p| p.timestamp);
    }

    conn.execute("DELETE FROM route_points WHERE day = ?1", params![bucket.id])?;
    for (seq, point) in points.iter().enumerate() {
        insert_point(conn, &bucket.id, seq as i64, point)?;
    }
    Ok(())
}

fn map_point(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<RoutePoint> {
    let recorded_at: String = row.get(offset + 2)?;
    Ok(RoutePoint::new(
        row.get(offset)?,
        row.get(offset + 1)?,
        timestamp_or_now(&recorded_at, "route point"),
        row.get(offset + 3)?,
    ))
}

fn read_bucket(conn: &Connection, day_key: &str) -> StoreResult<RouteBucket> {
    let mut stmt = conn.prepare_cached(
        "SELECT lat, lng, recorded_at, gap_before FROM route_points
         WHERE day = ?1 ORDER BY seq",
    )?;
    let points = stmt
        .query_map(params![day_key], |row| map_point(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(RouteBucket {
        id: day_key.to_string(),
        points,
    })
}

pub(super) fn read_all_buckets(conn: &Connection) -> StoreResult<Vec<RouteBucket>> {
    let mut stmt = conn.prepare(
        "SELECT day, lat, lng, recorded_at, gap_before FROM route_points
         ORDER BY day DESC, seq ASC",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, map_point(row, 1)?)))?;

    let mut buckets: Vec<RouteBucket> = Vec::new();
    for row in rows {
        let (day, point) = row?;
        match buckets.last_mut() {
            Some(bucket) if bucket.id == day => bucket.points.push(point),
            _ => buckets.push(RouteBucket {
                id: day,
                points: vec![point],
            }),
        }
    }
    Ok(buckets)
}
