//! # Spot Cache Repository (cloud)
//!
//! The cloud's mirror of each spot. Merging and expiry are computed on
//! [`CachedSpot`] in dock-core; this repository only loads and stores it.

use sqlx::SqliteConnection;

use crate::error::DbResult;
use dock_core::{CachedSpot, SpotId};

const SELECT_CACHE: &str = r#"
    SELECT spot_id, is_occupied, battery_level, status, reservation_id,
           valid_from, duration_secs, last_reading_at
    FROM spot_cache
"#;

pub struct SpotCacheRepository;

impl SpotCacheRepository {
    /// Creates an empty row for every spot `0..spot_count` that is missing.
    pub async fn ensure_spots(conn: &mut SqliteConnection, spot_count: i64) -> DbResult<u64> {
        let mut created = 0;
        for spot_id in 0..spot_count {
            let result = sqlx::query("INSERT OR IGNORE INTO spot_cache (spot_id) VALUES (?1)")
                .bind(spot_id)
                .execute(&mut *conn)
                .await?;
            created += result.rows_affected();
        }
        Ok(created)
    }

    pub async fn get(conn: &mut SqliteConnection, spot_id: SpotId) -> DbResult<Option<CachedSpot>> {
        let sql = format!("{SELECT_CACHE} WHERE spot_id = ?1");
        let row = sqlx::query_as::<_, CachedSpot>(&sql)
            .bind(spot_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    pub async fn get_or_new(conn: &mut SqliteConnection, spot_id: SpotId) -> DbResult<CachedSpot> {
        Ok(Self::get(conn, spot_id)
            .await?
            .unwrap_or_else(|| CachedSpot::new(spot_id)))
    }

    pub async fn list(conn: &mut SqliteConnection) -> DbResult<Vec<CachedSpot>> {
        let sql = format!("{SELECT_CACHE} ORDER BY spot_id");
        let rows = sqlx::query_as::<_, CachedSpot>(&sql)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    pub async fn save(conn: &mut SqliteConnection, spot: &CachedSpot) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO spot_cache (
                spot_id, is_occupied, battery_level, status, reservation_id,
                valid_from, duration_secs, last_reading_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (spot_id) DO UPDATE SET
                is_occupied = excluded.is_occupied,
                battery_level = excluded.battery_level,
                status = excluded.status,
                reservation_id = excluded.reservation_id,
                valid_from = excluded.valid_from,
                duration_secs = excluded.duration_secs,
                last_reading_at = excluded.last_reading_at
            "#,
        )
        .bind(spot.spot_id)
        .bind(spot.is_occupied)
        .bind(spot.battery_level)
        .bind(spot.status)
        .bind(spot.reservation_id)
        .bind(spot.valid_from)
        .bind(spot.duration_secs)
        .bind(spot.last_reading_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
