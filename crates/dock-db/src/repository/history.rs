//! # History Repository (cloud)
//!
//! Write-only audit log of every reading and electricity record the edge
//! reported. Keys are the edge's own ids, so a replayed report inserts
//! nothing new.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::DbResult;
use dock_core::{ElectricityView, SpotId};

pub struct HistoryRepository;

impl HistoryRepository {
    /// Returns `true` if the reading was new.
    pub async fn insert_reading(
        conn: &mut SqliteConnection,
        spot_id: SpotId,
        reading_id: i64,
        taken_at: DateTime<Utc>,
        is_occupied: bool,
        battery_level: Option<f64>,
        received_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO spot_history (
                spot_id, reading_id, taken_at, is_occupied, battery_level, received_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(spot_id)
        .bind(reading_id)
        .bind(taken_at)
        .bind(is_occupied)
        .bind(battery_level)
        .bind(received_at)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Returns `true` if the record was new.
    pub async fn insert_electricity(
        conn: &mut SqliteConnection,
        record_id: i64,
        recorded_at: DateTime<Utc>,
        view: &ElectricityView,
        received_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO electricity_history (
                record_id, recorded_at, production, feed_in, self_consumption,
                consumption_saving, feed_in_revenue, received_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(record_id)
        .bind(recorded_at)
        .bind(view.production)
        .bind(view.feed_in)
        .bind(view.self_consumption)
        .bind(view.consumption_saving)
        .bind(view.feed_in_revenue)
        .bind(received_at)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn count_readings(conn: &mut SqliteConnection) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM spot_history")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    pub async fn count_electricity(conn: &mut SqliteConnection) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM electricity_history")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }
}
