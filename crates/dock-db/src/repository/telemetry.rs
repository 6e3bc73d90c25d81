//! # Telemetry Repositories (edge)
//!
//! Sensor readings and electricity records are upload queues with a
//! watermark acknowledgment:
//!
//! ```text
//!   id:    1   2   3   4   5   6   7
//!   sent:  ✓   ✓   ·   ·   ·   ·   ·
//!                  └─── batch ───┘
//!                  oldest N unsent (prefix of the pending set)
//!
//!   ack received → UPDATE ... SET sent = 1 WHERE id <= 5
//! ```
//! Ids come from AUTOINCREMENT, so they only grow and the batch is always a
//! prefix. Marking everything up to the last id is then the same as marking
//! exactly the batch.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::DbResult;
use dock_core::{ElectricityRecord, ElectricityView, SensorReading, SpotPoll};

// =============================================================================
// Sensor Readings
// =============================================================================

/// Queue of occupancy readings waiting to be reported.
pub struct ReadingRepository;

impl ReadingRepository {
    /// Appends a reading and returns its id.
    pub async fn insert(
        conn: &mut SqliteConnection,
        poll: &SpotPoll,
        taken_at: DateTime<Utc>,
    ) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO sensor_readings (spot_id, taken_at, is_occupied, battery_level, sent)
            VALUES (?1, ?2, ?3, ?4, 0)
            "#,
        )
        .bind(poll.spot_id)
        .bind(taken_at)
        .bind(poll.is_occupied)
        .bind(poll.battery_level)
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// The oldest `limit` unsent readings, ascending by id.
    pub async fn oldest_unsent(conn: &mut SqliteConnection, limit: u32) -> DbResult<Vec<SensorReading>> {
        let rows = sqlx::query_as::<_, SensorReading>(
            r#"
            SELECT id, spot_id, taken_at, is_occupied, battery_level, sent
            FROM sensor_readings
            WHERE sent = 0
            ORDER BY id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// Watermark acknowledgment: every row with `id <= last_id` is sent.
    pub async fn mark_sent_up_to(conn: &mut SqliteConnection, last_id: i64) -> DbResult<u64> {
        let result = sqlx::query("UPDATE sensor_readings SET sent = 1 WHERE id <= ?1 AND sent = 0")
            .bind(last_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_unsent(conn: &mut SqliteConnection) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sensor_readings WHERE sent = 0")
            .fetch_one(&mut *conn)
            .await?;
        Ok(count)
    }

    /// Deletes readings the cloud already has.
    pub async fn delete_sent(conn: &mut SqliteConnection) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM sensor_readings WHERE sent = 1")
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

// =============================================================================
// Electricity Records
// =============================================================================

/// Queue of electricity splits waiting to be reported.
pub struct ElectricityRepository;

impl ElectricityRepository {
    pub async fn insert(
        conn: &mut SqliteConnection,
        view: &ElectricityView,
        recorded_at: DateTime<Utc>,
    ) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO electricity_records (
                recorded_at, production, feed_in, self_consumption,
                consumption_saving, feed_in_revenue, sent
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
            "#,
        )
        .bind(recorded_at)
        .bind(view.production)
        .bind(view.feed_in)
        .bind(view.self_consumption)
        .bind(view.consumption_saving)
        .bind(view.feed_in_revenue)
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn oldest_unsent(
        conn: &mut SqliteConnection,
        limit: u32,
    ) -> DbResult<Vec<ElectricityRecord>> {
        let rows = sqlx::query_as::<_, ElectricityRecord>(
            r#"
            SELECT id, recorded_at, production, feed_in, self_consumption,
                   consumption_saving, feed_in_revenue, sent
            FROM electricity_records
            WHERE sent = 0
            ORDER BY id ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn mark_sent_up_to(conn: &mut SqliteConnection, last_id: i64) -> DbResult<u64> {
        let result =
            sqlx::query("UPDATE electricity_records SET sent = 1 WHERE id <= ?1 AND sent = 0")
                .bind(last_id)
                .execute(&mut *conn)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_sent(conn: &mut SqliteConnection) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM electricity_records WHERE sent = 1")
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig, Schema};
    use dock_core::Tariff;

    #[tokio::test]
    async fn test_watermark_marks_prefix_only() {
        let db = Database::new(DbConfig::in_memory(Schema::Edge)).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();

        for spot_id in 0..5 {
            let poll = SpotPoll {
                spot_id,
                is_occupied: spot_id % 2 == 0,
                battery_level: None,
            };
            ReadingRepository::insert(&mut conn, &poll, now).await.unwrap();
        }

        let batch = ReadingRepository::oldest_unsent(&mut conn, 3).await.unwrap();
        assert_eq!(batch.len(), 3);
        let last = batch.last().unwrap().id;

        assert_eq!(ReadingRepository::mark_sent_up_to(&mut conn, last).await.unwrap(), 3);
        assert_eq!(ReadingRepository::count_unsent(&mut conn).await.unwrap(), 2);

        // Replaying the acknowledgment changes nothing
        assert_eq!(ReadingRepository::mark_sent_up_to(&mut conn, last).await.unwrap(), 0);

        assert_eq!(ReadingRepository::delete_sent(&mut conn).await.unwrap(), 3);
        let rest = ReadingRepository::oldest_unsent(&mut conn, 10).await.unwrap();
        assert!(rest.iter().all(|r| r.id > last));
    }

    #[tokio::test]
    async fn test_electricity_queue() {
        let db = Database::new(DbConfig::in_memory(Schema::Edge)).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let view = ElectricityView::compute(
            2.0,
            3.0,
            Tariff {
                contract_price: 0.5,
                market_price: 0.3,
            },
        );

        let id = ElectricityRepository::insert(&mut conn, &view, Utc::now()).await.unwrap();
        let pending = ElectricityRepository::oldest_unsent(&mut conn, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].self_consumption, view.self_consumption);

        ElectricityRepository::mark_sent_up_to(&mut conn, id).await.unwrap();
        assert!(ElectricityRepository::oldest_unsent(&mut conn, 10).await.unwrap().is_empty());
    }
}
