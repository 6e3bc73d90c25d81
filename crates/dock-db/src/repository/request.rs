//! # Reservation Request Repository (cloud)
//!
//! The cloud creates requests and learns their outcome from edge reports.
//! Only a request that is still `requested` may move to a terminal status,
//! so a replayed report cannot rewrite `confirmed_at`.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use dock_core::{RequestStatus, ReservationId, ReservationRequest, SpotId};

const COLUMNS: &str =
    "id, spot_id, duration_secs, created_at, status, confirmed_at, decided_at";

/// Cloud-side request storage.
pub struct RequestRepository;

impl RequestRepository {
    /// Creates a new request. The id is assigned by the store.
    pub async fn create(
        conn: &mut SqliteConnection,
        spot_id: SpotId,
        duration_secs: i64,
        created_at: DateTime<Utc>,
    ) -> DbResult<ReservationRequest> {
        let result = sqlx::query(
            r#"
            INSERT INTO reservation_requests (spot_id, duration_secs, created_at, status)
            VALUES (?1, ?2, ?3, 'requested')
            "#,
        )
        .bind(spot_id)
        .bind(duration_secs)
        .bind(created_at)
        .execute(&mut *conn)
        .await?;

        let id = result.last_insert_rowid();
        debug!(reservation_id = id, spot_id, duration_secs, "Created reservation request");

        Self::get(conn, id)
            .await?
            .ok_or_else(|| DbError::not_found("ReservationRequest", id))
    }

    pub async fn get(
        conn: &mut SqliteConnection,
        id: ReservationId,
    ) -> DbResult<Option<ReservationRequest>> {
        let sql = format!("SELECT {COLUMNS} FROM reservation_requests WHERE id = ?1");
        let row = sqlx::query_as::<_, ReservationRequest>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    /// All requests still waiting for an edge decision, oldest first.
    pub async fn requested_by_creation(
        conn: &mut SqliteConnection,
    ) -> DbResult<Vec<ReservationRequest>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM reservation_requests
             WHERE status = 'requested'
             ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, ReservationRequest>(&sql)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    /// `requested → confirmed` with the edge-supplied `confirmed_at`.
    pub async fn mark_confirmed(
        conn: &mut SqliteConnection,
        id: ReservationId,
        confirmed_at: DateTime<Utc>,
        decided_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reservation_requests SET
                status = 'confirmed',
                confirmed_at = ?2,
                decided_at = ?3
            WHERE id = ?1 AND status = 'requested'
            "#,
        )
        .bind(id)
        .bind(confirmed_at)
        .bind(decided_at)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `requested → rejected`. `confirmed_at` is never touched.
    pub async fn mark_rejected(
        conn: &mut SqliteConnection,
        id: ReservationId,
        decided_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reservation_requests SET
                status = 'rejected',
                decided_at = ?2
            WHERE id = ?1 AND status = 'requested'
            "#,
        )
        .bind(id)
        .bind(decided_at)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Terminal requests, candidates for garbage collection.
    pub async fn terminal(conn: &mut SqliteConnection) -> DbResult<Vec<ReservationRequest>> {
        let sql = format!("SELECT {COLUMNS} FROM reservation_requests WHERE status <> 'requested'");
        let rows = sqlx::query_as::<_, ReservationRequest>(&sql)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    pub async fn delete(conn: &mut SqliteConnection, id: ReservationId) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM reservation_requests WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn count_by_status(
        conn: &mut SqliteConnection,
        status: RequestStatus,
    ) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM reservation_requests WHERE status = ?1")
                .bind(status)
                .fetch_one(&mut *conn)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig, Schema};

    #[tokio::test]
    async fn test_ids_start_at_one_and_grow() {
        let db = Database::new(DbConfig::in_memory(Schema::Cloud)).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();

        let first = RequestRepository::create(&mut conn, 3, 30, now).await.unwrap();
        let second = RequestRepository::create(&mut conn, 4, 25, now).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.status, RequestStatus::Requested);
    }

    #[tokio::test]
    async fn test_decisions_apply_once() {
        let db = Database::new(DbConfig::in_memory(Schema::Cloud)).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(3);

        let req = RequestRepository::create(&mut conn, 3, 30, now).await.unwrap();

        assert!(RequestRepository::mark_confirmed(&mut conn, req.id, now, now).await.unwrap());
        assert!(!RequestRepository::mark_confirmed(&mut conn, req.id, later, later).await.unwrap());
        assert!(!RequestRepository::mark_rejected(&mut conn, req.id, later).await.unwrap());

        let stored = RequestRepository::get(&mut conn, req.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Confirmed);
        assert_eq!(stored.confirmed_at, Some(now));
        assert!(RequestRepository::requested_by_creation(&mut conn).await.unwrap().is_empty());
    }
}
