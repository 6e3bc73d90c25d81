//! # Reservation Repository (edge)
//!
//! Durable lifecycle of the reservations the edge has received.
//!
//! ## Transitions are conditional
//! ```text
//!   INSERT OR IGNORE            (re-delivered id → no-op)
//!        │
//!        ▼
//!   requested ── UPDATE ... WHERE status = 'requested' ──► confirmed
//!        │                                                 unfeasible
//!        ▼
//!   communicated = 1  only after the cloud acknowledged a report
//! ```
//! Every write is "set to X if not already terminal", so replaying the same
//! input twice leaves the table exactly as replaying it once.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;
use dock_core::{Reservation, ReservationId, ReservationStatus};

const COLUMNS: &str = r#"
    reservation_id, spot_id, duration_secs, created_at, received_at,
    status, confirmed_at, decided_at, communicated
"#;

/// Edge-side reservation storage.
pub struct ReservationRepository;

impl ReservationRepository {
    /// Stores a reservation unless its id is already known.
    ///
    /// ## Returns
    /// `true` when a new row was inserted.
    pub async fn insert_if_absent(
        conn: &mut SqliteConnection,
        reservation: &Reservation,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO reservations (
                reservation_id, spot_id, duration_secs, created_at, received_at,
                status, confirmed_at, decided_at, communicated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.spot_id)
        .bind(reservation.duration_secs)
        .bind(reservation.created_at)
        .bind(reservation.received_at)
        .bind(reservation.status)
        .bind(reservation.confirmed_at)
        .bind(reservation.decided_at)
        .bind(reservation.communicated)
        .execute(&mut *conn)
        .await?;

        let inserted = result.rows_affected() == 1;
        debug!(reservation_id = reservation.id, inserted, "Stored reservation");
        Ok(inserted)
    }

    /// Highest reservation id the edge has ever stored, 0 before the first.
    pub async fn highest_seen(conn: &mut SqliteConnection) -> DbResult<ReservationId> {
        let highest: Option<ReservationId> = sqlx::query_scalar(
            "SELECT highest_seen_id FROM reservation_watermark WHERE singleton = 1",
        )
        .fetch_optional(&mut *conn)
        .await?;
        Ok(highest.unwrap_or(0))
    }

    /// Raises the received-id watermark. Never lowers it.
    pub async fn record_seen(conn: &mut SqliteConnection, id: ReservationId) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reservation_watermark (singleton, highest_seen_id) VALUES (1, ?1)
            ON CONFLICT (singleton) DO UPDATE SET
                highest_seen_id = MAX(highest_seen_id, excluded.highest_seen_id)
            "#,
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn get(
        conn: &mut SqliteConnection,
        id: ReservationId,
    ) -> DbResult<Option<Reservation>> {
        let sql = format!("SELECT {COLUMNS} FROM reservations WHERE reservation_id = ?1");
        let row = sqlx::query_as::<_, Reservation>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row)
    }

    /// Undecided reservations in the order the edge received them.
    pub async fn pending_in_receipt_order(
        conn: &mut SqliteConnection,
    ) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM reservations
             WHERE status = 'requested'
             ORDER BY received_at ASC, reservation_id ASC"
        );
        let rows = sqlx::query_as::<_, Reservation>(&sql)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    /// `requested → confirmed`. Returns `false` if it was already terminal.
    pub async fn mark_confirmed(
        conn: &mut SqliteConnection,
        id: ReservationId,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reservations SET
                status = 'confirmed',
                confirmed_at = ?2,
                decided_at = ?2
            WHERE reservation_id = ?1 AND status = 'requested'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// `requested → unfeasible`. Returns `false` if it was already terminal.
    pub async fn mark_unfeasible(
        conn: &mut SqliteConnection,
        id: ReservationId,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE reservations SET
                status = 'unfeasible',
                decided_at = ?2
            WHERE reservation_id = ?1 AND status = 'requested'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Terminal reservations the cloud has not acknowledged yet.
    pub async fn undelivered_decisions(
        conn: &mut SqliteConnection,
    ) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM reservations
             WHERE communicated = 0 AND status <> 'requested'
             ORDER BY decided_at ASC, reservation_id ASC"
        );
        let rows = sqlx::query_as::<_, Reservation>(&sql)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    /// Marks the given terminal reservations as acknowledged by the cloud.
    pub async fn mark_communicated(
        conn: &mut SqliteConnection,
        ids: &[ReservationId],
    ) -> DbResult<u64> {
        let mut updated = 0;
        for id in ids {
            let result = sqlx::query(
                "UPDATE reservations SET communicated = 1
                 WHERE reservation_id = ?1 AND status <> 'requested'",
            )
            .bind(id)
            .execute(&mut *conn)
            .await?;
            updated += result.rows_affected();
        }
        Ok(updated)
    }

    /// Communicated terminal reservations, candidates for garbage collection.
    pub async fn communicated_terminal(
        conn: &mut SqliteConnection,
    ) -> DbResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM reservations
             WHERE communicated = 1 AND status <> 'requested'"
        );
        let rows = sqlx::query_as::<_, Reservation>(&sql)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows)
    }

    pub async fn delete(conn: &mut SqliteConnection, id: ReservationId) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM reservations WHERE reservation_id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn count_by_status(
        conn: &mut SqliteConnection,
        status: ReservationStatus,
    ) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE status = ?1")
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
    use chrono::Duration;

    async fn edge_db() -> Database {
        Database::new(DbConfig::in_memory(Schema::Edge)).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_if_absent_dedups_by_id() {
        let db = edge_db().await;
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();

        let first = Reservation::received(1, 3, 30, now, now);
        let replay = Reservation::received(1, 4, 99, now, now + Duration::seconds(5));

        assert!(ReservationRepository::insert_if_absent(&mut conn, &first).await.unwrap());
        assert!(!ReservationRepository::insert_if_absent(&mut conn, &replay).await.unwrap());

        let stored = ReservationRepository::get(&mut conn, 1).await.unwrap().unwrap();
        assert_eq!(stored.spot_id, 3);
        assert_eq!(stored.received_at, now);
    }

    #[tokio::test]
    async fn test_terminal_transition_happens_once() {
        let db = edge_db().await;
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();

        ReservationRepository::insert_if_absent(&mut conn, &Reservation::received(2, 1, 30, now, now))
            .await
            .unwrap();

        assert!(ReservationRepository::mark_confirmed(&mut conn, 2, now).await.unwrap());
        assert!(!ReservationRepository::mark_unfeasible(&mut conn, 2, now).await.unwrap());
        assert!(!ReservationRepository::mark_confirmed(&mut conn, 2, now).await.unwrap());

        let stored = ReservationRepository::get(&mut conn, 2).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Confirmed);
        assert_eq!(stored.confirmed_at, Some(now));
    }

    #[tokio::test]
    async fn test_unfeasible_has_no_confirmed_at() {
        let db = edge_db().await;
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();

        ReservationRepository::insert_if_absent(&mut conn, &Reservation::received(3, 1, 30, now, now))
            .await
            .unwrap();
        ReservationRepository::mark_unfeasible(&mut conn, 3, now).await.unwrap();

        let stored = ReservationRepository::get(&mut conn, 3).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Unfeasible);
        assert!(stored.confirmed_at.is_none());
    }

    #[tokio::test]
    async fn test_pending_in_receipt_order() {
        let db = edge_db().await;
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();

        for (id, offset) in [(10, 2), (11, 0), (12, 1)] {
            let at = now + Duration::seconds(offset);
            ReservationRepository::insert_if_absent(&mut conn, &Reservation::received(id, 0, 30, at, at))
                .await
                .unwrap();
        }

        let ids: Vec<_> = ReservationRepository::pending_in_receipt_order(&mut conn)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![11, 12, 10]);
    }

    #[tokio::test]
    async fn test_undelivered_until_communicated() {
        let db = edge_db().await;
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();

        for id in [1, 2, 3] {
            ReservationRepository::insert_if_absent(&mut conn, &Reservation::received(id, 0, 30, now, now))
                .await
                .unwrap();
        }
        ReservationRepository::mark_confirmed(&mut conn, 1, now).await.unwrap();
        ReservationRepository::mark_unfeasible(&mut conn, 2, now).await.unwrap();

        let undelivered = ReservationRepository::undelivered_decisions(&mut conn).await.unwrap();
        assert_eq!(undelivered.len(), 2);

        // The still-pending id 3 is never marked communicated
        let updated = ReservationRepository::mark_communicated(&mut conn, &[1, 2, 3])
            .await
            .unwrap();
        assert_eq!(updated, 2);
        assert!(ReservationRepository::undelivered_decisions(&mut conn)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_seen_watermark_only_rises() {
        let db = edge_db().await;
        let mut conn = db.acquire().await.unwrap();

        assert_eq!(ReservationRepository::highest_seen(&mut conn).await.unwrap(), 0);

        ReservationRepository::record_seen(&mut conn, 7).await.unwrap();
        ReservationRepository::record_seen(&mut conn, 3).await.unwrap();
        assert_eq!(ReservationRepository::highest_seen(&mut conn).await.unwrap(), 7);

        ReservationRepository::record_seen(&mut conn, 9).await.unwrap();
        assert_eq!(ReservationRepository::highest_seen(&mut conn).await.unwrap(), 9);
    }
}
