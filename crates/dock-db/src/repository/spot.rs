//! # Spot State Repository (edge)
//!
//! Ground truth for each spot: occupancy, battery and the attached
//! reservation. The table's CHECK constraints refuse a reservation on an
//! empty spot, so the invariant holds even if a caller gets it wrong.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};

use crate::error::DbResult;
use dock_core::{ActiveReservation, ReservationId, SpotId, SpotState};

#[derive(Debug, FromRow)]
struct SpotRow {
    spot_id: i64,
    is_occupied: bool,
    battery_level: Option<f64>,
    active_reservation_id: Option<i64>,
    reservation_valid_from: Option<DateTime<Utc>>,
    reservation_duration_secs: Option<i64>,
    last_reservation_id: Option<i64>,
}

impl From<SpotRow> for SpotState {
    fn from(row: SpotRow) -> Self {
        let active = match (
            row.active_reservation_id,
            row.reservation_valid_from,
            row.reservation_duration_secs,
        ) {
            (Some(reservation_id), Some(valid_from), Some(duration_secs)) => {
                Some(ActiveReservation {
                    reservation_id,
                    valid_from,
                    duration_secs,
                })
            }
            _ => None,
        };

        SpotState {
            spot_id: row.spot_id,
            is_occupied: row.is_occupied,
            battery_level: row.battery_level,
            active,
            last_reservation_id: row.last_reservation_id,
        }
    }
}

const SELECT_SPOT: &str = r#"
    SELECT spot_id, is_occupied, battery_level, active_reservation_id,
           reservation_valid_from, reservation_duration_secs, last_reservation_id
    FROM spot_states
"#;

/// Edge-side spot storage.
pub struct SpotRepository;

impl SpotRepository {
    pub async fn get(conn: &mut SqliteConnection, spot_id: SpotId) -> DbResult<Option<SpotState>> {
        let sql = format!("{SELECT_SPOT} WHERE spot_id = ?1");
        let row = sqlx::query_as::<_, SpotRow>(&sql)
            .bind(spot_id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.map(SpotState::from))
    }

    /// Returns the stored state, or an empty spot if it was never seen.
    pub async fn get_or_vacant(conn: &mut SqliteConnection, spot_id: SpotId) -> DbResult<SpotState> {
        Ok(Self::get(conn, spot_id)
            .await?
            .unwrap_or_else(|| SpotState::vacant(spot_id)))
    }

    pub async fn list(conn: &mut SqliteConnection) -> DbResult<Vec<SpotState>> {
        let sql = format!("{SELECT_SPOT} ORDER BY spot_id");
        let rows = sqlx::query_as::<_, SpotRow>(&sql)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows.into_iter().map(SpotState::from).collect())
    }

    /// Spots that currently hold a reservation.
    pub async fn list_reserved(conn: &mut SqliteConnection) -> DbResult<Vec<SpotState>> {
        let sql = format!("{SELECT_SPOT} WHERE active_reservation_id IS NOT NULL ORDER BY spot_id");
        let rows = sqlx::query_as::<_, SpotRow>(&sql)
            .fetch_all(&mut *conn)
            .await?;
        Ok(rows.into_iter().map(SpotState::from).collect())
    }

    /// Writes the full state (insert on first sight).
    pub async fn save(
        conn: &mut SqliteConnection,
        spot: &SpotState,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        let active = spot.active.as_ref();
        sqlx::query(
            r#"
            INSERT INTO spot_states (
                spot_id, is_occupied, battery_level, active_reservation_id,
                reservation_valid_from, reservation_duration_secs,
                last_reservation_id, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (spot_id) DO UPDATE SET
                is_occupied = excluded.is_occupied,
                battery_level = excluded.battery_level,
                active_reservation_id = excluded.active_reservation_id,
                reservation_valid_from = excluded.reservation_valid_from,
                reservation_duration_secs = excluded.reservation_duration_secs,
                last_reservation_id = excluded.last_reservation_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(spot.spot_id)
        .bind(spot.is_occupied)
        .bind(spot.battery_level)
        .bind(active.map(|a| a.reservation_id))
        .bind(active.map(|a| a.valid_from))
        .bind(active.map(|a| a.duration_secs))
        .bind(spot.last_reservation_id)
        .bind(at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Attaches a reservation only if the spot is occupied and free.
    ///
    /// ## Returns
    /// `false` when the spot is empty, already reserved, or unknown.
    pub async fn attach(
        conn: &mut SqliteConnection,
        spot_id: SpotId,
        reservation_id: ReservationId,
        valid_from: DateTime<Utc>,
        duration_secs: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE spot_states SET
                active_reservation_id = ?2,
                reservation_valid_from = ?3,
                reservation_duration_secs = ?4,
                updated_at = ?3
            WHERE spot_id = ?1
              AND is_occupied = 1
              AND active_reservation_id IS NULL
            "#,
        )
        .bind(spot_id)
        .bind(reservation_id)
        .bind(valid_from)
        .bind(duration_secs)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// True if any spot still points at `reservation_id`.
    pub async fn is_attached(conn: &mut SqliteConnection, reservation_id: ReservationId) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM spot_states WHERE active_reservation_id = ?1",
        )
        .bind(reservation_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig, DbError, Schema};

    async fn edge_db() -> Database {
        Database::new(DbConfig::in_memory(Schema::Edge)).await.unwrap()
    }

    #[tokio::test]
    async fn test_save_and_reload_roundtrips_active_reservation() {
        let db = edge_db().await;
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();

        let mut spot = SpotState::occupied(3, 0.6);
        spot.attach(1, now, 30).unwrap();
        SpotRepository::save(&mut conn, &spot, now).await.unwrap();

        let loaded = SpotRepository::get(&mut conn, 3).await.unwrap().unwrap();
        assert_eq!(loaded, spot);
    }

    #[tokio::test]
    async fn test_attach_requires_occupied_free_spot() {
        let db = edge_db().await;
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();

        SpotRepository::save(&mut conn, &SpotState::occupied(1, 0.3), now).await.unwrap();
        SpotRepository::save(&mut conn, &SpotState::vacant(2), now).await.unwrap();

        assert!(SpotRepository::attach(&mut conn, 1, 10, now, 30).await.unwrap());
        assert!(!SpotRepository::attach(&mut conn, 1, 11, now, 30).await.unwrap());
        assert!(!SpotRepository::attach(&mut conn, 2, 12, now, 30).await.unwrap());
        assert!(!SpotRepository::attach(&mut conn, 9, 13, now, 30).await.unwrap());

        assert!(SpotRepository::is_attached(&mut conn, 10).await.unwrap());
        assert!(!SpotRepository::is_attached(&mut conn, 11).await.unwrap());
    }

    #[tokio::test]
    async fn test_schema_refuses_reservation_on_empty_spot() {
        let db = edge_db().await;
        let mut conn = db.acquire().await.unwrap();
        let now = Utc::now();

        let mut spot = SpotState::vacant(4);
        spot.active = Some(ActiveReservation {
            reservation_id: 1,
            valid_from: now,
            duration_secs: 30,
        });

        let err = SpotRepository::save(&mut conn, &spot, now).await.unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation { .. }));
    }

    #[tokio::test]
    async fn test_get_or_vacant_for_unknown_spot() {
        let db = edge_db().await;
        let mut conn = db.acquire().await.unwrap();

        let spot = SpotRepository::get_or_vacant(&mut conn, 0).await.unwrap();
        assert_eq!(spot, SpotState::vacant(0));
    }
}
