//! # Housekeeping
//!
//! Garbage collection of rows the protocol no longer needs.
//!
//! ```text
//!   EDGE                                   CLOUD
//!   ────                                   ─────
//!   sensor_readings      sent = 1          reservation_requests
//!   electricity_records  sent = 1            rejected, decided before cutoff
//!   reservations                             confirmed, window ended before cutoff
//!     communicated AND decided before cutoff
//!     AND (unfeasible OR no longer attached)
//! ```
//! Deleting an edge reservation does not make its id new again: the edge
//! keeps a watermark of the highest id it ever received (see
//! [`ReservationRepository::highest_seen`]) and ignores anything at or below it.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteConnection;
use tracing::info;

use crate::error::DbResult;
use crate::repository::{
    ElectricityRepository, ReadingRepository, RequestRepository, ReservationRepository,
    SpotRepository,
};
use dock_core::{RequestStatus, ReservationStatus};

/// Rows removed by one housekeeping pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub readings: u64,
    pub electricity: u64,
    pub reservations: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.readings + self.electricity + self.reservations
    }
}

/// Cleans the edge database.
pub async fn clean_edge(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    retention: Duration,
) -> DbResult<CleanupReport> {
    let cutoff = now - retention;
    let mut report = CleanupReport {
        readings: ReadingRepository::delete_sent(conn).await?,
        electricity: ElectricityRepository::delete_sent(conn).await?,
        reservations: 0,
    };

    for reservation in ReservationRepository::communicated_terminal(conn).await? {
        if !matches!(reservation.decided_at, Some(at) if at <= cutoff) {
            continue;
        }
        let finished = match reservation.status {
            ReservationStatus::Unfeasible => true,
            ReservationStatus::Confirmed => {
                !SpotRepository::is_attached(conn, reservation.id).await?
            }
            ReservationStatus::Requested => false,
        };
        if finished && ReservationRepository::delete(conn, reservation.id).await? {
            report.reservations += 1;
        }
    }

    if report.total() > 0 {
        info!(
            readings = report.readings,
            electricity = report.electricity,
            reservations = report.reservations,
            "Edge housekeeping removed processed rows"
        );
    }
    Ok(report)
}

/// Cleans the cloud database.
pub async fn clean_cloud(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    retention: Duration,
) -> DbResult<CleanupReport> {
    let cutoff = now - retention;
    let mut report = CleanupReport::default();

    for request in RequestRepository::terminal(conn).await? {
        let finished_at = match request.status {
            RequestStatus::Rejected => request.decided_at,
            RequestStatus::Confirmed => request
                .confirmed_at
                .map(|from| from + Duration::seconds(request.duration_secs)),
            RequestStatus::Requested => None,
        };
        if matches!(finished_at, Some(at) if at <= cutoff)
            && RequestRepository::delete(conn, request.id).await?
        {
            report.reservations += 1;
        }
    }

    if report.total() > 0 {
        info!(
            reservations = report.reservations,
            "Cloud housekeeping removed finished requests"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SpotCacheRepository;
    use crate::{Database, DbConfig, Schema};
    use dock_core::{Reservation, SpotPoll, SpotState};

    #[tokio::test]
    async fn test_edge_cleanup_respects_retention_and_attachment() {
        let db = Database::new(DbConfig::in_memory(Schema::Edge)).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let t0 = Utc::now();

        // 1: unfeasible, 2: confirmed and still attached, 3: confirmed and ended
        for id in [1, 2, 3] {
            ReservationRepository::insert_if_absent(&mut conn, &Reservation::received(id, id, 30, t0, t0))
                .await
                .unwrap();
        }
        ReservationRepository::mark_unfeasible(&mut conn, 1, t0).await.unwrap();
        ReservationRepository::mark_confirmed(&mut conn, 2, t0).await.unwrap();
        ReservationRepository::mark_confirmed(&mut conn, 3, t0).await.unwrap();
        ReservationRepository::mark_communicated(&mut conn, &[1, 2, 3]).await.unwrap();

        let mut spot = SpotState::occupied(2, 0.5);
        spot.attach(2, t0, 30).unwrap();
        SpotRepository::save(&mut conn, &spot, t0).await.unwrap();

        let poll = SpotPoll {
            spot_id: 0,
            is_occupied: false,
            battery_level: None,
        };
        let id = ReadingRepository::insert(&mut conn, &poll, t0).await.unwrap();
        ReadingRepository::mark_sent_up_to(&mut conn, id).await.unwrap();

        // Inside the retention window only the sent reading goes
        let report = clean_edge(&mut conn, t0 + Duration::seconds(10), Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(report.readings, 1);
        assert_eq!(report.reservations, 0);

        let report = clean_edge(&mut conn, t0 + Duration::seconds(120), Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(report.reservations, 2);
        assert!(ReservationRepository::get(&mut conn, 2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cloud_cleanup_waits_for_window_end() {
        let db = Database::new(DbConfig::in_memory(Schema::Cloud)).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let t0 = Utc::now();
        SpotCacheRepository::ensure_spots(&mut conn, 5).await.unwrap();

        let confirmed = RequestRepository::create(&mut conn, 3, 30, t0).await.unwrap();
        let rejected = RequestRepository::create(&mut conn, 4, 30, t0).await.unwrap();
        let pending = RequestRepository::create(&mut conn, 1, 30, t0).await.unwrap();
        RequestRepository::mark_confirmed(&mut conn, confirmed.id, t0, t0).await.unwrap();
        RequestRepository::mark_rejected(&mut conn, rejected.id, t0).await.unwrap();

        let report = clean_cloud(&mut conn, t0 + Duration::seconds(20), Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(report.reservations, 1);

        let report = clean_cloud(&mut conn, t0 + Duration::seconds(40), Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(report.reservations, 1);
        assert!(RequestRepository::get(&mut conn, pending.id).await.unwrap().is_some());
    }
}
