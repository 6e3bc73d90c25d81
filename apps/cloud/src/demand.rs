//! Simulated reservation demand.
//!
//! Every round looks at the spots the cloud believes are reservable (bike
//! docked, nothing requested or confirmed) and, with the configured
//! probability, requests one of them for a random duration.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use dock_core::{CachedSpot, Clock, ReservationRequest};
use dock_db::{Database, DbResult, RequestRepository, SpotCacheRepository};

pub struct ReservationMaker<R> {
    db: Database,
    clock: Arc<dyn Clock>,
    rng: R,
    probability: f64,
    min_duration_secs: i64,
    max_duration_secs: i64,
}

impl<R: Rng + Send> ReservationMaker<R> {
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        rng: R,
        probability: f64,
        min_duration_secs: i64,
        max_duration_secs: i64,
    ) -> Self {
        ReservationMaker {
            db,
            clock,
            rng,
            probability,
            min_duration_secs,
            max_duration_secs,
        }
    }

    /// One demand round. Returns the request it created, if any.
    pub async fn run_once(&mut self) -> DbResult<Option<ReservationRequest>> {
        let mut tx = self.db.begin().await?;

        let reservable: Vec<CachedSpot> = SpotCacheRepository::list(&mut tx)
            .await?
            .into_iter()
            .filter(CachedSpot::is_reservable)
            .collect();

        let Some(spot) = self.pick(&reservable) else {
            return Ok(None);
        };
        let mut spot = spot.clone();
        let duration = self
            .rng
            .gen_range(self.min_duration_secs..=self.max_duration_secs);

        let request = RequestRepository::create(&mut tx, spot.spot_id, duration, self.clock.now()).await?;
        spot.mark_requested(request.id);
        SpotCacheRepository::save(&mut tx, &spot).await?;
        tx.commit().await?;

        info!(
            reservation_id = request.id,
            spot_id = request.spot_id,
            duration_secs = request.duration_secs,
            "Reservation requested"
        );
        Ok(Some(request))
    }

    fn pick<'a>(&mut self, reservable: &'a [CachedSpot]) -> Option<&'a CachedSpot> {
        if reservable.is_empty() {
            debug!("No spots to reserve");
            return None;
        }
        if !self.rng.gen_bool(self.probability) {
            return None;
        }
        reservable.choose(&mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use dock_core::{ManualClock, RequestStatus, SpotReservationStatus};
    use dock_db::{DbConfig, Schema};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    async fn setup(occupied: &[i64], probability: f64) -> (Database, ReservationMaker<StdRng>) {
        let db = Database::new(DbConfig::in_memory(Schema::Cloud)).await.unwrap();
        {
            let mut conn = db.acquire().await.unwrap();
            SpotCacheRepository::ensure_spots(&mut conn, 5).await.unwrap();
            for &spot_id in occupied {
                let mut spot = SpotCacheRepository::get_or_new(&mut conn, spot_id).await.unwrap();
                spot.merge_reading(t0(), true, Some(0.5));
                SpotCacheRepository::save(&mut conn, &spot).await.unwrap();
            }
        }
        let maker = ReservationMaker::new(
            db.clone(),
            Arc::new(ManualClock::new(t0())),
            StdRng::seed_from_u64(3),
            probability,
            20,
            50,
        );
        (db, maker)
    }

    #[tokio::test]
    async fn test_requests_only_reservable_spot() {
        let (db, mut maker) = setup(&[2], 1.0).await;

        let request = maker.run_once().await.unwrap().unwrap();
        assert_eq!(request.spot_id, 2);
        assert_eq!(request.status, RequestStatus::Requested);
        assert!((20..=50).contains(&request.duration_secs));

        let mut conn = db.acquire().await.unwrap();
        let spot = SpotCacheRepository::get(&mut conn, 2).await.unwrap().unwrap();
        assert_eq!(spot.status, SpotReservationStatus::Requested);
        assert_eq!(spot.reservation_id, Some(request.id));
        drop(conn);

        // The spot is pending now, so there is nothing left to reserve.
        assert!(maker.run_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_station_creates_nothing() {
        let (db, mut maker) = setup(&[], 1.0).await;
        assert!(maker.run_once().await.unwrap().is_none());

        let mut conn = db.acquire().await.unwrap();
        assert_eq!(
            RequestRepository::count_by_status(&mut conn, RequestStatus::Requested)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_zero_probability_never_requests() {
        let (_db, mut maker) = setup(&[0, 1, 2, 3, 4], 0.0).await;
        for _ in 0..10 {
            assert!(maker.run_once().await.unwrap().is_none());
        }
    }
}
