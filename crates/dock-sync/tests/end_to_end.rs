//! Both nodes wired together in one process: in-memory databases, one
//! shared simulated clock, and in-process connectors instead of sockets.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use dock_core::{
    Clock, ManualClock, RequestStatus, ReservationStatus, SensorSnapshot, SpotPoll,
    SpotReservationStatus,
};
use dock_db::{
    Database, DbConfig, RequestRepository, ReservationRepository, Schema, SpotCacheRepository,
    SpotRepository,
};
use dock_sync::dispatch::expire_cached;
use dock_sync::{
    CloudDispatcher, CloudInbound, EdgeInbound, EdgeOutbox, LazyPirateClient, LocalConnector,
    MarketPriceFeed, OutboxResult, RetryPolicy, SensorFeed, StationCycle,
};

const SPOTS: i64 = 5;

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Occupancy the test can change between cycles.
#[derive(Clone)]
struct Sensors(Arc<Mutex<Vec<bool>>>);

impl Sensors {
    fn new(occupied: &[i64]) -> Self {
        let spots = (0..SPOTS).map(|id| occupied.contains(&id)).collect();
        Sensors(Arc::new(Mutex::new(spots)))
    }
}

impl SensorFeed for Sensors {
    fn poll(&mut self, _now: DateTime<Utc>) -> SensorSnapshot {
        let spots = self
            .0
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(id, &is_occupied)| SpotPoll {
                spot_id: id as i64,
                is_occupied,
                battery_level: is_occupied.then_some(0.6),
            })
            .collect();
        SensorSnapshot {
            spots,
            production_kw: 1.5,
        }
    }
}

struct FixedPrice;

impl MarketPriceFeed for FixedPrice {
    fn current_price(&mut self) -> f64 {
        0.42
    }
}

struct Station {
    clock: ManualClock,
    edge_db: Database,
    cloud_db: Database,
    sensors: Sensors,
    cycle: StationCycle,
    outbox: EdgeOutbox,
    dispatcher: CloudDispatcher,
}

impl Station {
    async fn new(occupied: &[i64]) -> Self {
        let clock = ManualClock::new(t0());
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());

        let edge_db = Database::new(DbConfig::in_memory(Schema::Edge)).await.unwrap();
        let cloud_db = Database::new(DbConfig::in_memory(Schema::Cloud)).await.unwrap();
        {
            let mut conn = cloud_db.acquire().await.unwrap();
            SpotCacheRepository::ensure_spots(&mut conn, SPOTS).await.unwrap();
        }

        let edge_inbound = Arc::new(EdgeInbound::new(edge_db.clone(), shared.clone(), SPOTS));
        let cloud_inbound = Arc::new(CloudInbound::new(cloud_db.clone(), shared.clone(), SPOTS));

        let to_cloud = LazyPirateClient::new(
            Arc::new(LocalConnector::new(cloud_inbound)),
            Duration::from_millis(2500),
            RetryPolicy::default(),
        );
        let to_edge = LazyPirateClient::new(
            Arc::new(LocalConnector::new(edge_inbound)),
            Duration::from_millis(2500),
            RetryPolicy::default(),
        );

        Station {
            sensors: Sensors::new(occupied),
            cycle: StationCycle::new(edge_db.clone(), shared, SPOTS, 0.45),
            outbox: EdgeOutbox::new(edge_db.clone(), to_cloud, 10, Duration::from_secs(1)),
            dispatcher: CloudDispatcher::new(cloud_db.clone(), to_edge, Box::new(FixedPrice)),
            clock,
            edge_db,
            cloud_db,
        }
    }

    async fn station_cycle(&mut self) {
        self.cycle.run_once(&mut self.sensors).await.unwrap();
    }

    /// Runs the outbox until everything pending has been acknowledged.
    async fn flush_outbox(&mut self) {
        while self.outbox.run_once().await.unwrap() != OutboxResult::Idle {}
    }

    async fn request(&self, spot_id: i64, duration_secs: i64) -> i64 {
        let mut tx = self.cloud_db.begin().await.unwrap();
        let request = RequestRepository::create(&mut tx, spot_id, duration_secs, self.clock.now())
            .await
            .unwrap();
        let mut spot = SpotCacheRepository::get_or_new(&mut tx, spot_id).await.unwrap();
        spot.mark_requested(request.id);
        SpotCacheRepository::save(&mut tx, &spot).await.unwrap();
        tx.commit().await.unwrap();
        request.id
    }
}

#[tokio::test]
async fn test_confirmed_reservation_expires_on_both_sides() {
    let mut station = Station::new(&[3]).await;

    // Edge learns spot 3 is occupied and tells the cloud.
    station.station_cycle().await;
    station.flush_outbox().await;

    let id = station.request(3, 30).await;
    assert_eq!(id, 1);

    station.dispatcher.run_once().await.unwrap();
    station.clock.advance(chrono::Duration::seconds(1));
    let confirmed_at = station.clock.now();
    station.station_cycle().await;

    // A resend before the cloud has heard back must not open a second decision.
    station.dispatcher.run_once().await.unwrap();
    station.station_cycle().await;
    {
        let mut conn = station.edge_db.acquire().await.unwrap();
        let stored = ReservationRepository::get(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Confirmed);
        assert_eq!(stored.confirmed_at, Some(confirmed_at));

        let spot = SpotRepository::get(&mut conn, 3).await.unwrap().unwrap();
        assert_eq!(spot.active.map(|a| a.reservation_id), Some(id));
    }

    station.flush_outbox().await;
    {
        let mut conn = station.cloud_db.acquire().await.unwrap();
        let request = RequestRepository::get(&mut conn, id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Confirmed);
        assert_eq!(request.confirmed_at, Some(confirmed_at));

        let cached = SpotCacheRepository::get(&mut conn, 3).await.unwrap().unwrap();
        assert_eq!(cached.status, SpotReservationStatus::Confirmed);
        assert_eq!(cached.reservation_id, Some(id));
        assert_eq!(cached.remaining_secs(station.clock.now()), Some(30));
    }

    // The cloud no longer sends a decided request.
    let sent = station.dispatcher.run_once().await.unwrap();
    assert_eq!(sent.reservations_sent, 0);

    // 31 simulated seconds later both sides have dropped it on their own.
    station.clock.advance(chrono::Duration::seconds(31));
    station.station_cycle().await;
    assert_eq!(
        expire_cached(&station.cloud_db, station.clock.now()).await.unwrap(),
        1
    );

    let mut edge = station.edge_db.acquire().await.unwrap();
    let spot = SpotRepository::get(&mut edge, 3).await.unwrap().unwrap();
    assert!(spot.is_occupied);
    assert!(spot.active.is_none());
    assert_eq!(spot.last_reservation_id, Some(id));

    let mut cloud = station.cloud_db.acquire().await.unwrap();
    let cached = SpotCacheRepository::get(&mut cloud, 3).await.unwrap().unwrap();
    assert_eq!(cached.status, SpotReservationStatus::NoReservation);
    assert_eq!(cached.reservation_id, None);
}

#[tokio::test]
async fn test_request_for_empty_spot_is_rejected() {
    let mut station = Station::new(&[0, 1, 2, 3]).await;
    station.station_cycle().await;

    let id = station.request(4, 30).await;
    station.dispatcher.run_once().await.unwrap();
    station.station_cycle().await;
    station.flush_outbox().await;

    let mut conn = station.cloud_db.acquire().await.unwrap();
    let request = RequestRepository::get(&mut conn, id).await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Rejected);
    assert_eq!(request.confirmed_at, None);
    assert!(request.decided_at.is_some());

    let cached = SpotCacheRepository::get(&mut conn, 4).await.unwrap().unwrap();
    assert_eq!(cached.status, SpotReservationStatus::NoReservation);
    assert!(!cached.is_occupied);
}

#[tokio::test]
async fn test_bike_leaving_clears_reservation_before_expiry() {
    let mut station = Station::new(&[2]).await;
    station.station_cycle().await;

    let id = station.request(2, 50).await;
    station.dispatcher.run_once().await.unwrap();
    station.station_cycle().await;
    station.flush_outbox().await;

    // The bike is taken 5 seconds into a 50 second reservation.
    station.sensors.0.lock().unwrap()[2] = false;
    station.clock.advance(chrono::Duration::seconds(5));
    station.station_cycle().await;
    station.flush_outbox().await;

    let mut edge = station.edge_db.acquire().await.unwrap();
    let spot = SpotRepository::get(&mut edge, 2).await.unwrap().unwrap();
    assert!(!spot.is_occupied);
    assert!(spot.active.is_none());
    assert_eq!(spot.last_reservation_id, Some(id));

    let mut cloud = station.cloud_db.acquire().await.unwrap();
    let cached = SpotCacheRepository::get(&mut cloud, 2).await.unwrap().unwrap();
    assert!(!cached.is_occupied);
    assert_eq!(cached.status, SpotReservationStatus::NoReservation);
    assert_eq!(cached.reservation_id, None);
}
