//! # Station Cycle (edge)
//!
//! One pass of the edge's local work, committed as a single transaction:
//!
//! ```text
//!   poll sensors
//!      │
//!      ├─► per spot: update SpotState (vacated spot drops its reservation)
//!      │             append sensor reading
//!      │
//!      ├─► expiry:   clear reservations whose window has run out
//!      │
//!      ├─► decide:   pending requests in receipt order → confirm / unfeasible
//!      │
//!      └─► electricity split for the current demand and production
//! ```
//!
//! Physical truth runs before the decisions, so a request for a spot that
//! was just vacated is rejected in the same cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use dock_core::validation::{validate_battery_level, validate_spot_id};
use dock_core::{
    decide, Clock, Decision, ElectricityView, RejectReason, SensorSnapshot, Tariff,
};
use dock_db::{
    Database, ElectricityRepository, ReadingRepository, ReservationRepository,
    SettingsRepository, SpotRepository, MARKET_PRICE,
};

use crate::error::SyncResult;

/// Source of physical readings, polled once per cycle.
pub trait SensorFeed: Send {
    fn poll(&mut self, now: DateTime<Utc>) -> SensorSnapshot;
}

/// What one cycle changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub readings: usize,
    /// Reservations dropped because the bike left.
    pub vacated: usize,
    pub expired: usize,
    pub confirmed: usize,
    pub rejected: usize,
    pub electricity_recorded: bool,
}

/// Runs the edge's sensor/decision cycle against the edge database.
pub struct StationCycle {
    db: Database,
    clock: Arc<dyn Clock>,
    spot_count: i64,
    contract_price: f64,
}

impl StationCycle {
    pub fn new(db: Database, clock: Arc<dyn Clock>, spot_count: i64, contract_price: f64) -> Self {
        StationCycle {
            db,
            clock,
            spot_count,
            contract_price,
        }
    }

    /// Polls `feed` and applies one full cycle. Nothing is kept on error.
    pub async fn run_once(&self, feed: &mut dyn SensorFeed) -> SyncResult<CycleReport> {
        let now = self.clock.now();
        let snapshot = feed.poll(now);
        let mut report = CycleReport::default();

        let mut tx = self.db.begin().await?;
        self.apply_readings(&mut tx, &snapshot, now, &mut report).await?;
        expire_reservations(&mut tx, now, &mut report).await?;
        decide_pending(&mut tx, now, &mut report).await?;
        report.electricity_recorded = self.record_electricity(&mut tx, &snapshot, now).await?;
        tx.commit().await?;

        debug!(?report, "Station cycle committed");
        Ok(report)
    }

    async fn apply_readings(
        &self,
        conn: &mut SqliteConnection,
        snapshot: &SensorSnapshot,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        for poll in &snapshot.spots {
            if let Err(e) = validate_spot_id(poll.spot_id, self.spot_count)
                .and_then(|_| validate_battery_level(poll.battery_level))
            {
                warn!(spot_id = poll.spot_id, error = %e, "Discarding invalid sensor reading");
                continue;
            }

            let mut spot = SpotRepository::get_or_vacant(conn, poll.spot_id).await?;
            if let Some(reservation_id) = spot.apply_reading(poll.is_occupied, poll.battery_level)
            {
                info!(
                    spot_id = spot.spot_id,
                    reservation_id,
                    "Bike left the spot, reservation cleared"
                );
                report.vacated += 1;
            }
            SpotRepository::save(conn, &spot, now).await?;
            ReadingRepository::insert(conn, poll, now).await?;
            report.readings += 1;
        }
        Ok(())
    }

    async fn record_electricity(
        &self,
        conn: &mut SqliteConnection,
        snapshot: &SensorSnapshot,
        now: DateTime<Utc>,
    ) -> SyncResult<bool> {
        let Some(market_price) = SettingsRepository::get_real(conn, MARKET_PRICE).await? else {
            debug!("No market price received yet, skipping electricity record");
            return Ok(false);
        };

        let tariff = Tariff {
            contract_price: self.contract_price,
            market_price,
        };
        let view = ElectricityView::compute(
            snapshot.occupied_count() as f64,
            snapshot.production_kw,
            tariff,
        );
        ElectricityRepository::insert(conn, &view, now).await?;
        Ok(true)
    }
}

/// Clears every confirmed reservation whose remaining time is ≤ 0.
async fn expire_reservations(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    report: &mut CycleReport,
) -> SyncResult<()> {
    for mut spot in SpotRepository::list_reserved(conn).await? {
        if let Some(reservation_id) = spot.expire_if_due(now) {
            info!(spot_id = spot.spot_id, reservation_id, "Reservation expired");
            SpotRepository::save(conn, &spot, now).await?;
            report.expired += 1;
        }
    }
    Ok(())
}

/// Decides every pending request, oldest receipt first.
async fn decide_pending(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
    report: &mut CycleReport,
) -> SyncResult<()> {
    for reservation in ReservationRepository::pending_in_receipt_order(conn).await? {
        let spot = SpotRepository::get_or_vacant(conn, reservation.spot_id).await?;

        let reason = match decide(&reservation, &spot, now) {
            Decision::Confirm {
                valid_from,
                duration_secs,
            } => {
                let attached = SpotRepository::attach(
                    conn,
                    reservation.spot_id,
                    reservation.id,
                    valid_from,
                    duration_secs,
                )
                .await?;
                if attached && ReservationRepository::mark_confirmed(conn, reservation.id, now).await? {
                    info!(
                        reservation_id = reservation.id,
                        spot_id = reservation.spot_id,
                        duration_secs,
                        "Reservation confirmed"
                    );
                    report.confirmed += 1;
                    continue;
                }
                RejectReason::SpotAlreadyReserved
            }
            Decision::Reject(reason) => reason,
        };

        if ReservationRepository::mark_unfeasible(conn, reservation.id, now).await? {
            info!(
                reservation_id = reservation.id,
                spot_id = reservation.spot_id,
                reason = %reason,
                "Reservation unfeasible"
            );
            report.rejected += 1;
        }
    }
    Ok(())
}
