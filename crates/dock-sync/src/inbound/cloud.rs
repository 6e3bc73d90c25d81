use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, error, info, warn};

use dock_core::validation::validate_spot_id;
use dock_core::{Clock, MergeOutcome};
use dock_db::{Database, HistoryRepository, RequestRepository, SpotCacheRepository};

use super::ERROR_REPLY;
use crate::error::SyncResult;
use crate::protocol::{self, StationReport, REPORT_ACK};
use crate::server::RequestHandler;

/// What one report changed on the cloud.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOutcome {
    pub readings_logged: usize,
    pub electricity_logged: usize,
    pub confirmed: usize,
    pub rejected: usize,
    /// Spots whose cache took a newer reading.
    pub spots_merged: usize,
    /// Cached reservations dropped because the bike left.
    pub cleared: usize,
}

/// Cloud receiver for [`StationReport`] messages.
pub struct CloudInbound {
    db: Database,
    clock: Arc<dyn Clock>,
    spot_count: i64,
}

impl CloudInbound {
    pub fn new(db: Database, clock: Arc<dyn Clock>, spot_count: i64) -> Self {
        CloudInbound {
            db,
            clock,
            spot_count,
        }
    }

    /// Applies one report in a single transaction.
    ///
    /// Audit rows are written first, then decisions, then readings, so a
    /// bike that left after its reservation was confirmed clears the freshly
    /// attached reservation.
    pub async fn apply(&self, report: &StationReport) -> SyncResult<ReportOutcome> {
        let now = self.clock.now();
        let mut outcome = ReportOutcome::default();
        let mut tx = self.db.begin().await?;

        log_history(&mut tx, report, now, &mut outcome).await?;
        apply_decisions(&mut tx, report, now, &mut outcome).await?;
        self.merge_readings(&mut tx, report, &mut outcome).await?;

        tx.commit().await?;

        debug!(?outcome, "Station report applied");
        Ok(outcome)
    }

    async fn merge_readings(
        &self,
        conn: &mut SqliteConnection,
        report: &StationReport,
        outcome: &mut ReportOutcome,
    ) -> SyncResult<()> {
        for (&spot_id, readings) in &report.sensor_data {
            if let Err(e) = validate_spot_id(spot_id, self.spot_count) {
                warn!(spot_id, error = %e, "Ignoring readings for unknown spot");
                continue;
            }
            let Some(latest) = readings
                .iter()
                .max_by_key(|r| (r.datetime, r.reading_id))
            else {
                continue;
            };

            let mut spot = SpotCacheRepository::get_or_new(conn, spot_id).await?;
            match spot.merge_reading(latest.datetime, latest.is_occupied, latest.battery_level) {
                MergeOutcome::Stale => continue,
                MergeOutcome::Applied => {}
                MergeOutcome::AppliedAndCleared(reservation_id) => {
                    info!(spot_id, ?reservation_id, "Bike left the spot, cached reservation cleared");
                    outcome.cleared += 1;
                }
            }
            SpotCacheRepository::save(conn, &spot).await?;
            outcome.spots_merged += 1;
        }
        Ok(())
    }
}

/// Write-only audit trail, keyed by the edge's ids.
async fn log_history(
    conn: &mut SqliteConnection,
    report: &StationReport,
    now: DateTime<Utc>,
    outcome: &mut ReportOutcome,
) -> SyncResult<()> {
    for (&spot_id, readings) in &report.sensor_data {
        for r in readings {
            let inserted = HistoryRepository::insert_reading(
                conn,
                spot_id,
                r.reading_id,
                r.datetime,
                r.is_occupied,
                r.battery_level,
                now,
            )
            .await?;
            outcome.readings_logged += usize::from(inserted);
        }
    }

    for (&record_id, e) in &report.electricity_info {
        let inserted =
            HistoryRepository::insert_electricity(conn, record_id, e.datetime, &e.view(), now)
                .await?;
        outcome.electricity_logged += usize::from(inserted);
    }
    Ok(())
}

/// Moves requests still in `requested` to their edge decision.
async fn apply_decisions(
    conn: &mut SqliteConnection,
    report: &StationReport,
    now: DateTime<Utc>,
    outcome: &mut ReportOutcome,
) -> SyncResult<()> {
    for (&id, &confirmed_at) in &report.confirmed_reservations {
        if !RequestRepository::mark_confirmed(conn, id, confirmed_at, now).await? {
            debug!(reservation_id = id, "Confirmation already applied or unknown");
            continue;
        }
        let Some(request) = RequestRepository::get(conn, id).await? else {
            continue;
        };

        let mut spot = SpotCacheRepository::get_or_new(conn, request.spot_id).await?;
        spot.attach_confirmed(id, confirmed_at, request.duration_secs);
        SpotCacheRepository::save(conn, &spot).await?;

        info!(
            reservation_id = id,
            spot_id = request.spot_id,
            %confirmed_at,
            "Reservation confirmed by station"
        );
        outcome.confirmed += 1;
    }

    for &id in &report.rejected_reservations {
        if !RequestRepository::mark_rejected(conn, id, now).await? {
            debug!(reservation_id = id, "Rejection already applied or unknown");
            continue;
        }
        let Some(request) = RequestRepository::get(conn, id).await? else {
            continue;
        };

        let mut spot = SpotCacheRepository::get_or_new(conn, request.spot_id).await?;
        if spot.reservation_id == Some(id) {
            spot.clear_reservation();
            SpotCacheRepository::save(conn, &spot).await?;
        }

        info!(reservation_id = id, spot_id = request.spot_id, "Reservation rejected by station");
        outcome.rejected += 1;
    }
    Ok(())
}

#[async_trait]
impl RequestHandler for CloudInbound {
    async fn handle(&self, request: &str) -> String {
        let report: StationReport = match protocol::from_json(request) {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Undecodable report from station");
                return ERROR_REPLY.to_string();
            }
        };

        match self.apply(&report).await {
            Ok(_) => REPORT_ACK.to_string(),
            Err(e) => {
                error!(error = %e, "Failed to apply station report");
                ERROR_REPLY.to_string()
            }
        }
    }
}
