//! # Edge Outbox
//!
//! Uploads readings, decisions and electricity records to the cloud.
//!
//! ## Upload Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Edge Outbox Upload                               │
//! │                                                                         │
//! │  1. GATHER (read-only, connection released before sending)             │
//! │     oldest N unsent readings ─────┐                                    │
//! │     oldest N unsent electricity ──┼──► StationReport                   │
//! │     all uncommunicated decisions ─┘                                    │
//! │                                                                         │
//! │  2. SEND (lazy pirate, resends identical bytes until "4")              │
//! │                                                                         │
//! │  3. ACKNOWLEDGE (one transaction)                                      │
//! │     readings     SET sent = 1 WHERE id <= reading watermark            │
//! │     electricity  SET sent = 1 WHERE id <= electricity watermark        │
//! │     reservations SET communicated = 1 WHERE id IN (decided ids)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows written while a send is in flight get higher ids and are not
//! covered by the watermark, so they go out with the next report.

use std::time::Duration;

use tracing::{debug, info};

use dock_core::ReservationStatus;
use dock_db::{Database, ElectricityRepository, ReadingRepository, ReservationRepository};

use crate::error::SyncResult;
use crate::protocol::{StationReport, REPORT_ACK};
use crate::transport::LazyPirateClient;

/// Result of one outbox pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxResult {
    /// Nothing to send; the caller should wait before polling again.
    Idle,
    Delivered {
        readings: u64,
        electricity: u64,
        decisions: u64,
    },
}

/// Edge → cloud uploader.
pub struct EdgeOutbox {
    db: Database,
    client: LazyPirateClient,
    batch_size: u32,
    idle_wait: Duration,
}

impl EdgeOutbox {
    pub fn new(db: Database, client: LazyPirateClient, batch_size: u32, idle_wait: Duration) -> Self {
        EdgeOutbox {
            db,
            client,
            batch_size,
            idle_wait,
        }
    }

    /// How long to wait after an [`OutboxResult::Idle`] pass.
    pub fn idle_wait(&self) -> Duration {
        self.idle_wait
    }

    /// Gathers, sends, and acknowledges one report.
    pub async fn run_once(&mut self) -> SyncResult<OutboxResult> {
        let Some(report) = gather(&self.db, self.batch_size).await? else {
            info!("No new data to be sent. Waiting...");
            return Ok(OutboxResult::Idle);
        };

        debug!(
            spots = report.sensor_data.len(),
            confirmed = report.confirmed_reservations.len(),
            rejected = report.rejected_reservations.len(),
            electricity = report.electricity_info.len(),
            "Sending station report"
        );
        self.client.send_and_await(&report, REPORT_ACK).await?;

        acknowledge(&self.db, &report).await
    }
}

/// Builds the next report, or `None` when there is nothing to send.
async fn gather(db: &Database, batch_size: u32) -> SyncResult<Option<StationReport>> {
    let mut conn = db.acquire().await?;
    let mut report = StationReport::default();

    for reading in ReadingRepository::oldest_unsent(&mut conn, batch_size).await? {
        report.push_reading(&reading);
    }
    for record in ElectricityRepository::oldest_unsent(&mut conn, batch_size).await? {
        report.push_electricity(&record);
    }
    for reservation in ReservationRepository::undelivered_decisions(&mut conn).await? {
        match (reservation.status, reservation.confirmed_at) {
            (ReservationStatus::Confirmed, Some(at)) => {
                report.confirmed_reservations.insert(reservation.id, at);
            }
            (ReservationStatus::Unfeasible, _) => {
                report.rejected_reservations.push(reservation.id);
            }
            _ => {}
        }
    }

    Ok((!report.is_empty()).then_some(report))
}

/// Marks everything the cloud just acknowledged.
async fn acknowledge(db: &Database, report: &StationReport) -> SyncResult<OutboxResult> {
    let mut tx = db.begin().await?;

    let readings = match report.reading_watermark() {
        Some(last) => ReadingRepository::mark_sent_up_to(&mut tx, last).await?,
        None => 0,
    };
    let electricity = match report.electricity_watermark() {
        Some(last) => ElectricityRepository::mark_sent_up_to(&mut tx, last).await?,
        None => 0,
    };
    let decisions = ReservationRepository::mark_communicated(&mut tx, &report.decided_ids()).await?;

    tx.commit().await?;

    info!(readings, electricity, decisions, "Station report acknowledged");
    Ok(OutboxResult::Delivered {
        readings,
        electricity,
        decisions,
    })
}
