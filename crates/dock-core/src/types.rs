//! # Domain Types
//!
//! Core domain types shared by the edge and the cloud node.
//!
//! ## Who owns what
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Two views of one station                           │
//! │                                                                         │
//! │   EDGE (authoritative)                 CLOUD (cache + demand)           │
//! │   ────────────────────                 ──────────────────────           │
//! │   SpotState      ── readings ──────►   CachedSpot                       │
//! │   Reservation    ── decisions ─────►   ReservationRequest               │
//! │   SensorReading  ── audit rows ────►   spot_history                     │
//! │   ElectricityRecord ───────────────►   electricity_history              │
//! │                                                                         │
//! │                  ◄── requests + market price ──                         │
//! │                                                                         │
//! │   Neither side ever writes the other side's store. Reconciliation       │
//! │   is "apply incoming snapshot, keep local invariants".                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::reservation::remaining_secs;

/// Cloud-assigned reservation identifier, shared by both nodes.
pub type ReservationId = i64;

/// Physical spot number (0-based).
pub type SpotId = i64;

// =============================================================================
// Edge: Reservation
// =============================================================================

/// Lifecycle of a reservation as the edge sees it.
///
/// ```text
///   Requested ──► Confirmed
///       │
///       └──────► Unfeasible
/// ```
/// Both right-hand states are terminal and are entered at most once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Received from the cloud, not decided yet
    #[default]
    Requested,
    /// Attached to an occupied spot
    Confirmed,
    /// Could not be honoured
    Unfeasible,
}

impl ReservationStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Requested)
    }
}

/// A reservation request held by the edge.
///
/// ## Invariant
/// `confirmed_at.is_some()` if and only if `status == Confirmed`. The only
/// way to move out of `Requested` is [`Reservation::confirm`] or
/// [`Reservation::reject`], both of which refuse a second transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Reservation {
    /// Identifier assigned by the cloud
    #[cfg_attr(feature = "sqlx", sqlx(rename = "reservation_id"))]
    pub id: ReservationId,

    pub spot_id: SpotId,

    /// Requested validity window in seconds
    pub duration_secs: i64,

    /// When the cloud created the request
    pub created_at: DateTime<Utc>,

    /// When the edge first stored it (local expiry is measured from here)
    pub received_at: DateTime<Utc>,

    pub status: ReservationStatus,

    /// Set by the edge at confirmation time
    pub confirmed_at: Option<DateTime<Utc>>,

    /// When the terminal status was reached
    pub decided_at: Option<DateTime<Utc>>,

    /// True once the cloud acknowledged a report carrying the decision
    pub communicated: bool,
}

impl Reservation {
    /// Creates a freshly received, undecided reservation.
    pub fn received(
        id: ReservationId,
        spot_id: SpotId,
        duration_secs: i64,
        created_at: DateTime<Utc>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            spot_id,
            duration_secs,
            created_at,
            received_at,
            status: ReservationStatus::Requested,
            confirmed_at: None,
            decided_at: None,
            communicated: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReservationStatus::Requested
    }

    /// Moves the reservation to `Confirmed`, stamping `confirmed_at`.
    pub fn confirm(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_pending()?;
        self.status = ReservationStatus::Confirmed;
        self.confirmed_at = Some(at);
        self.decided_at = Some(at);
        Ok(())
    }

    /// Moves the reservation to `Unfeasible`. `confirmed_at` stays empty.
    pub fn reject(&mut self, at: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_pending()?;
        self.status = ReservationStatus::Unfeasible;
        self.decided_at = Some(at);
        Ok(())
    }

    fn ensure_pending(&self) -> CoreResult<()> {
        if self.status.is_terminal() {
            return Err(CoreError::AlreadyTerminal {
                reservation_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Edge: Spot State
// =============================================================================

/// A confirmed reservation attached to a spot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActiveReservation {
    pub reservation_id: ReservationId,
    pub valid_from: DateTime<Utc>,
    pub duration_secs: i64,
}

impl ActiveReservation {
    /// `duration − (now − valid_from)`, in whole seconds.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        remaining_secs(self.valid_from, self.duration_secs, now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining_secs(now) <= 0
    }

    pub fn valid_until(&self) -> DateTime<Utc> {
        self.valid_from + Duration::seconds(self.duration_secs)
    }
}

/// Physical state of one spot, owned by the edge.
///
/// ## Invariant
/// `active` is only ever `Some` while `is_occupied` is true, and
/// `battery_level` is `None` whenever the spot is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotState {
    pub spot_id: SpotId,
    pub is_occupied: bool,
    pub battery_level: Option<f64>,
    pub active: Option<ActiveReservation>,
    /// Last reservation that was attached here, kept after it ends
    pub last_reservation_id: Option<ReservationId>,
}

impl SpotState {
    pub fn vacant(spot_id: SpotId) -> Self {
        Self {
            spot_id,
            is_occupied: false,
            battery_level: None,
            active: None,
            last_reservation_id: None,
        }
    }

    pub fn occupied(spot_id: SpotId, battery_level: f64) -> Self {
        Self {
            is_occupied: true,
            battery_level: Some(battery_level),
            ..Self::vacant(spot_id)
        }
    }

    /// True when a new reservation may be attached.
    pub fn is_reservable(&self) -> bool {
        self.is_occupied && self.active.is_none()
    }

    /// Applies a fresh sensor reading.
    ///
    /// Physical truth wins: a spot seen empty loses its reservation no
    /// matter how much validity is left. Returns the id that was cleared.
    pub fn apply_reading(
        &mut self,
        is_occupied: bool,
        battery_level: Option<f64>,
    ) -> Option<ReservationId> {
        self.is_occupied = is_occupied;
        if is_occupied {
            self.battery_level = battery_level;
            None
        } else {
            self.battery_level = None;
            self.end_reservation()
        }
    }

    /// Attaches a confirmed reservation.
    pub fn attach(
        &mut self,
        reservation_id: ReservationId,
        valid_from: DateTime<Utc>,
        duration_secs: i64,
    ) -> CoreResult<()> {
        if !self.is_occupied {
            return Err(CoreError::SpotVacant {
                spot_id: self.spot_id,
            });
        }
        if let Some(active) = &self.active {
            return Err(CoreError::SpotAlreadyReserved {
                spot_id: self.spot_id,
                reservation_id: active.reservation_id,
            });
        }
        self.active = Some(ActiveReservation {
            reservation_id,
            valid_from,
            duration_secs,
        });
        Ok(())
    }

    pub fn remaining_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.active.map(|a| a.remaining_secs(now))
    }

    /// Clears the active reservation once its window has run out.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> Option<ReservationId> {
        match self.active {
            Some(active) if active.is_expired(now) => self.end_reservation(),
            _ => None,
        }
    }

    fn end_reservation(&mut self) -> Option<ReservationId> {
        let ended = self.active.take()?;
        self.last_reservation_id = Some(ended.reservation_id);
        Some(ended.reservation_id)
    }
}

// =============================================================================
// Edge: Telemetry
// =============================================================================

/// One spot as reported by a single sensor poll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotPoll {
    pub spot_id: SpotId,
    pub is_occupied: bool,
    pub battery_level: Option<f64>,
}

/// Everything the sensor feed reports in one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub spots: Vec<SpotPoll>,
    /// Current solar production in kW
    pub production_kw: f64,
}

impl SensorSnapshot {
    /// Number of bikes currently docked (they are the station's demand).
    pub fn occupied_count(&self) -> usize {
        self.spots.iter().filter(|s| s.is_occupied).count()
    }
}

/// A persisted occupancy reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SensorReading {
    /// Monotonic row id, used as the upload watermark
    pub id: i64,
    pub spot_id: SpotId,
    pub taken_at: DateTime<Utc>,
    pub is_occupied: bool,
    pub battery_level: Option<f64>,
    pub sent: bool,
}

/// A persisted electricity split for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ElectricityRecord {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub production: f64,
    pub feed_in: f64,
    pub self_consumption: f64,
    pub consumption_saving: f64,
    pub feed_in_revenue: f64,
    pub sent: bool,
}

// =============================================================================
// Cloud: Reservation Requests
// =============================================================================

/// Lifecycle of a request as the cloud sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Requested,
    Confirmed,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Requested)
    }
}

/// A reservation request created by the cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ReservationRequest {
    pub id: ReservationId,
    pub spot_id: SpotId,
    pub duration_secs: i64,
    pub created_at: DateTime<Utc>,
    pub status: RequestStatus,
    /// Edge-supplied confirmation time
    pub confirmed_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Cloud: Spot Cache
// =============================================================================

/// Reservation status of a cached spot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum SpotReservationStatus {
    #[default]
    NoReservation,
    Requested,
    Confirmed,
}

/// Result of merging an edge reading into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Reading was not newer than what the cache already holds
    Stale,
    Applied,
    /// Applied, and the spot's reservation was dropped because it emptied
    AppliedAndCleared(Option<ReservationId>),
}

/// The cloud's mirror of one spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CachedSpot {
    pub spot_id: SpotId,
    pub is_occupied: bool,
    pub battery_level: Option<f64>,
    pub status: SpotReservationStatus,
    pub reservation_id: Option<ReservationId>,
    pub valid_from: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
    /// Timestamp of the newest reading merged so far
    pub last_reading_at: Option<DateTime<Utc>>,
}

impl CachedSpot {
    pub fn new(spot_id: SpotId) -> Self {
        Self {
            spot_id,
            is_occupied: false,
            battery_level: None,
            status: SpotReservationStatus::NoReservation,
            reservation_id: None,
            valid_from: None,
            duration_secs: None,
            last_reading_at: None,
        }
    }

    /// A spot can take a new request when a bike is docked and nothing is pending.
    pub fn is_reservable(&self) -> bool {
        self.is_occupied && self.status == SpotReservationStatus::NoReservation
    }

    pub fn mark_requested(&mut self, reservation_id: ReservationId) {
        self.status = SpotReservationStatus::Requested;
        self.reservation_id = Some(reservation_id);
        self.valid_from = None;
        self.duration_secs = None;
    }

    pub fn attach_confirmed(
        &mut self,
        reservation_id: ReservationId,
        valid_from: DateTime<Utc>,
        duration_secs: i64,
    ) {
        self.status = SpotReservationStatus::Confirmed;
        self.reservation_id = Some(reservation_id);
        self.valid_from = Some(valid_from);
        self.duration_secs = Some(duration_secs);
    }

    pub fn clear_reservation(&mut self) -> Option<ReservationId> {
        self.status = SpotReservationStatus::NoReservation;
        self.valid_from = None;
        self.duration_secs = None;
        self.reservation_id.take()
    }

    pub fn remaining_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        match (self.status, self.valid_from, self.duration_secs) {
            (SpotReservationStatus::Confirmed, Some(from), Some(duration)) => {
                Some(remaining_secs(from, duration, now))
            }
            _ => None,
        }
    }

    /// Same expiry formula the edge uses, evaluated over cached fields.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> Option<ReservationId> {
        match self.remaining_secs(now) {
            Some(remaining) if remaining <= 0 => self.clear_reservation(),
            _ => None,
        }
    }

    /// Merges an edge reading taken at `at`.
    ///
    /// Readings not newer than `last_reading_at` are ignored, which makes a
    /// replayed report a no-op. An empty spot drops any reservation that
    /// started no later than the reading itself.
    pub fn merge_reading(
        &mut self,
        at: DateTime<Utc>,
        is_occupied: bool,
        battery_level: Option<f64>,
    ) -> MergeOutcome {
        if matches!(self.last_reading_at, Some(last) if at <= last) {
            return MergeOutcome::Stale;
        }

        self.last_reading_at = Some(at);
        self.is_occupied = is_occupied;
        self.battery_level = if is_occupied { battery_level } else { None };

        if is_occupied || self.status == SpotReservationStatus::NoReservation {
            return MergeOutcome::Applied;
        }

        match self.valid_from {
            Some(from) if from > at => MergeOutcome::Applied,
            _ => MergeOutcome::AppliedAndCleared(self.clear_reservation()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
