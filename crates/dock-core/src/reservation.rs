//! # Reservation Decision Engine
//!
//! The edge alone knows whether a bike is really docked, so the edge alone
//! decides whether a cloud request can be honoured.
//!
//! ## Decision Flow (per pending request, in receipt order)
//! ```text
//!            pending request
//!                  │
//!                  ▼
//!   ┌──────────────────────────────┐  yes
//!   │ waited longer than duration? ├──────► Reject(RequestExpired)
//!   └──────────────┬───────────────┘
//!                  │ no
//!                  ▼
//!   ┌──────────────────────────────┐  no
//!   │ spot occupied?               ├──────► Reject(SpotVacant)
//!   └──────────────┬───────────────┘
//!                  │ yes
//!                  ▼
//!   ┌──────────────────────────────┐  yes
//!   │ spot already has a booking?  ├──────► Reject(SpotAlreadyReserved)
//!   └──────────────┬───────────────┘
//!                  │ no
//!                  ▼
//!       Confirm { valid_from: now, duration }
//! ```
//!
//! [`decide`] is a pure function. Applying the decision (stamping the
//! reservation, attaching it to the spot, persisting both) is the caller's
//! job, so the first confirmed request for a spot wins and every later one
//! sees the spot as already reserved.

use chrono::{DateTime, Utc};

use crate::types::{Reservation, SpotState};

/// Outcome of evaluating one pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Confirm {
        valid_from: DateTime<Utc>,
        duration_secs: i64,
    },
    Reject(RejectReason),
}

/// Why a request was marked unfeasible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The request sat on the edge longer than its own duration
    RequestExpired,
    /// No bike on the spot
    SpotVacant,
    /// Another reservation is already attached
    SpotAlreadyReserved,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::RequestExpired => "request_expired",
            RejectReason::SpotVacant => "spot_vacant",
            RejectReason::SpotAlreadyReserved => "spot_already_reserved",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `duration − (now − start)` in whole seconds.
///
/// Shared by both nodes so they reach the same expiry verdict without
/// exchanging a message.
pub fn remaining_secs(start: DateTime<Utc>, duration_secs: i64, now: DateTime<Utc>) -> i64 {
    duration_secs - (now - start).num_seconds()
}

/// Decides one pending request against the current state of its spot.
pub fn decide(reservation: &Reservation, spot: &SpotState, now: DateTime<Utc>) -> Decision {
    if remaining_secs(reservation.received_at, reservation.duration_secs, now) <= 0 {
        return Decision::Reject(RejectReason::RequestExpired);
    }
    if !spot.is_occupied {
        return Decision::Reject(RejectReason::SpotVacant);
    }
    if spot.active.is_some() {
        return Decision::Reject(RejectReason::SpotAlreadyReserved);
    }
    Decision::Confirm {
        valid_from: now,
        duration_secs: reservation.duration_secs,
    }
}
