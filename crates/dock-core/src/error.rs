//! # Error Types
//!
//! Domain-specific error types for dock-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  dock-core errors (this file)                                          │
//! │  ├── CoreError        - Reservation / spot rule violations             │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  dock-db errors (separate crate)                                       │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  dock-sync errors (separate crate)                                     │
//! │  └── SyncError        - Transport, protocol, config failures           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError → logs        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A rejected reservation is NOT an error: it is the `Unfeasible` branch of
//! the decision engine. The variants below only fire when a caller tries to
//! break an invariant.

use thiserror::Error;

use crate::types::{ReservationId, ReservationStatus, SpotId};

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Reservation already reached a terminal status.
    ///
    /// ## When This Occurs
    /// - A duplicate decision pass tries to decide the same request again
    /// - Confirm after reject (or the other way round)
    #[error("Reservation {reservation_id} is already {status:?}")]
    AlreadyTerminal {
        reservation_id: ReservationId,
        status: ReservationStatus,
    },

    /// Attempt to attach a reservation to an empty spot.
    #[error("Spot {spot_id} is not occupied")]
    SpotVacant { spot_id: SpotId },

    /// Attempt to attach a second reservation to a spot.
    #[error("Spot {spot_id} already holds reservation {reservation_id}")]
    SpotAlreadyReserved {
        spot_id: SpotId,
        reservation_id: ReservationId,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Value must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Integer value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Fractional value is out of range.
    #[error("{field} must be within [{min}, {max}], got {value}")]
    FractionOutOfRange {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },

    /// Floating point value is NaN or infinite.
    #[error("{field} must be a finite number")]
    NotFinite { field: String },
}
