//! # dock-core: Pure Domain Logic for the Dock Station
//!
//! This crate holds every rule of the reservation protocol that can be
//! expressed without touching a database or a socket.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Dock Station Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────┐               ┌──────────────────────┐       │
//! │  │      dock-edge       │   JSON / WS   │      dock-cloud      │       │
//! │  │  sensors, decisions  │◄─────────────►│  demand, price, cache│       │
//! │  └──────────┬───────────┘               └──────────┬───────────┘       │
//! │             │                                      │                    │
//! │  ┌──────────▼──────────────────────────────────────▼───────────────┐   │
//! │  │                     dock-sync (protocol engine)                  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ dock-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────┐ │   │
//! │  │   │   types   │  │ reservation │  │ electricity │  │  clock  │ │   │
//! │  │   │ SpotState │  │   decide    │  │  Electricity│  │ Manual  │ │   │
//! │  │   │Reservation│  │   expiry    │  │  View       │  │ System  │ │   │
//! │  │   └───────────┘  └─────────────┘  └─────────────┘  └─────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    dock-db (Database Layer)                     │   │
//! │  │          edge + cloud SQLite schemas, repositories              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Reservations, spot state, readings, telemetry
//! - [`reservation`] - The edge decision engine and expiry arithmetic
//! - [`electricity`] - Feed-in versus self-consumption split
//! - [`clock`] - Injectable wall clock (real or simulated)
//! - [`validation`] - Input checks for incoming requests and readings
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use dock_core::reservation::{decide, Decision};
//! use dock_core::types::{Reservation, SpotState};
//!
//! let now = Utc::now();
//! let request = Reservation::received(1, 3, 30, now, now);
//! let spot = SpotState::occupied(3, 0.5);
//!
//! assert!(matches!(decide(&request, &spot, now), Decision::Confirm { .. }));
//!
//! // A free spot can never be reserved
//! let free = SpotState::vacant(3);
//! assert!(matches!(decide(&request, &free, now + Duration::seconds(1)), Decision::Reject(_)));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod electricity;
pub mod error;
pub mod reservation;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use electricity::{ElectricityView, Tariff};
pub use error::{CoreError, CoreResult, ValidationError};
pub use reservation::{decide, remaining_secs, Decision, RejectReason};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Literal acknowledgment the edge returns for a cloud dispatch.
pub const DISPATCH_ACK: &str = "ok";

/// Number of spots a station has when nothing else is configured.
pub const DEFAULT_SPOT_COUNT: i64 = 5;

/// Battery charge gained per second while a bike sits on a spot.
pub const BATTERY_CHARGE_PER_SEC: f64 = 0.0033;
