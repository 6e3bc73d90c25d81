//! # dock-db: Database Layer for the Dock Station
//!
//! SQLite persistence for both nodes. The edge and the cloud each own one
//! database file with their own schema; neither ever opens the other's.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Dock Station Data Flow                           │
//! │                                                                         │
//! │  dock-sync (station cycle, inbound handlers, outbox, dispatcher)       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     dock-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ Reservation   │    │ edge/001     │  │   │
//! │  │   │ SqlitePool    │    │ Spot, Reading │    │ cloud/001    │  │   │
//! │  │   │ begin/acquire │◄───│ Request, Cache│    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   housekeeping: garbage collection for both schemas             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌──────────────────────────┐        ┌──────────────────────────┐      │
//! │  │  edge.db  (Schema::Edge) │        │ cloud.db (Schema::Cloud) │      │
//! │  └──────────────────────────┘        └──────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//! - [`housekeeping`] - Garbage collection of processed rows
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dock_db::{Database, DbConfig, Schema, SpotRepository};
//!
//! let db = Database::new(DbConfig::new("edge.db", Schema::Edge)).await?;
//!
//! let mut tx = db.begin().await?;
//! let spots = SpotRepository::list(&mut tx).await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod housekeeping;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use migrations::Schema;
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::{
    ElectricityRepository, HistoryRepository, ReadingRepository, RequestRepository,
    ReservationRepository, SettingsRepository, SpotCacheRepository, SpotRepository, MARKET_PRICE,
};
