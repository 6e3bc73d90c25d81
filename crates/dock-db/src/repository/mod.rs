//! # Repository Module
//!
//! Database repositories for both nodes.
//!
//! ## Connection-scoped repositories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Station cycle (one transaction)                                        │
//! │                                                                         │
//! │  let mut tx = db.begin().await?;                                       │
//! │       │                                                                 │
//! │       ├── SpotRepository::save(&mut tx, ..)                            │
//! │       ├── ReadingRepository::insert(&mut tx, ..)                       │
//! │       ├── ReservationRepository::mark_confirmed(&mut tx, ..)           │
//! │       ├── SpotRepository::attach(&mut tx, ..)                          │
//! │       └── ElectricityRepository::insert(&mut tx, ..)                   │
//! │       │                                                                 │
//! │  tx.commit().await?;   ← all or nothing                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! Repositories hold no pool. Every method borrows a `SqliteConnection`,
//! which a `Transaction` or a `PoolConnection` both deref to.
//!
//! ## Available Repositories
//!
//! Edge: [`ReservationRepository`], [`SpotRepository`],
//! [`ReadingRepository`], [`ElectricityRepository`], [`SettingsRepository`]
//!
//! Cloud: [`RequestRepository`], [`SpotCacheRepository`], [`HistoryRepository`]

pub mod history;
pub mod request;
pub mod reservation;
pub mod settings;
pub mod spot;
pub mod spot_cache;
pub mod telemetry;

pub use history::HistoryRepository;
pub use request::RequestRepository;
pub use reservation::ReservationRepository;
pub use settings::{SettingsRepository, MARKET_PRICE};
pub use spot::SpotRepository;
pub use spot_cache::SpotCacheRepository;
pub use telemetry::{ElectricityRepository, ReadingRepository};
