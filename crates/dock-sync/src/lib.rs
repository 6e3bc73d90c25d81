//! # dock-sync: Reservation Reconciliation Engine
//!
//! This crate keeps the edge node (which owns the sensors and every
//! reservation decision) and the cloud node (which owns demand and the
//! market price) in agreement, over two independent request/reply channels.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Edge / Cloud Reconciliation                         │
//! │                                                                         │
//! │  ┌──────────────────────────────┐       ┌──────────────────────────────┐│
//! │  │          EdgeAgent           │       │          CloudAgent          ││
//! │  │                              │       │                              ││
//! │  │  StationCycle (every 5 s)    │       │  CloudDispatcher (every 5 s) ││
//! │  │   readings → decide → expire │       │   expire cache, price,       ││
//! │  │                              │       │   all `requested` requests   ││
//! │  │  EdgeInbound  ◄──────────────┼───────┼── CloudDispatch ──► "ok"     ││
//! │  │   store new ids only         │       │                              ││
//! │  │                              │       │                              ││
//! │  │  EdgeOutbox ─────────────────┼───────┼──► CloudInbound              ││
//! │  │   readings, decisions,       │ "4"   │   history, decisions,        ││
//! │  │   electricity                │       │   newest reading per spot    ││
//! │  └──────────────────────────────┘       └──────────────────────────────┘│
//! │                                                                         │
//! │  Both directions use LazyPirateClient: send, wait, and on silence       │
//! │  drop the socket, reconnect, resend the identical bytes.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - `EdgeAgent` and `CloudAgent` orchestrators
//! - [`config`] - Node configuration (TOML file plus environment overrides)
//! - [`dispatch`] - Cloud → edge dispatcher
//! - [`error`] - Sync error types
//! - [`inbound`] - Handlers for messages arriving on each node
//! - [`outbox`] - Edge → cloud uploader
//! - [`protocol`] - JSON message types
//! - [`server`] - WebSocket reply server
//! - [`station`] - The edge's sensor/decision cycle
//! - [`transport`] - Lazy pirate request client and connectors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dock_core::SystemClock;
//! use dock_db::{Database, DbConfig, Schema};
//! use dock_sync::{EdgeAgent, NodeConfig, WsConnector};
//!
//! let config = NodeConfig::load(None)?;
//! let db = Database::new(DbConfig::new(config.edge.database_path.clone(), Schema::Edge)).await?;
//! let cloud = Arc::new(WsConnector::new(&config.edge.cloud_url, config.sync.connect_timeout()));
//!
//! let mut agent = EdgeAgent::new(config, db, Arc::new(SystemClock));
//! agent.start(Box::new(sensors), cloud).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod inbound;
pub mod outbox;
pub mod protocol;
pub mod server;
pub mod station;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{CloudAgent, EdgeAgent, SyncStatus};
pub use config::{BackoffKind, NodeConfig};
pub use dispatch::{CloudDispatcher, DispatchResult, MarketPriceFeed};
pub use error::{SyncError, SyncResult};
pub use inbound::{CloudInbound, DispatchOutcome, EdgeInbound, ReportOutcome};
pub use outbox::{EdgeOutbox, OutboxResult};
pub use protocol::{CloudDispatch, StationReport};
pub use server::{ReplyServer, RequestHandler};
pub use station::{CycleReport, SensorFeed, StationCycle};
pub use transport::{Connector, LazyPirateClient, LocalConnector, RetryPolicy, WsConnector};
