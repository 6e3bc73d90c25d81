//! # Inbound Handlers
//!
//! What each node does with a request it receives.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Inbound Request Handling                            │
//! │                                                                         │
//! │  EDGE  receives CloudDispatch  ──► EdgeInbound   ──► "ok"              │
//! │    • store current_market_price                                        │
//! │    • insert each reservation unless its id is already known            │
//! │                                                                         │
//! │  CLOUD receives StationReport  ──► CloudInbound  ──► "4"               │
//! │    • audit every reading and electricity record                        │
//! │    • apply decisions to requests still in `requested`                  │
//! │    • merge the newest reading per spot into the cache                  │
//! │                                                                         │
//! │  Undecodable body or storage failure ──► "error" (client resends)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Idempotence
//! Every mutation is "set to X if not already X or terminal". Processing the
//! same body twice leaves the store exactly as processing it once, which is
//! what the lazy pirate client's resends require.

mod cloud;
mod edge;

pub use cloud::{CloudInbound, ReportOutcome};
pub use edge::{DispatchOutcome, EdgeInbound};

/// Reply for a request that could not be applied.
pub const ERROR_REPLY: &str = "error";
