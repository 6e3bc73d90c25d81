//! # Cloud Dispatcher
//!
//! Pushes the market price and every undecided request to the edge.
//!
//! ```text
//!   CloudDispatch { price, all `requested` requests } ──► edge ──► "ok"
//! ```
//!
//! A dispatch can block for as long as the edge stays silent, so cached
//! expiry lives in [`expire_cached`], which the cloud agent runs on its own
//! timer.
//!
//! Requests stay `requested` after the ack and are resent every dispatch
//! until a station report carries their decision. The edge ignores ids it
//! already knows, so the resend costs bandwidth but never a second decision.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use dock_core::DISPATCH_ACK;
use dock_db::{Database, RequestRepository, SpotCacheRepository};

use crate::error::SyncResult;
use crate::protocol::CloudDispatch;
use crate::transport::LazyPirateClient;

/// Source of the current electricity market price (per kWh).
pub trait MarketPriceFeed: Send {
    fn current_price(&mut self) -> f64;
}

/// Result of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchResult {
    pub reservations_sent: usize,
    pub market_price: f64,
}

/// Cloud → edge sender.
pub struct CloudDispatcher {
    db: Database,
    client: LazyPirateClient,
    prices: Box<dyn MarketPriceFeed>,
}

impl CloudDispatcher {
    pub fn new(db: Database, client: LazyPirateClient, prices: Box<dyn MarketPriceFeed>) -> Self {
        CloudDispatcher { db, client, prices }
    }

    /// One full dispatch.
    pub async fn run_once(&mut self) -> SyncResult<DispatchResult> {
        let market_price = self.prices.current_price();
        let requests = {
            let mut conn = self.db.acquire().await?;
            RequestRepository::requested_by_creation(&mut conn).await?
        };

        let dispatch = CloudDispatch::new(market_price, &requests);
        debug!(
            market_price,
            reservations = requests.len(),
            "Dispatching to station"
        );
        self.client.send_and_await(&dispatch, DISPATCH_ACK).await?;

        Ok(DispatchResult {
            reservations_sent: requests.len(),
            market_price,
        })
    }
}

/// Clears cached reservations whose window has run out (same formula as
/// the edge, no message needed) and logs every spot.
pub async fn expire_cached(db: &Database, now: DateTime<Utc>) -> SyncResult<usize> {
    let mut expired = 0;
    let mut tx = db.begin().await?;

    let mut spots = SpotCacheRepository::list(&mut tx).await?;
    for spot in &mut spots {
        if let Some(reservation_id) = spot.expire_if_due(now) {
            info!(spot_id = spot.spot_id, reservation_id, "Cached reservation expired");
            SpotCacheRepository::save(&mut tx, spot).await?;
            expired += 1;
        }
    }
    tx.commit().await?;

    for spot in &spots {
        info!(
            spot_id = spot.spot_id,
            occupied = spot.is_occupied,
            battery = ?spot.battery_level,
            status = ?spot.status,
            reservation_id = ?spot.reservation_id,
            remaining_secs = ?spot.remaining_secs(now),
            "Station state"
        );
    }
    Ok(expired)
}
