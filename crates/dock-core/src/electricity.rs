//! # Electricity View
//!
//! Splits the station's solar production between charging the docked bikes
//! and feeding the grid. Pure arithmetic, called once per station cycle.
//!
//! ## Rule
//! ```text
//!   demand == 0  OR  contract < market
//!        │ yes                         │ no
//!        ▼                             ▼
//!   feed in everything         self-consume min(production, demand)
//!                              feed in the surplus
//! ```
//! `consumption_saving` is what self-consumption saves at the contract price;
//! `feed_in_revenue` is what the exported energy earns at the market price.

use serde::{Deserialize, Serialize};

/// Prices in currency per kWh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tariff {
    /// Price the station pays for grid power
    pub contract_price: f64,
    /// Price the grid currently pays for exported power
    pub market_price: f64,
}

/// Result of one electricity split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElectricityView {
    pub production: f64,
    pub feed_in: f64,
    pub self_consumption: f64,
    pub consumption_saving: f64,
    pub feed_in_revenue: f64,
}

impl ElectricityView {
    /// Computes the split for `demand` (docked bikes) and `production`.
    pub fn compute(demand: f64, production: f64, tariff: Tariff) -> Self {
        let production = production.max(0.0);

        let self_consumption = if demand <= 0.0 || tariff.contract_price < tariff.market_price {
            0.0
        } else {
            production.min(demand)
        };
        let feed_in = production - self_consumption;

        Self {
            production,
            feed_in,
            self_consumption,
            consumption_saving: self_consumption * tariff.contract_price,
            feed_in_revenue: feed_in * tariff.market_price,
        }
    }
}
