//! # Wire Protocol
//!
//! The two message bodies exchanged between the nodes. Each message is one
//! bare JSON object with no envelope and no version field.
//!
//! ## Message Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Dock Wire Protocol                              │
//! │                                                                         │
//! │  CLOUD → EDGE  (every dispatch interval)                               │
//! │  ───────────────────────────────────────                               │
//! │  CLOUD ───► CloudDispatch { current_market_price, reservations }       │
//! │  EDGE  ◄─── "ok"                                                       │
//! │                                                                         │
//! │  EDGE → CLOUD  (whenever there is something to report)                 │
//! │  ──────────────────────────────────────────────────────                │
//! │  EDGE  ───► StationReport { sensor_data, rejected_reservations,        │
//! │                             confirmed_reservations, electricity_info } │
//! │  CLOUD ◄─── "4"   (count of top-level report fields)                   │
//! │                                                                         │
//! │  Anything else as a reply is malformed and triggers a resend.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Map keys (reservation ids, spot ids, record ids) travel as JSON strings,
//! e.g. `{"reservations": {"1": {...}}}`. `BTreeMap` keeps the encoding
//! deterministic, so a resent message is byte-identical to the first send.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use dock_core::{
    ElectricityRecord, ElectricityView, ReservationId, ReservationRequest, SensorReading, SpotId,
};

pub use dock_core::DISPATCH_ACK;

/// Reply the cloud sends for a [`StationReport`]: the number of top-level
/// fields it processed.
pub const REPORT_ACK: &str = "4";

// =============================================================================
// Cloud → Edge
// =============================================================================

/// Market price plus every request the edge has not decided yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudDispatch {
    pub current_market_price: f64,
    pub reservations: BTreeMap<ReservationId, DispatchedReservation>,
}

/// One pending request as the edge sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedReservation {
    pub created_at: DateTime<Utc>,
    pub spot_id: SpotId,
    /// Seconds
    pub duration: i64,
}

impl CloudDispatch {
    /// Builds a dispatch from the cloud's open requests.
    pub fn new(current_market_price: f64, requests: &[ReservationRequest]) -> Self {
        let reservations = requests
            .iter()
            .map(|r| {
                (
                    r.id,
                    DispatchedReservation {
                        created_at: r.created_at,
                        spot_id: r.spot_id,
                        duration: r.duration_secs,
                    },
                )
            })
            .collect();

        CloudDispatch {
            current_market_price,
            reservations,
        }
    }
}

// =============================================================================
// Edge → Cloud
// =============================================================================

/// Readings, decisions and electricity telemetry the cloud has not seen yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationReport {
    /// Readings grouped by spot, ascending by reading id within a spot.
    pub sensor_data: BTreeMap<SpotId, Vec<ReportedReading>>,
    pub rejected_reservations: Vec<ReservationId>,
    /// Reservation id → `confirmed_at` set by the edge.
    pub confirmed_reservations: BTreeMap<ReservationId, DateTime<Utc>>,
    pub electricity_info: BTreeMap<i64, ReportedElectricity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedReading {
    pub reading_id: i64,
    pub datetime: DateTime<Utc>,
    pub is_occupied: bool,
    pub battery_level: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedElectricity {
    pub datetime: DateTime<Utc>,
    pub production: f64,
    pub feed_in: f64,
    pub self_consumption: f64,
    pub consumption_saving: f64,
    pub feed_in_revenue: f64,
}

impl ReportedElectricity {
    pub fn view(&self) -> ElectricityView {
        ElectricityView {
            production: self.production,
            feed_in: self.feed_in,
            self_consumption: self.self_consumption,
            consumption_saving: self.consumption_saving,
            feed_in_revenue: self.feed_in_revenue,
        }
    }
}

impl From<&SensorReading> for ReportedReading {
    fn from(r: &SensorReading) -> Self {
        ReportedReading {
            reading_id: r.id,
            datetime: r.taken_at,
            is_occupied: r.is_occupied,
            battery_level: r.battery_level,
        }
    }
}

impl From<&ElectricityRecord> for ReportedElectricity {
    fn from(r: &ElectricityRecord) -> Self {
        ReportedElectricity {
            datetime: r.recorded_at,
            production: r.production,
            feed_in: r.feed_in,
            self_consumption: r.self_consumption,
            consumption_saving: r.consumption_saving,
            feed_in_revenue: r.feed_in_revenue,
        }
    }
}

impl StationReport {
    /// Groups readings by spot, keeping their id order.
    pub fn push_reading(&mut self, reading: &SensorReading) {
        self.sensor_data
            .entry(reading.spot_id)
            .or_default()
            .push(reading.into());
    }

    pub fn push_electricity(&mut self, record: &ElectricityRecord) {
        self.electricity_info.insert(record.id, record.into());
    }

    /// True when there is nothing worth sending.
    pub fn is_empty(&self) -> bool {
        self.sensor_data.is_empty()
            && self.rejected_reservations.is_empty()
            && self.confirmed_reservations.is_empty()
            && self.electricity_info.is_empty()
    }

    /// Ids of every decision carried by this report.
    pub fn decided_ids(&self) -> Vec<ReservationId> {
        self.confirmed_reservations
            .keys()
            .chain(self.rejected_reservations.iter())
            .copied()
            .collect()
    }

    /// Highest reading id in the report, the acknowledgment watermark.
    pub fn reading_watermark(&self) -> Option<i64> {
        self.sensor_data
            .values()
            .flat_map(|readings| readings.iter().map(|r| r.reading_id))
            .max()
    }

    pub fn electricity_watermark(&self) -> Option<i64> {
        self.electricity_info.keys().next_back().copied()
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Encodes a message body.
pub fn to_json<T: Serialize + ?Sized>(message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Decodes a message body.
pub fn from_json<T: for<'de> Deserialize<'de>>(json: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(json)
}
