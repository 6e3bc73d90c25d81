//! # Validation Module
//!
//! Input checks applied before anything reaches the decision engine or the
//! database. Incoming cloud requests are validated on the edge; readings are
//! validated before they are persisted.
//!
//! ```rust
//! use dock_core::validation::{validate_duration, validate_spot_id};
//!
//! assert!(validate_duration(30).is_ok());
//! assert!(validate_duration(0).is_err());
//! assert!(validate_spot_id(4, 5).is_ok());
//! assert!(validate_spot_id(5, 5).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::SpotId;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Reservation durations are whole seconds and must be positive.
pub fn validate_duration(duration_secs: i64) -> ValidationResult<()> {
    if duration_secs <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "duration".to_string(),
        });
    }
    Ok(())
}

/// Spots are numbered `0..spot_count`.
pub fn validate_spot_id(spot_id: SpotId, spot_count: i64) -> ValidationResult<()> {
    if !(0..spot_count).contains(&spot_id) {
        return Err(ValidationError::OutOfRange {
            field: "spot_id".to_string(),
            min: 0,
            max: spot_count - 1,
        });
    }
    Ok(())
}

/// Battery level is a fraction in `[0, 1]`; absent for an empty spot.
pub fn validate_battery_level(level: Option<f64>) -> ValidationResult<()> {
    let Some(value) = level else {
        return Ok(());
    };
    if !value.is_finite() {
        return Err(ValidationError::NotFinite {
            field: "battery_level".to_string(),
        });
    }
    if !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::FractionOutOfRange {
            field: "battery_level".to_string(),
            min: 0.0,
            max: 1.0,
            value,
        });
    }
    Ok(())
}

/// Prices are per kWh, finite and non-negative.
pub fn validate_price(field: &str, price: f64) -> ValidationResult<()> {
    if !price.is_finite() {
        return Err(ValidationError::NotFinite {
            field: field.to_string(),
        });
    }
    if price < 0.0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a reservation request as received from the cloud.
pub fn validate_request(
    spot_id: SpotId,
    duration_secs: i64,
    spot_count: i64,
) -> ValidationResult<()> {
    validate_spot_id(spot_id, spot_count)?;
    validate_duration(duration_secs)
}
