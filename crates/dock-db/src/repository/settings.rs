//! # Settings Repository (edge)
//!
//! Named numeric values pushed by the cloud. Today that is only the market
//! price, which feeds the electricity view.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::error::DbResult;

/// Setting name under which the latest market price is stored.
pub const MARKET_PRICE: &str = "current_market_price";

pub struct SettingsRepository;

impl SettingsRepository {
    pub async fn get_real(conn: &mut SqliteConnection, name: &str) -> DbResult<Option<f64>> {
        let value: Option<f64> =
            sqlx::query_scalar("SELECT real_value FROM settings WHERE name = ?1")
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(value)
    }

    /// Upserts a value. Setting the same value twice is a no-op in effect.
    pub async fn set_real(
        conn: &mut SqliteConnection,
        name: &str,
        value: f64,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (name, real_value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT (name) DO UPDATE SET
                real_value = excluded.real_value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(value)
        .bind(at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}
