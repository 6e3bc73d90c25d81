//! # Database Migrations
//!
//! Embedded SQL migrations, one set per node.
//!
//! ```text
//! migrations/
//! ├── edge/
//! │   └── 001_initial_schema.sql   reservations, spot_states, readings, ...
//! └── cloud/
//!     └── 001_initial_schema.sql   reservation_requests, spot_cache, history
//! ```
//!
//! The two schemas never share a database file. [`Schema`] picks the set.
//! **NEVER** modify an existing migration; always add a new numbered file.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

static EDGE_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/edge");
static CLOUD_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/cloud");

/// Which node's schema a database holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    Edge,
    Cloud,
}

impl Schema {
    fn migrator(self) -> &'static sqlx::migrate::Migrator {
        match self {
            Schema::Edge => &EDGE_MIGRATOR,
            Schema::Cloud => &CLOUD_MIGRATOR,
        }
    }
}

/// Runs all pending migrations for `schema`.
///
/// Idempotent: applied migrations are tracked in `_sqlx_migrations`.
pub async fn run_migrations(pool: &SqlitePool, schema: Schema) -> DbResult<()> {
    info!(?schema, "Checking for pending migrations");

    schema.migrator().run(pool).await?;

    info!(?schema, "All migrations applied successfully");
    Ok(())
}

/// Returns `(total_migrations, applied_migrations)` for diagnostics.
pub async fn migration_status(pool: &SqlitePool, schema: Schema) -> DbResult<(usize, usize)> {
    let total = schema.migrator().migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
