//! # Database Cleaner
//!
//! Runs one housekeeping pass against an edge or cloud database on demand.
//!
//! ## Usage
//! ```bash
//! # Clean the edge database
//! cargo run -p dock-db --bin dock-clean -- --edge ./edge.db
//!
//! # Clean the cloud database, dropping everything finished
//! cargo run -p dock-db --bin dock-clean -- --cloud ./cloud.db --retention-secs 0
//! ```

use chrono::{Duration, Utc};
use std::env;
use dock_db::housekeeping::{clean_cloud, clean_edge};
use dock_db::{Database, DbConfig, Schema};

/// Same retention the agents use by default.
const DEFAULT_RETENTION_SECS: i64 = 300;

fn print_help() {
    println!("Dock Station Database Cleaner");
    println!();
    println!("Usage: dock-clean (--edge <PATH> | --cloud <PATH>) [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --edge <PATH>            Edge database file");
    println!("  --cloud <PATH>           Cloud database file");
    println!("  --retention-secs <N>     Keep decided reservations this long (default: 300)");
    println!("  -h, --help               Show this help message");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    let mut target: Option<(Schema, String)> = None;
    let mut retention_secs = DEFAULT_RETENTION_SECS;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--edge" | "--cloud" => {
                if i + 1 < args.len() {
                    let schema = if args[i] == "--edge" {
                        Schema::Edge
                    } else {
                        Schema::Cloud
                    };
                    target = Some((schema, args[i + 1].clone()));
                    i += 1;
                }
            }
            "--retention-secs" => {
                if i + 1 < args.len() {
                    retention_secs = args[i + 1].parse().unwrap_or(DEFAULT_RETENTION_SECS);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let Some((schema, db_path)) = target else {
        print_help();
        return Err("one of --edge or --cloud is required".into());
    };

    println!("Dock Station Database Cleaner");
    println!("=============================");
    println!("Database:  {} ({:?})", db_path, schema);
    println!("Retention: {}s", retention_secs);
    println!();

    let db = Database::new(DbConfig::new(&db_path, schema)).await?;
    let mut tx = db.begin().await?;

    let now = Utc::now();
    let retention = Duration::seconds(retention_secs);
    let report = match schema {
        Schema::Edge => clean_edge(&mut tx, now, retention).await?,
        Schema::Cloud => clean_cloud(&mut tx, now, retention).await?,
    };
    tx.commit().await?;

    println!("✓ Sensor readings removed:     {}", report.readings);
    println!("✓ Electricity records removed: {}", report.electricity);
    println!("✓ Reservations removed:        {}", report.reservations);

    db.close().await;
    Ok(())
}
