//! # Dock Edge
//!
//! Station node: polls the (simulated) spot sensors, decides reservations
//! and keeps the cloud informed.
//!
//! ## Usage
//! ```bash
//! # Default config location, RUST_LOG=info
//! dock-edge
//!
//! # Explicit config file
//! dock-edge ./station.toml
//! ```

mod sensors;

use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dock_core::{Clock, SystemClock};
use dock_db::{Database, DbConfig, Schema};
use dock_sync::{EdgeAgent, NodeConfig, WsConnector};

use crate::sensors::SimulatedSensors;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting Dock edge node...");

    let config = NodeConfig::load(std::env::args().nth(1).map(PathBuf::from))?;
    info!(
        station_id = %config.station.id,
        spots = config.station.spot_count,
        cloud = %config.edge.cloud_url,
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(config.edge.database_path.clone(), Schema::Edge)).await?;
    info!(path = ?config.edge.database_path, "Edge database ready");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sensors = SimulatedSensors::new(
        StdRng::from_entropy(),
        config.station.spot_count,
        config.edge.peak_production_kw,
        clock.now(),
    );
    let cloud = Arc::new(WsConnector::new(
        config.edge.cloud_url.clone(),
        config.sync.connect_timeout(),
    ));

    let mut agent = EdgeAgent::new(config, db.clone(), clock);
    agent.start(Box::new(sensors), cloud).await?;

    shutdown_signal().await;

    agent.shutdown().await;
    db.close().await;
    info!("Edge node shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
