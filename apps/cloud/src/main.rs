//! # Dock Cloud
//!
//! Cloud node: creates simulated reservation demand, publishes the market
//! price to the station and mirrors what the station decides.
//!
//! ## Usage
//! ```bash
//! dock-cloud
//! dock-cloud ./station.toml
//! ```

mod demand;
mod market;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dock_core::{Clock, SystemClock};
use dock_db::{Database, DbConfig, Schema};
use dock_sync::{CloudAgent, NodeConfig, WsConnector};

use crate::demand::ReservationMaker;
use crate::market::RandomMarketPrice;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting Dock cloud node...");

    let config = NodeConfig::load(std::env::args().nth(1).map(PathBuf::from))?;
    info!(
        station_id = %config.station.id,
        edge = %config.cloud.edge_url,
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(config.cloud.database_path.clone(), Schema::Cloud)).await?;
    info!(path = ?config.cloud.database_path, "Cloud database ready");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let prices = RandomMarketPrice::new(
        StdRng::from_entropy(),
        config.cloud.min_market_price,
        config.cloud.max_market_price,
    );
    let edge = Arc::new(WsConnector::new(
        config.cloud.edge_url.clone(),
        config.sync.connect_timeout(),
    ));
    let maker = ReservationMaker::new(
        db.clone(),
        clock.clone(),
        StdRng::from_entropy(),
        config.cloud.reservation_probability,
        config.cloud.min_duration_secs,
        config.cloud.max_duration_secs,
    );
    let demand_period = Duration::from_secs(config.cloud.demand_interval_secs);

    let mut agent = CloudAgent::new(config, db.clone(), clock);
    // Starting the agent seeds the spot cache the demand loop reads.
    agent.start(Box::new(prices), edge).await?;

    let demand = tokio::spawn(demand_loop(maker, demand_period, agent.shutdown_signal()));

    shutdown_signal().await;

    agent.shutdown().await;
    if let Err(e) = demand.await {
        error!(error = %e, "Demand loop ended abnormally");
    }
    db.close().await;
    info!("Cloud node shutdown complete");
    Ok(())
}

async fn demand_loop<R: Rng + Send + 'static>(
    mut maker: ReservationMaker<R>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Demand loop starting");
    loop {
        if let Err(e) = maker.run_once().await {
            error!(error = %e, "Demand round failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("Demand loop stopped");
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
