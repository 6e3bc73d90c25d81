//! # Node Agents
//!
//! Wires the components of one node into background tasks.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  EdgeAgent                                                              │
//! │    ReplyServer(EdgeInbound)   ◄── CloudDispatch from the cloud         │
//! │    station loop               sensor poll → decisions, every cycle     │
//! │    outbox loop                StationReport ──► cloud                  │
//! │    housekeeping loop                                                    │
//! │                                                                         │
//! │  CloudAgent                                                             │
//! │    ReplyServer(CloudInbound)  ◄── StationReport from the edge          │
//! │    dispatch loop              CloudDispatch ──► edge                   │
//! │    station state loop         cached expiry, independent of the edge   │
//! │    housekeeping loop                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every loop is sequential; the only concurrency is between loops, and
//! each loop commits its own transactions. A failed iteration is logged
//! and retried on the next one from durable state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use dock_core::Clock;
use dock_db::housekeeping::{clean_cloud, clean_edge};
use dock_db::{Database, Schema, SpotCacheRepository};

use crate::config::NodeConfig;
use crate::dispatch::{expire_cached, CloudDispatcher, MarketPriceFeed};
use crate::error::{SyncError, SyncResult};
use crate::inbound::{CloudInbound, EdgeInbound};
use crate::outbox::{EdgeOutbox, OutboxResult};
use crate::server::{ReplyServer, RequestHandler};
use crate::station::{SensorFeed, StationCycle};
use crate::transport::{Connector, LazyPirateClient};

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    /// Whether the agent's tasks are running.
    pub running: bool,

    /// Peer the outgoing loop talks to.
    pub peer: Option<String>,

    /// Messages the peer acknowledged.
    pub delivered: u64,

    /// Last acknowledged send.
    pub last_delivery: Option<DateTime<Utc>>,

    /// Last error message (if any).
    pub last_error: Option<String>,
}

type SharedStatus = Arc<RwLock<SyncStatus>>;

async fn record_delivery(status: &SharedStatus, at: DateTime<Utc>) {
    let mut s = status.write().await;
    s.delivered += 1;
    s.last_delivery = Some(at);
    s.last_error = None;
}

async fn record_error(status: &SharedStatus, err: &SyncError) {
    status.write().await.last_error = Some(err.to_string());
}

// =============================================================================
// Shared Plumbing
// =============================================================================

/// Background tasks plus the signal that stops them.
struct Tasks {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Tasks {
    fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Tasks {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push(tokio::spawn(task));
    }

    async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "Agent task ended abnormally");
            }
        }
    }
}

/// Resolves once shutdown has been requested.
fn stopped(mut shutdown: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Binds `addr` and serves `handler` until shutdown.
async fn spawn_server<H: RequestHandler>(
    tasks: &mut Tasks,
    addr: &str,
    handler: Arc<H>,
) -> SyncResult<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| SyncError::ConnectionFailed(format!("Failed to bind to {}: {}", addr, e)))?;
    let shutdown = stopped(tasks.subscribe());

    tasks.spawn(async move {
        if let Err(e) = ReplyServer::new(handler).serve(listener, shutdown).await {
            error!(error = %e, "Reply server failed");
        }
    });
    Ok(())
}

/// Sleeps for `period`, returning `false` if shutdown came first.
async fn pause(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(period) => true,
        _ = shutdown.changed() => false,
    }
}

async fn housekeeping_loop(
    db: Database,
    clock: Arc<dyn Clock>,
    config: Arc<NodeConfig>,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_secs(config.housekeeping.interval_secs);
    let retention = chrono::Duration::seconds(config.housekeeping.retention_secs);

    while pause(period, &mut shutdown).await {
        let result = async {
            let mut tx = db.begin().await?;
            let report = match db.schema() {
                Schema::Edge => clean_edge(&mut tx, clock.now(), retention).await?,
                Schema::Cloud => clean_cloud(&mut tx, clock.now(), retention).await?,
            };
            tx.commit().await?;
            Ok::<_, SyncError>(report)
        }
        .await;

        match result {
            Ok(report) => debug!(removed = report.total(), "Housekeeping pass done"),
            Err(e) => error!(error = %e, "Housekeeping pass failed"),
        }
    }
}

// =============================================================================
// Edge Agent
// =============================================================================

/// Runs the edge node.
pub struct EdgeAgent {
    config: Arc<NodeConfig>,
    db: Database,
    clock: Arc<dyn Clock>,
    status: SharedStatus,
    tasks: Tasks,
}

impl EdgeAgent {
    pub fn new(config: NodeConfig, db: Database, clock: Arc<dyn Clock>) -> Self {
        EdgeAgent {
            config: Arc::new(config),
            db,
            clock,
            status: Arc::new(RwLock::new(SyncStatus::default())),
            tasks: Tasks::new(),
        }
    }

    /// Returns the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Starts the reply server and the station, outbox and housekeeping loops.
    pub async fn start(
        &mut self,
        feed: Box<dyn SensorFeed>,
        cloud: Arc<dyn Connector>,
    ) -> SyncResult<()> {
        self.config.validate()?;
        let config = self.config.clone();

        info!(
            station_id = %config.station.id,
            listen = %config.edge.listen_addr,
            cloud = %cloud.peer(),
            "Starting edge agent"
        );

        let inbound = Arc::new(EdgeInbound::new(
            self.db.clone(),
            self.clock.clone(),
            config.station.spot_count,
        ));
        spawn_server(&mut self.tasks, &config.edge.listen_addr, inbound).await?;

        let cycle = StationCycle::new(
            self.db.clone(),
            self.clock.clone(),
            config.station.spot_count,
            config.edge.contract_price,
        );
        let period = Duration::from_secs(config.edge.cycle_interval_secs);
        self.tasks
            .spawn(station_loop(cycle, feed, period, self.tasks.subscribe()));

        let peer = cloud.peer();
        let client = LazyPirateClient::new(
            cloud,
            config.sync.request_timeout(),
            config.sync.retry_policy(),
        );
        let outbox = EdgeOutbox::new(
            self.db.clone(),
            client,
            config.sync.batch_size,
            Duration::from_millis(config.sync.idle_wait_ms),
        );
        self.tasks.spawn(outbox_loop(
            outbox,
            self.clock.clone(),
            self.status.clone(),
            self.tasks.subscribe(),
        ));

        self.tasks.spawn(housekeeping_loop(
            self.db.clone(),
            self.clock.clone(),
            config,
            self.tasks.subscribe(),
        ));

        {
            let mut s = self.status.write().await;
            s.running = true;
            s.peer = Some(peer);
        }

        info!("Edge agent started");
        Ok(())
    }

    /// Stops every task and waits for them to finish.
    pub async fn shutdown(&mut self) {
        info!("Shutting down edge agent");
        self.tasks.stop().await;
        self.status.write().await.running = false;
        info!("Edge agent stopped");
    }
}

async fn station_loop(
    cycle: StationCycle,
    mut feed: Box<dyn SensorFeed>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Station loop starting");
    loop {
        if let Err(e) = cycle.run_once(feed.as_mut()).await {
            error!(error = %e, "Station cycle failed, nothing was committed");
        }
        if !pause(period, &mut shutdown).await {
            break;
        }
    }
    info!("Station loop stopped");
}

async fn outbox_loop(
    mut outbox: EdgeOutbox,
    clock: Arc<dyn Clock>,
    status: SharedStatus,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Outbox loop starting");
    loop {
        let result = tokio::select! {
            result = outbox.run_once() => result,
            _ = shutdown.changed() => break,
        };

        let wait = match result {
            Ok(OutboxResult::Delivered { .. }) => {
                record_delivery(&status, clock.now()).await;
                continue;
            }
            Ok(OutboxResult::Idle) => outbox.idle_wait(),
            Err(e) => {
                error!(error = %e, "Station report not delivered");
                record_error(&status, &e).await;
                outbox.idle_wait()
            }
        };

        if !pause(wait, &mut shutdown).await {
            break;
        }
    }
    info!("Outbox loop stopped");
}

// =============================================================================
// Cloud Agent
// =============================================================================

/// Runs the cloud node.
pub struct CloudAgent {
    config: Arc<NodeConfig>,
    db: Database,
    clock: Arc<dyn Clock>,
    status: SharedStatus,
    tasks: Tasks,
}

impl CloudAgent {
    pub fn new(config: NodeConfig, db: Database, clock: Arc<dyn Clock>) -> Self {
        CloudAgent {
            config: Arc::new(config),
            db,
            clock,
            status: Arc::new(RwLock::new(SyncStatus::default())),
            tasks: Tasks::new(),
        }
    }

    /// Returns the current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// A receiver that flips to `true` on shutdown, for tasks the binary
    /// runs next to the agent.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.tasks.subscribe()
    }

    /// Starts the reply server and the dispatch, station state and
    /// housekeeping loops.
    pub async fn start(
        &mut self,
        prices: Box<dyn MarketPriceFeed>,
        edge: Arc<dyn Connector>,
    ) -> SyncResult<()> {
        self.config.validate()?;
        let config = self.config.clone();

        info!(
            station_id = %config.station.id,
            listen = %config.cloud.listen_addr,
            edge = %edge.peer(),
            "Starting cloud agent"
        );

        {
            let mut conn = self.db.acquire().await?;
            let created = SpotCacheRepository::ensure_spots(&mut conn, config.station.spot_count).await?;
            debug!(created, "Spot cache ready");
        }

        let inbound = Arc::new(CloudInbound::new(
            self.db.clone(),
            self.clock.clone(),
            config.station.spot_count,
        ));
        spawn_server(&mut self.tasks, &config.cloud.listen_addr, inbound).await?;

        let peer = edge.peer();
        let client = LazyPirateClient::new(
            edge,
            config.sync.request_timeout(),
            config.sync.retry_policy(),
        );
        let dispatcher = CloudDispatcher::new(self.db.clone(), client, prices);
        self.tasks.spawn(dispatch_loop(
            dispatcher,
            Duration::from_secs(config.sync.dispatch_interval_secs),
            self.clock.clone(),
            self.status.clone(),
            self.tasks.subscribe(),
        ));

        self.tasks.spawn(station_state_loop(
            self.db.clone(),
            self.clock.clone(),
            Duration::from_millis(config.cloud.state_interval_ms),
            self.tasks.subscribe(),
        ));

        self.tasks.spawn(housekeeping_loop(
            self.db.clone(),
            self.clock.clone(),
            config,
            self.tasks.subscribe(),
        ));

        {
            let mut s = self.status.write().await;
            s.running = true;
            s.peer = Some(peer);
        }

        info!("Cloud agent started");
        Ok(())
    }

    /// Stops every task and waits for them to finish.
    pub async fn shutdown(&mut self) {
        info!("Shutting down cloud agent");
        self.tasks.stop().await;
        self.status.write().await.running = false;
        info!("Cloud agent stopped");
    }
}

async fn dispatch_loop(
    mut dispatcher: CloudDispatcher,
    period: Duration,
    clock: Arc<dyn Clock>,
    status: SharedStatus,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Dispatch loop starting");
    loop {
        if !pause(period, &mut shutdown).await {
            break;
        }

        let result = tokio::select! {
            result = dispatcher.run_once() => result,
            _ = shutdown.changed() => break,
        };

        match result {
            Ok(sent) => {
                debug!(reservations = sent.reservations_sent, "Dispatch acknowledged");
                record_delivery(&status, clock.now()).await;
            }
            Err(e) => {
                error!(error = %e, "Dispatch not delivered");
                record_error(&status, &e).await;
            }
        }
    }
    info!("Dispatch loop stopped");
}

/// Expires cached reservations on a timer of its own, so a dispatch stuck
/// resending to a silent edge cannot keep a finished window visible.
async fn station_state_loop(
    db: Database,
    clock: Arc<dyn Clock>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Station state loop starting");
    loop {
        match expire_cached(&db, clock.now()).await {
            Ok(0) => {}
            Ok(expired) => debug!(expired, "Cached reservations expired"),
            Err(e) => error!(error = %e, "Cached expiry failed"),
        }
        if !pause(period, &mut shutdown).await {
            break;
        }
    }
    info!("Station state loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use dock_core::{ManualClock, SensorSnapshot, SpotPoll, SpotReservationStatus, SystemClock};
    use dock_db::DbConfig;

    use crate::protocol::{self, StationReport, REPORT_ACK};
    use crate::transport::LocalConnector;

    #[derive(Default)]
    struct CloudStandIn(Mutex<Vec<StationReport>>);

    #[async_trait]
    impl RequestHandler for CloudStandIn {
        async fn handle(&self, request: &str) -> String {
            match protocol::from_json(request) {
                Ok(report) => {
                    self.0.lock().unwrap().push(report);
                    REPORT_ACK.to_string()
                }
                Err(_) => "error".to_string(),
            }
        }
    }

    /// An edge that accepts requests and never answers.
    struct SilentEdge;

    #[async_trait]
    impl RequestHandler for SilentEdge {
        async fn handle(&self, _request: &str) -> String {
            std::future::pending().await
        }
    }

    struct FixedPrice;

    impl MarketPriceFeed for FixedPrice {
        fn current_price(&mut self) -> f64 {
            0.5
        }
    }

    struct AllOccupied;

    impl SensorFeed for AllOccupied {
        fn poll(&mut self, _now: DateTime<Utc>) -> SensorSnapshot {
            SensorSnapshot {
                spots: (0..5)
                    .map(|spot_id| SpotPoll {
                        spot_id,
                        is_occupied: true,
                        battery_level: Some(0.8),
                    })
                    .collect(),
                production_kw: 0.0,
            }
        }
    }

    #[tokio::test]
    async fn test_edge_agent_reports_first_cycle_and_stops() {
        let mut config = NodeConfig::default();
        config.edge.listen_addr = "127.0.0.1:0".into();
        config.sync.idle_wait_ms = 20;

        let db = Database::new(DbConfig::in_memory(Schema::Edge)).await.unwrap();
        let cloud = Arc::new(CloudStandIn::default());
        let mut agent = EdgeAgent::new(config, db, Arc::new(SystemClock));

        agent
            .start(Box::new(AllOccupied), Arc::new(LocalConnector::new(cloud.clone())))
            .await
            .unwrap();
        assert!(agent.status().await.running);

        for _ in 0..200 {
            if agent.status().await.delivered > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        agent.shutdown().await;

        let status = agent.status().await;
        assert!(!status.running);
        assert!(status.delivered >= 1);
        assert_eq!(status.peer.as_deref(), Some("local"));

        let reports = cloud.0.lock().unwrap();
        assert_eq!(reports[0].sensor_data.len(), 5);
    }

    #[tokio::test]
    async fn test_cloud_expires_cache_while_edge_is_silent() {
        let t0 = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = ManualClock::new(t0);

        let mut config = NodeConfig::default();
        config.cloud.listen_addr = "127.0.0.1:0".into();
        config.cloud.state_interval_ms = 20;
        config.sync.dispatch_interval_secs = 0;

        let db = Database::new(DbConfig::in_memory(Schema::Cloud)).await.unwrap();
        {
            let mut conn = db.acquire().await.unwrap();
            SpotCacheRepository::ensure_spots(&mut conn, 5).await.unwrap();
            let mut spot = SpotCacheRepository::get_or_new(&mut conn, 1).await.unwrap();
            spot.merge_reading(t0, true, Some(0.7));
            spot.attach_confirmed(1, t0, 30);
            SpotCacheRepository::save(&mut conn, &spot).await.unwrap();
        }

        let mut agent = CloudAgent::new(config, db.clone(), Arc::new(clock.clone()));
        agent
            .start(Box::new(FixedPrice), Arc::new(LocalConnector::new(Arc::new(SilentEdge))))
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(200));

        let mut cleared = None;
        for _ in 0..200 {
            let spot = {
                let mut conn = db.acquire().await.unwrap();
                SpotCacheRepository::get(&mut conn, 1).await.unwrap().unwrap()
            };
            if spot.status == SpotReservationStatus::NoReservation {
                cleared = Some(spot);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The dispatch is still waiting on the edge.
        assert_eq!(agent.status().await.delivered, 0);
        agent.shutdown().await;

        let spot = cleared.expect("cached reservation was never expired");
        assert_eq!(spot.reservation_id, None);
        assert!(spot.is_occupied);
    }
}
