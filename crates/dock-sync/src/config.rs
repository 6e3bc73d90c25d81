//! # Node Configuration
//!
//! Configuration for the edge and the cloud node. Both binaries read the same
//! file format; each only looks at its own section plus the shared ones.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DOCK_STATION_ID=station-01                                         │
//! │     DOCK_CLOUD_URL=ws://cloud.local:5555/sync                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/dock-station/station.toml (Linux)                        │
//! │     ~/Library/Application Support/com.dock.station/station.toml        │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [station]
//! id = "station-01"
//! spot_count = 5
//!
//! [sync]
//! request_timeout_ms = 2500
//! batch_size = 10
//! backoff = "none"          # none | fixed | exponential
//!
//! [edge]
//! listen_addr = "0.0.0.0:5556"
//! cloud_url = "ws://127.0.0.1:5555/sync"
//! database_path = "edge.db"
//!
//! [cloud]
//! listen_addr = "0.0.0.0:5555"
//! edge_url = "ws://127.0.0.1:5556/sync"
//! database_path = "cloud.db"
//! state_interval_ms = 5000
//!
//! [housekeeping]
//! interval_secs = 60
//! retention_secs = 300
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::transport::{BackoffSchedule, RetryPolicy};

// =============================================================================
// Station
// =============================================================================

/// Identity and size of the station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Station identifier, used in logs.
    #[serde(default = "default_station_id")]
    pub id: String,

    /// Human-readable station name.
    #[serde(default)]
    pub name: String,

    /// Number of physical spots, numbered `0..spot_count`.
    #[serde(default = "default_spot_count")]
    pub spot_count: i64,
}

fn default_station_id() -> String {
    "station-01".to_string()
}

fn default_spot_count() -> i64 {
    dock_core::DEFAULT_SPOT_COUNT
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            id: default_station_id(),
            name: "Bike Station".to_string(),
            spot_count: default_spot_count(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Backoff between lazy pirate retries, as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Reconnect and resend immediately.
    #[default]
    None,
    /// Wait `initial_backoff_ms` before every resend.
    Fixed,
    /// Exponential from `initial_backoff_ms` up to `max_backoff_secs`.
    Exponential,
}

impl std::str::FromStr for BackoffKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(BackoffKind::None),
            "fixed" => Ok(BackoffKind::Fixed),
            "exponential" => Ok(BackoffKind::Exponential),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown backoff: '{}'. Valid options: none, fixed, exponential",
                other
            ))),
        }
    }
}

/// Protocol timing shared by both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// How long to wait for a reply before reconnecting (milliseconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Readings (and electricity rows) per edge report.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Edge wait when there is nothing to report (milliseconds).
    #[serde(default = "default_idle_wait")]
    pub idle_wait_ms: u64,

    /// Pause between cloud dispatches (seconds).
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_secs: u64,

    /// Maximum send attempts per message. 0 means unbounded.
    #[serde(default)]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: BackoffKind,

    /// Initial backoff duration (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_request_timeout() -> u64 {
    2500
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_batch_size() -> u32 {
    10
}
fn default_idle_wait() -> u64 {
    1000
}
fn default_dispatch_interval() -> u64 {
    5
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            request_timeout_ms: default_request_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            batch_size: default_batch_size(),
            idle_wait_ms: default_idle_wait(),
            dispatch_interval_secs: default_dispatch_interval(),
            max_attempts: 0,
            backoff: BackoffKind::default(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Builds the transport retry policy these settings describe.
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = match self.backoff {
            BackoffKind::None => BackoffSchedule::None,
            BackoffKind::Fixed => {
                BackoffSchedule::Fixed(Duration::from_millis(self.initial_backoff_ms))
            }
            BackoffKind::Exponential => BackoffSchedule::Exponential {
                initial: Duration::from_millis(self.initial_backoff_ms),
                max: Duration::from_secs(self.max_backoff_secs),
            },
        };
        RetryPolicy {
            max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
            backoff,
        }
    }
}

// =============================================================================
// Edge Settings
// =============================================================================

/// Settings only the edge node reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSettings {
    /// Address the edge's reply server binds to (cloud → edge).
    #[serde(default = "default_edge_listen")]
    pub listen_addr: String,

    /// Cloud reply server URL (edge → cloud).
    #[serde(default = "default_cloud_url")]
    pub cloud_url: String,

    #[serde(default = "default_edge_db")]
    pub database_path: PathBuf,

    /// Pause between station cycles (seconds).
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Price the station pays for grid power (per kWh).
    #[serde(default = "default_contract_price")]
    pub contract_price: f64,

    /// Peak solar production of the simulated panel (kW).
    #[serde(default = "default_peak_production")]
    pub peak_production_kw: f64,
}

fn default_edge_listen() -> String {
    "0.0.0.0:5556".to_string()
}
fn default_cloud_url() -> String {
    "ws://127.0.0.1:5555/sync".to_string()
}
fn default_edge_db() -> PathBuf {
    PathBuf::from("edge.db")
}
fn default_cycle_interval() -> u64 {
    5
}
fn default_contract_price() -> f64 {
    0.45
}
fn default_peak_production() -> f64 {
    5.0
}

impl Default for EdgeSettings {
    fn default() -> Self {
        EdgeSettings {
            listen_addr: default_edge_listen(),
            cloud_url: default_cloud_url(),
            database_path: default_edge_db(),
            cycle_interval_secs: default_cycle_interval(),
            contract_price: default_contract_price(),
            peak_production_kw: default_peak_production(),
        }
    }
}

// =============================================================================
// Cloud Settings
// =============================================================================

/// Settings only the cloud node reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    /// Address the cloud's reply server binds to (edge → cloud).
    #[serde(default = "default_cloud_listen")]
    pub listen_addr: String,

    /// Edge reply server URL (cloud → edge).
    #[serde(default = "default_edge_url")]
    pub edge_url: String,

    #[serde(default = "default_cloud_db")]
    pub database_path: PathBuf,

    /// Pause between simulated demand rounds (seconds).
    #[serde(default = "default_demand_interval")]
    pub demand_interval_secs: u64,

    /// Pause between cached-expiry passes, each followed by the station
    /// state log (milliseconds). Runs whether or not the edge answers.
    #[serde(default = "default_state_interval")]
    pub state_interval_ms: u64,

    /// Chance that a demand round creates a reservation.
    #[serde(default = "default_reservation_probability")]
    pub reservation_probability: f64,

    #[serde(default = "default_min_duration")]
    pub min_duration_secs: i64,

    #[serde(default = "default_max_duration")]
    pub max_duration_secs: i64,

    /// Bounds of the simulated market price (per kWh).
    #[serde(default = "default_min_price")]
    pub min_market_price: f64,

    #[serde(default = "default_max_price")]
    pub max_market_price: f64,
}

fn default_cloud_listen() -> String {
    "0.0.0.0:5555".to_string()
}
fn default_edge_url() -> String {
    "ws://127.0.0.1:5556/sync".to_string()
}
fn default_cloud_db() -> PathBuf {
    PathBuf::from("cloud.db")
}
fn default_demand_interval() -> u64 {
    2
}
fn default_state_interval() -> u64 {
    5000
}
fn default_reservation_probability() -> f64 {
    0.33
}
fn default_min_duration() -> i64 {
    20
}
fn default_max_duration() -> i64 {
    50
}
fn default_min_price() -> f64 {
    0.27
}
fn default_max_price() -> f64 {
    0.68
}

impl Default for CloudSettings {
    fn default() -> Self {
        CloudSettings {
            listen_addr: default_cloud_listen(),
            edge_url: default_edge_url(),
            database_path: default_cloud_db(),
            demand_interval_secs: default_demand_interval(),
            state_interval_ms: default_state_interval(),
            reservation_probability: default_reservation_probability(),
            min_duration_secs: default_min_duration(),
            max_duration_secs: default_max_duration(),
            min_market_price: default_min_price(),
            max_market_price: default_max_price(),
        }
    }
}

// =============================================================================
// Housekeeping Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingSettings {
    /// Pause between garbage collection passes (seconds).
    #[serde(default = "default_housekeeping_interval")]
    pub interval_secs: u64,

    /// How long a decided reservation is kept after it finished (seconds).
    #[serde(default = "default_retention")]
    pub retention_secs: i64,
}

fn default_housekeeping_interval() -> u64 {
    60
}
fn default_retention() -> i64 {
    300
}

impl Default for HousekeepingSettings {
    fn default() -> Self {
        HousekeepingSettings {
            interval_secs: default_housekeeping_interval(),
            retention_secs: default_retention(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub station: StationConfig,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub edge: EdgeSettings,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub housekeeping: HousekeepingSettings,
}

impl NodeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (station.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading station config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.station.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("station.id must not be empty".into()));
        }
        if self.station.spot_count <= 0 {
            return Err(SyncError::InvalidConfig(
                "station.spot_count must be greater than 0".into(),
            ));
        }
        if self.sync.batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.batch_size must be greater than 0".into(),
            ));
        }
        if self.sync.request_timeout_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.request_timeout_ms must be greater than 0".into(),
            ));
        }

        for (name, url) in [
            ("edge.cloud_url", &self.edge.cloud_url),
            ("cloud.edge_url", &self.cloud.edge_url),
        ] {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(SyncError::InvalidUrl(format!(
                    "{} must start with ws:// or wss://, got: {}",
                    name, url
                )));
            }
            url::Url::parse(url)?;
        }

        let cloud = &self.cloud;
        if cloud.state_interval_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "cloud.state_interval_ms must be greater than 0".into(),
            ));
        }
        if cloud.min_duration_secs <= 0 || cloud.min_duration_secs > cloud.max_duration_secs {
            return Err(SyncError::InvalidConfig(format!(
                "reservation durations must satisfy 0 < min <= max, got {}..{}",
                cloud.min_duration_secs, cloud.max_duration_secs
            )));
        }
        if cloud.min_market_price < 0.0 || cloud.min_market_price > cloud.max_market_price {
            return Err(SyncError::InvalidConfig(format!(
                "market price bounds must satisfy 0 <= min <= max, got {}..{}",
                cloud.min_market_price, cloud.max_market_price
            )));
        }
        if !(0.0..=1.0).contains(&cloud.reservation_probability) {
            return Err(SyncError::InvalidConfig(
                "cloud.reservation_probability must be within [0, 1]".into(),
            ));
        }
        if self.housekeeping.retention_secs < 0 {
            return Err(SyncError::InvalidConfig(
                "housekeeping.retention_secs must not be negative".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("DOCK_STATION_ID") {
            debug!(station_id = %id, "Overriding station ID from environment");
            self.station.id = id;
        }

        if let Ok(count) = std::env::var("DOCK_SPOT_COUNT") {
            match count.parse::<i64>() {
                Ok(n) => self.station.spot_count = n,
                Err(_) => warn!(value = %count, "Ignoring invalid DOCK_SPOT_COUNT"),
            }
        }

        if let Ok(url) = std::env::var("DOCK_CLOUD_URL") {
            debug!(url = %url, "Overriding cloud URL from environment");
            self.edge.cloud_url = url;
        }

        if let Ok(url) = std::env::var("DOCK_EDGE_URL") {
            debug!(url = %url, "Overriding edge URL from environment");
            self.cloud.edge_url = url;
        }

        if let Ok(addr) = std::env::var("DOCK_EDGE_LISTEN") {
            self.edge.listen_addr = addr;
        }

        if let Ok(addr) = std::env::var("DOCK_CLOUD_LISTEN") {
            self.cloud.listen_addr = addr;
        }

        if let Ok(path) = std::env::var("DOCK_EDGE_DB") {
            self.edge.database_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("DOCK_CLOUD_DB") {
            self.cloud.database_path = PathBuf::from(path);
        }

        if let Ok(timeout) = std::env::var("DOCK_REQUEST_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.sync.request_timeout_ms = ms;
            }
        }

        if let Ok(backoff) = std::env::var("DOCK_BACKOFF") {
            match backoff.parse() {
                Ok(kind) => self.sync.backoff = kind,
                Err(e) => warn!(error = %e, "Ignoring invalid DOCK_BACKOFF"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "dock", "station")
            .map(|dirs| dirs.config_dir().join("station.toml"))
    }
}
