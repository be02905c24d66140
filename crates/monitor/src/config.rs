//! # Monitor Configuration
//!
//! [`MonitorConfig`] gathers every tunable of the discovery pipeline.
//!
//! ## Sources
//!
//! Defaults are deterministic and never read the environment.
//! [`MonitorConfig::from_env`] overlays `FLEET_*` variables on top of them:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `FLEET_DIRECTORY_URL` | `directory_url` | none |
//! | `FLEET_NETWORK` | `directory_url` (preset) | none |
//! | `FLEET_POLL_INTERVAL_MS` | `poll_interval` | 5000 |
//! | `FLEET_REDISCOVERY_INTERVAL_MS` | `rediscovery_interval` | 60000 |
//! | `FLEET_REPLICATION_FACTOR` | `replication_factor` | 3 |
//! | `FLEET_TOTAL_CELLS` | `total_cells` | 64 |
//! | `FLEET_SIMULATE` | `simulate` | false |
//! | `FLEET_SIMULATED_NODES` | `simulated_nodes` | 6 |
//! | `FLEET_OFFLINE_CHANCE` | `faults.offline_chance` | 0.02 |
//! | `FLEET_DEGRADED_CHANCE` | `faults.degraded_chance` | 0.05 |
//! | `FLEET_LATENCY_SPIKE_CHANCE` | `faults.latency_spike_chance` | 0.05 |
//! | `FLEET_PACKET_LOSS_CHANCE` | `faults.packet_loss_chance` | 0.05 |
//! | `FLEET_ENDPOINTS_FILE` | `endpoints_file` | none (memory only) |
//! | `FLEET_TIME_SERIES_POINTS` | `time_series_points` | 60 |
//! | `FLEET_PROBE_LOCAL` | `probe.always` | false |
//!
//! An explicit `FLEET_DIRECTORY_URL` wins over a `FLEET_NETWORK` preset.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::simulation::FaultConfig;

// ════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_REDISCOVERY_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_REPLICATION_FACTOR: usize = 3;
pub const DEFAULT_TOTAL_CELLS: u32 = 64;
pub const DEFAULT_SIMULATED_NODES: usize = 6;
pub const DEFAULT_TIME_SERIES_POINTS: usize = 60;

/// Upper bound for a single metrics request.
pub const METRICS_TIMEOUT_MS: u64 = 3_000;
/// Upper bound for a directory request.
pub const DIRECTORY_TIMEOUT_MS: u64 = 5_000;
/// Upper bound for a single probe.
pub const PROBE_TIMEOUT_MS: u64 = 1_000;

pub const PROBE_PORT_START: u16 = 8080;
pub const PROBE_PORT_END: u16 = 8099;

// ════════════════════════════════════════════════════════════════════════════
// ERRORS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("invalid configuration: {0}")]
    Validation(String),
}

// ════════════════════════════════════════════════════════════════════════════
// NETWORK PRESETS
// ════════════════════════════════════════════════════════════════════════════

/// Known deployments with a hosted directory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkId {
    Mainnet,
    Devnet,
}

impl NetworkId {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Some(NetworkId::Mainnet),
            "devnet" => Some(NetworkId::Devnet),
            _ => None,
        }
    }

    pub fn directory_url(&self) -> &'static str {
        match self {
            NetworkId::Mainnet => "https://registry.maikers.com",
            NetworkId::Devnet => "https://registry-devnet.maikers.com",
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PROBE CONFIG
// ════════════════════════════════════════════════════════════════════════════

/// Local port scan settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub hosts: Vec<String>,
    pub port_start: u16,
    pub port_end: u16,
    pub timeout: Duration,
    /// Probe even when a directory is configured.
    pub always: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost".to_string()],
            port_start: PROBE_PORT_START,
            port_end: PROBE_PORT_END,
            timeout: Duration::from_millis(PROBE_TIMEOUT_MS),
            always: false,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MONITOR CONFIG
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Base URL of the directory service. `None` disables directory lookups.
    pub directory_url: Option<String>,
    pub poll_interval: Duration,
    pub rediscovery_interval: Duration,
    /// Replicas a cell needs to count as healthy.
    pub replication_factor: usize,
    pub total_cells: u32,
    /// Drive the monitor from the fault simulation instead of the network.
    pub simulate: bool,
    pub simulated_nodes: usize,
    pub faults: FaultConfig,
    /// Where known endpoints are persisted. `None` keeps them in memory.
    pub endpoints_file: Option<PathBuf>,
    pub time_series_points: usize,
    pub metrics_timeout: Duration,
    pub directory_timeout: Duration,
    pub probe: ProbeConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            directory_url: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            rediscovery_interval: Duration::from_millis(DEFAULT_REDISCOVERY_INTERVAL_MS),
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            total_cells: DEFAULT_TOTAL_CELLS,
            simulate: false,
            simulated_nodes: DEFAULT_SIMULATED_NODES,
            faults: FaultConfig::default(),
            endpoints_file: None,
            time_series_points: DEFAULT_TIME_SERIES_POINTS,
            metrics_timeout: Duration::from_millis(METRICS_TIMEOUT_MS),
            directory_timeout: Duration::from_millis(DIRECTORY_TIMEOUT_MS),
            probe: ProbeConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Loads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Missing keys keep their defaults; present but unparseable keys are
    /// an error. The result is validated before it is returned.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("FLEET_NETWORK") {
            let network = NetworkId::parse(&raw).ok_or_else(|| invalid("FLEET_NETWORK", &raw))?;
            cfg.directory_url = Some(network.directory_url().to_string());
        }
        if let Some(raw) = lookup("FLEET_DIRECTORY_URL") {
            let url = raw.trim().trim_end_matches('/').to_string();
            cfg.directory_url = if url.is_empty() { None } else { Some(url) };
        }
        if let Some(ms) = parse_key::<u64, _>(&lookup, "FLEET_POLL_INTERVAL_MS")? {
            cfg.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_key::<u64, _>(&lookup, "FLEET_REDISCOVERY_INTERVAL_MS")? {
            cfg.rediscovery_interval = Duration::from_millis(ms);
        }
        if let Some(rf) = parse_key(&lookup, "FLEET_REPLICATION_FACTOR")? {
            cfg.replication_factor = rf;
        }
        if let Some(cells) = parse_key(&lookup, "FLEET_TOTAL_CELLS")? {
            cfg.total_cells = cells;
        }
        if let Some(raw) = lookup("FLEET_SIMULATE") {
            cfg.simulate = parse_flag("FLEET_SIMULATE", &raw)?;
        }
        if let Some(n) = parse_key(&lookup, "FLEET_SIMULATED_NODES")? {
            cfg.simulated_nodes = n;
        }
        if let Some(p) = parse_key(&lookup, "FLEET_OFFLINE_CHANCE")? {
            cfg.faults.offline_chance = p;
        }
        if let Some(p) = parse_key(&lookup, "FLEET_DEGRADED_CHANCE")? {
            cfg.faults.degraded_chance = p;
        }
        if let Some(p) = parse_key(&lookup, "FLEET_LATENCY_SPIKE_CHANCE")? {
            cfg.faults.latency_spike_chance = p;
        }
        if let Some(p) = parse_key(&lookup, "FLEET_PACKET_LOSS_CHANCE")? {
            cfg.faults.packet_loss_chance = p;
        }
        if let Some(path) = lookup("FLEET_ENDPOINTS_FILE") {
            if !path.trim().is_empty() {
                cfg.endpoints_file = Some(PathBuf::from(path));
            }
        }
        if let Some(n) = parse_key(&lookup, "FLEET_TIME_SERIES_POINTS")? {
            cfg.time_series_points = n;
        }
        if let Some(raw) = lookup("FLEET_PROBE_LOCAL") {
            cfg.probe.always = parse_flag("FLEET_PROBE_LOCAL", &raw)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values the scheduler or classifier cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Validation("poll interval must be > 0".into()));
        }
        if self.rediscovery_interval.is_zero() {
            return Err(ConfigError::Validation("rediscovery interval must be > 0".into()));
        }
        if self.replication_factor == 0 {
            return Err(ConfigError::Validation("replication factor must be >= 1".into()));
        }
        if self.total_cells == 0 {
            return Err(ConfigError::Validation("total cells must be >= 1".into()));
        }
        if self.time_series_points == 0 {
            return Err(ConfigError::Validation("time series window must be >= 1".into()));
        }
        if self.probe.port_start > self.probe.port_end {
            return Err(ConfigError::Validation(format!(
                "probe port range {}-{} is empty",
                self.probe.port_start, self.probe.port_end
            )));
        }
        self.faults.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }

    /// Whether a rediscovery cycle should scan local ports.
    pub fn probe_enabled(&self) -> bool {
        self.directory_url.is_none() || self.probe.always
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_key<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(key, &raw)),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid(key, raw)),
    }
}
