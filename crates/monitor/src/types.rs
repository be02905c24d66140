//! # Fleet Data Model
//!
//! Canonical records shared by every stage of the pipeline.
//!
//! | Type | Role |
//! |------|------|
//! | [`NodeRecord`] | Last known metrics of one endpoint (registry value) |
//! | [`CellMetric`] | A shard owned or replicated by a node |
//! | [`Connection`] | Reachability bookkeeping for one endpoint |
//! | [`NodeStatus`] | Three-state health verdict |
//!
//! ## Identity
//!
//! A [`NodeRecord`] is identified by its `endpoint`, never by the
//! self-reported `node_id`. Two endpoints reporting the same id remain two
//! records; an endpoint whose id changes across restarts remains one record.
//!
//! All timestamps are Unix milliseconds.

use std::fmt;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════════════════
// NODE STATUS
// ════════════════════════════════════════════════════════════════════════════

/// Health verdict of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Responding with full metrics.
    Healthy,
    /// Responding, but with partial loss or reduced capacity.
    Degraded,
    /// Not responding; the record holds the last known values.
    Offline,
}

impl NodeStatus {
    /// Returns `true` for every status except `Offline`.
    #[inline]
    pub fn is_online(&self) -> bool {
        !matches!(self, NodeStatus::Offline)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Healthy => write!(f, "healthy"),
            NodeStatus::Degraded => write!(f, "degraded"),
            NodeStatus::Offline => write!(f, "offline"),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TEE PLATFORM
// ════════════════════════════════════════════════════════════════════════════

/// Trusted execution platform a node claims to run on.
///
/// Only recorded, never verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeePlatform {
    #[serde(rename = "IntelTDX")]
    IntelTdx,
    #[serde(rename = "AmdSEV")]
    AmdSev,
    #[serde(rename = "Simulated")]
    Simulated,
}

impl TeePlatform {
    /// Parses the platform names nodes are known to report.
    ///
    /// Matching is case-insensitive and accepts the `AmdSevSnp` spelling.
    /// Unknown names yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "inteltdx" => Some(TeePlatform::IntelTdx),
            "amdsev" | "amdsevsnp" => Some(TeePlatform::AmdSev),
            "simulated" => Some(TeePlatform::Simulated),
            _ => None,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CELLS
// ════════════════════════════════════════════════════════════════════════════

/// Role a node plays for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellRole {
    Primary,
    Replica,
}

/// A shard of work owned or replicated by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMetric {
    /// Cell id in `0..total_cells`.
    pub id: u32,
    /// Load gauge, 0-100.
    pub signal: f64,
    /// Pending work items.
    pub queue_depth: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<CellRole>,
}

// ════════════════════════════════════════════════════════════════════════════
// WORKERS / LATENCY
// ════════════════════════════════════════════════════════════════════════════

/// Worker pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    pub active: u64,
    pub total: u64,
    pub max: u64,
}

/// Request latency distribution in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyMetrics {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub avg: f64,
    pub samples: u64,
}

impl LatencyMetrics {
    /// Multiplies every latency figure by `factor`; `samples` is untouched.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            p50: self.p50 * factor,
            p95: self.p95 * factor,
            p99: self.p99 * factor,
            avg: self.avg * factor,
            samples: self.samples,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// NODE RECORD
// ════════════════════════════════════════════════════════════════════════════

/// Last known metrics of the node reached through `endpoint`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    /// Self-reported logical id. Informational only.
    pub node_id: String,
    /// Address the record is keyed by.
    pub endpoint: String,
    pub peer_id: String,
    pub secure: bool,
    pub tee_platform: Option<TeePlatform>,
    pub tee_attested: bool,
    /// Seconds since the node started.
    pub uptime: u64,
    pub cells: Vec<CellMetric>,
    /// Cell ids the node owns, reported separately from `cells`.
    pub owned_cells: Vec<u32>,
    pub claimed_events: u64,
    pub workers: WorkerMetrics,
    pub latency: LatencyMetrics,
    /// Operations per second.
    pub throughput: f64,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub fuel_consumed: u64,
    pub peers: Vec<String>,
    pub status: NodeStatus,
    /// Fraction of lost packets, 0..=1.
    pub packet_loss: f64,
    pub last_update: u64,
}

impl NodeRecord {
    /// Synthesizes the zero-valued record for an endpoint that has never
    /// answered successfully.
    pub fn offline_placeholder(endpoint: &str, now_ms: u64) -> Self {
        Self {
            node_id: endpoint_label(endpoint),
            endpoint: endpoint.to_string(),
            peer_id: UNKNOWN_PEER.to_string(),
            secure: false,
            tee_platform: None,
            tee_attested: false,
            uptime: 0,
            cells: Vec::new(),
            owned_cells: Vec::new(),
            claimed_events: 0,
            workers: WorkerMetrics::default(),
            latency: LatencyMetrics::default(),
            throughput: 0.0,
            tasks_processed: 0,
            tasks_failed: 0,
            fuel_consumed: 0,
            peers: Vec::new(),
            status: NodeStatus::Offline,
            packet_loss: 0.0,
            last_update: now_ms,
        }
    }

    /// Returns `true` if the node currently counts toward coverage.
    #[inline]
    pub fn is_online(&self) -> bool {
        self.status.is_online()
    }

    /// Distinct cell ids this node claims, from `cells` and `owned_cells`.
    pub fn claimed_cells(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .cells
            .iter()
            .map(|c| c.id)
            .chain(self.owned_cells.iter().copied())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Peer id used when a node does not report one.
pub const UNKNOWN_PEER: &str = "unknown";

/// Endpoint with its scheme stripped, used as the fallback node id.
pub fn endpoint_label(endpoint: &str) -> String {
    endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"))
        .unwrap_or(endpoint)
        .to_string()
}

// ════════════════════════════════════════════════════════════════════════════
// CONNECTION
// ════════════════════════════════════════════════════════════════════════════

/// Reachability of one endpoint.
///
/// `connected` reflects the latest fetch outcome. `last_seen` is the time of
/// the latest successful fetch and stays `None` until one happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub endpoint: String,
    /// Last node id observed through this endpoint.
    pub node_id: String,
    pub connected: bool,
    pub last_seen: Option<u64>,
}
