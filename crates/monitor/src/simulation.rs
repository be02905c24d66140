//! # Fault Simulation Model
//!
//! Synthetic fleet for demos and tests. [`SimulatedFleet`] implements
//! [`NodeSource`] with the same output contract as live discovery.
//!
//! ## Transitions (per node, per tick)
//!
//! ```text
//! ┌──────────┬─────────────────────────────────────────────────────────┐
//! │ from     │ one uniform draw r                                      │
//! ├──────────┼─────────────────────────────────────────────────────────┤
//! │ offline  │ r < 0.30 → healthy, r < 0.50 → degraded, else offline   │
//! │ degraded │ r < 0.40 → healthy, r < 0.50 → offline, else degraded  │
//! │ healthy  │ r < offline_chance → offline,                           │
//! │          │ r < offline_chance + degraded_chance → degraded,        │
//! │          │ else healthy                                            │
//! └──────────┴─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Effects
//!
//! - healthy: baseline metrics; packet loss 1-25% with `packet_loss_chance`,
//!   otherwise none.
//! - degraded: throughput × 0.3-0.7, latency × 1.5-3.5, packet loss 5-50%.
//! - offline: throughput and active workers are 0, packet loss is 100%,
//!   cells and latency stay at the last reported snapshot.
//! - any online node: latency × 2-10 with `latency_spike_chance`.
//!
//! Baselines drift every tick a node is online, so effects never compound.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::source::{DataMode, NodeSource};
use crate::timeseries::TimeSeriesPoint;
use crate::types::{
    CellMetric, CellRole, Connection, LatencyMetrics, NodeRecord, NodeStatus, TeePlatform,
    WorkerMetrics,
};

// ════════════════════════════════════════════════════════════════════════════
// FAULT CONFIG
// ════════════════════════════════════════════════════════════════════════════

/// Per-tick fault probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultConfig {
    pub offline_chance: f64,
    pub degraded_chance: f64,
    pub latency_spike_chance: f64,
    pub packet_loss_chance: f64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            offline_chance: 0.02,
            degraded_chance: 0.05,
            latency_spike_chance: 0.05,
            packet_loss_chance: 0.05,
        }
    }
}

impl FaultConfig {
    /// No faults at all.
    pub fn none() -> Self {
        Self {
            offline_chance: 0.0,
            degraded_chance: 0.0,
            latency_spike_chance: 0.0,
            packet_loss_chance: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("offline_chance", self.offline_chance),
            ("degraded_chance", self.degraded_chance),
            ("latency_spike_chance", self.latency_spike_chance),
            ("packet_loss_chance", self.packet_loss_chance),
        ];
        for (name, p) in fields {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("{} must be within 0..=1, got {}", name, p));
            }
        }
        if self.offline_chance + self.degraded_chance > 1.0 {
            return Err("offline_chance + degraded_chance must not exceed 1".to_string());
        }
        Ok(())
    }

    fn clamped(self) -> Self {
        let c = |p: f64| if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
        Self {
            offline_chance: c(self.offline_chance),
            degraded_chance: c(self.degraded_chance),
            latency_spike_chance: c(self.latency_spike_chance),
            packet_loss_chance: c(self.packet_loss_chance),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SIMULATOR
// ════════════════════════════════════════════════════════════════════════════

const TEE_PLATFORMS: [TeePlatform; 3] = [TeePlatform::IntelTdx, TeePlatform::AmdSev, TeePlatform::Simulated];
const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

struct SimulatedNode {
    baseline: NodeRecord,
    reported: NodeRecord,
    last_seen: Option<u64>,
}

/// Stochastic state machine over a fixed set of synthetic nodes.
pub struct FaultSimulator {
    config: FaultConfig,
    rng: StdRng,
    nodes: Vec<SimulatedNode>,
}

impl FaultSimulator {
    /// Deterministic simulator for a given seed.
    pub fn with_seed(
        node_count: usize,
        total_cells: u32,
        replication_factor: usize,
        config: FaultConfig,
        seed: u64,
    ) -> Self {
        Self::build(node_count, total_cells, replication_factor, config, StdRng::seed_from_u64(seed), 0)
    }

    /// Simulator seeded from OS entropy.
    pub fn new(
        node_count: usize,
        total_cells: u32,
        replication_factor: usize,
        config: FaultConfig,
        now_ms: u64,
    ) -> Self {
        Self::build(node_count, total_cells, replication_factor, config, StdRng::from_entropy(), now_ms)
    }

    fn build(
        node_count: usize,
        total_cells: u32,
        replication_factor: usize,
        config: FaultConfig,
        mut rng: StdRng,
        now_ms: u64,
    ) -> Self {
        let assignment = assign_cells(node_count, total_cells, replication_factor);
        let nodes = assignment
            .into_iter()
            .enumerate()
            .map(|(index, cells)| {
                let record = generate_node(index, cells, &mut rng, now_ms);
                SimulatedNode {
                    baseline: record.clone(),
                    reported: record,
                    last_seen: Some(now_ms),
                }
            })
            .collect();
        Self {
            config: config.clamped(),
            rng,
            nodes,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Last reported records.
    pub fn nodes(&self) -> Vec<NodeRecord> {
        self.nodes.iter().map(|n| n.reported.clone()).collect()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.nodes
            .iter()
            .map(|n| Connection {
                endpoint: n.reported.endpoint.clone(),
                node_id: n.reported.node_id.clone(),
                connected: n.reported.is_online(),
                last_seen: n.last_seen,
            })
            .collect()
    }

    /// Advances every node by one tick.
    pub fn tick(&mut self, now_ms: u64) -> Vec<NodeRecord> {
        let config = self.config;
        for node in &mut self.nodes {
            let rng = &mut self.rng;
            let next = next_status(node.reported.status, &config, rng.gen::<f64>());
            let spike = rng.gen_bool(config.latency_spike_chance);

            if next.is_online() {
                drift(&mut node.baseline, rng, now_ms);
            }

            let mut reported = match next {
                NodeStatus::Offline => {
                    let mut frozen = node.reported.clone();
                    frozen.throughput = 0.0;
                    frozen.workers.active = 0;
                    frozen.packet_loss = 1.0;
                    frozen
                }
                NodeStatus::Healthy => {
                    let mut r = node.baseline.clone();
                    r.packet_loss = if rng.gen_bool(config.packet_loss_chance) {
                        rng.gen_range(0.01..0.25)
                    } else {
                        0.0
                    };
                    r
                }
                NodeStatus::Degraded => {
                    let mut r = node.baseline.clone();
                    r.throughput *= rng.gen_range(0.3..=0.7);
                    r.latency = r.latency.scaled(rng.gen_range(1.5..=3.5));
                    r.packet_loss = rng.gen_range(0.05..0.5);
                    r
                }
            };

            if spike && next.is_online() {
                reported.latency = reported.latency.scaled(rng.gen_range(2.0..=10.0));
            }
            reported.status = next;
            reported.last_update = now_ms;
            if next.is_online() {
                node.last_seen = Some(now_ms);
            }
            node.reported = reported;
        }
        self.nodes()
    }

    /// Synthetic history of `points` one-second samples ending at `now_ms`.
    pub fn history(&mut self, points: usize, now_ms: u64) -> Vec<TimeSeriesPoint> {
        let rng = &mut self.rng;
        (0..points)
            .map(|i| {
                let x = i as f64;
                TimeSeriesPoint {
                    timestamp: now_ms.saturating_sub(((points - i) as u64) * 1_000),
                    throughput: 200.0 + rng.gen::<f64>() * 300.0 + (x / 10.0).sin() * 100.0,
                    latency_p50: 12.0 + rng.gen::<f64>() * 8.0,
                    latency_p99: 60.0 + rng.gen::<f64>() * 40.0 + (x / 5.0).sin() * 20.0,
                    active_workers: 50 + rng.gen_range(0..100),
                }
            })
            .collect()
    }
}

/// Status after one tick, given a uniform draw `r` in `[0, 1)`.
pub fn next_status(current: NodeStatus, config: &FaultConfig, r: f64) -> NodeStatus {
    match current {
        NodeStatus::Offline => {
            if r < 0.3 {
                NodeStatus::Healthy
            } else if r < 0.5 {
                NodeStatus::Degraded
            } else {
                NodeStatus::Offline
            }
        }
        NodeStatus::Degraded => {
            if r < 0.4 {
                NodeStatus::Healthy
            } else if r < 0.5 {
                NodeStatus::Offline
            } else {
                NodeStatus::Degraded
            }
        }
        NodeStatus::Healthy => {
            if r < config.offline_chance {
                NodeStatus::Offline
            } else if r < config.offline_chance + config.degraded_chance {
                NodeStatus::Degraded
            } else {
                NodeStatus::Healthy
            }
        }
    }
}

/// Cells per node: cell `c` has its primary on node `c % n` and replicas
/// on the following nodes, up to `replication_factor` holders in total.
fn assign_cells(node_count: usize, total_cells: u32, replication_factor: usize) -> Vec<Vec<(u32, CellRole)>> {
    let mut out = vec![Vec::new(); node_count];
    if node_count == 0 {
        return out;
    }
    let holders = replication_factor.clamp(1, node_count);
    for cell in 0..total_cells {
        for k in 0..holders {
            let owner = (cell as usize + k) % node_count;
            let role = if k == 0 { CellRole::Primary } else { CellRole::Replica };
            out[owner].push((cell, role));
        }
    }
    out
}

fn random_id(rng: &mut StdRng) -> String {
    (0..8)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}

fn generate_node(index: usize, cells: Vec<(u32, CellRole)>, rng: &mut StdRng, now_ms: u64) -> NodeRecord {
    let node_id = format!("node-{:03}", index);
    let peer_count = rng.gen_range(1..=5);
    NodeRecord {
        endpoint: format!("sim://{}", node_id),
        node_id,
        peer_id: format!("12D3KooW{}{}", random_id(rng), random_id(rng)),
        secure: true,
        tee_platform: Some(TEE_PLATFORMS[index % TEE_PLATFORMS.len()]),
        tee_attested: rng.gen::<f64>() > 0.1,
        uptime: rng.gen_range(0..86_400 * 7),
        cells: cells
            .into_iter()
            .map(|(id, role)| CellMetric {
                id,
                signal: rng.gen_range(0..100) as f64,
                queue_depth: rng.gen_range(0..20),
                role: Some(role),
            })
            .collect(),
        owned_cells: Vec::new(),
        claimed_events: 0,
        workers: WorkerMetrics {
            active: rng.gen_range(0..100),
            total: 100 + rng.gen_range(0..100),
            max: 10_000,
        },
        latency: LatencyMetrics {
            p50: 10.0 + rng.gen::<f64>() * 20.0,
            p95: 30.0 + rng.gen::<f64>() * 50.0,
            p99: 50.0 + rng.gen::<f64>() * 100.0,
            avg: 15.0 + rng.gen::<f64>() * 25.0,
            samples: 500 + rng.gen_range(0..500),
        },
        throughput: rng.gen_range(0..500) as f64,
        tasks_processed: rng.gen_range(0..100_000),
        tasks_failed: rng.gen_range(0..100),
        fuel_consumed: rng.gen_range(0..1_000_000),
        peers: (0..peer_count).map(|_| format!("12D3KooW{}", random_id(rng))).collect(),
        status: NodeStatus::Healthy,
        packet_loss: 0.0,
        last_update: now_ms,
    }
}

/// Random walk of an online node's baseline metrics.
fn drift(node: &mut NodeRecord, rng: &mut StdRng, now_ms: u64) {
    let mut wobble = |scale: f64| (rng.gen::<f64>() - 0.5) * scale;

    for cell in &mut node.cells {
        cell.signal = (cell.signal + wobble(10.0)).clamp(0.0, 100.0);
        let dq = wobble(4.0).floor() as i64;
        cell.queue_depth = (cell.queue_depth as i64 + dq).max(0) as u64;
    }

    let da = wobble(20.0).floor() as i64;
    node.workers.active = (node.workers.active as i64 + da).clamp(0, node.workers.total as i64) as u64;

    node.latency.p50 = (node.latency.p50 + wobble(5.0)).max(1.0);
    node.latency.p95 = (node.latency.p95 + wobble(10.0)).max(10.0);
    node.latency.p99 = (node.latency.p99 + wobble(20.0)).max(20.0);

    node.throughput = (node.throughput + wobble(50.0).floor()).max(0.0);
    node.tasks_processed += rng.gen_range(0..10);
    node.uptime += now_ms.saturating_sub(node.last_update) / 1_000;
    node.last_update = now_ms;
}

// ════════════════════════════════════════════════════════════════════════════
// SIMULATED FLEET (NodeSource)
// ════════════════════════════════════════════════════════════════════════════

/// [`NodeSource`] backed by a [`FaultSimulator`].
pub struct SimulatedFleet {
    simulator: Mutex<FaultSimulator>,
    clock: Arc<dyn Clock>,
}

impl SimulatedFleet {
    pub fn new(simulator: FaultSimulator, clock: Arc<dyn Clock>) -> Self {
        Self {
            simulator: Mutex::new(simulator),
            clock,
        }
    }

    /// Entropy-seeded fleet on the system clock.
    pub fn from_config(config: &crate::config::MonitorConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let simulator = FaultSimulator::new(
            config.simulated_nodes,
            config.total_cells,
            config.replication_factor,
            config.faults,
            clock.now_ms(),
        );
        Self::new(simulator, clock)
    }

    pub fn history(&self, points: usize) -> Vec<TimeSeriesPoint> {
        let now = self.clock.now_ms();
        self.simulator.lock().history(points, now)
    }
}

#[async_trait]
impl NodeSource for SimulatedFleet {
    fn mode(&self) -> DataMode {
        DataMode::Simulation
    }

    async fn poll(&self) -> Vec<NodeRecord> {
        let now = self.clock.now_ms();
        self.simulator.lock().tick(now)
    }

    fn connections(&self) -> Vec<Connection> {
        self.simulator.lock().connections()
    }

    fn known_endpoints(&self) -> usize {
        self.simulator.lock().len()
    }
}
