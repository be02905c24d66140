//! # Status Classifier
//!
//! Read-only aggregation over a node snapshot.
//!
//! Node status is decided upstream (reconciliation or simulation); this
//! module only counts. Offline nodes contribute to node counts but never
//! to cell coverage or performance aggregates.
//!
//! ## Cell Health
//!
//! | Online claimants | Verdict |
//! |------------------|---------|
//! | `>= replication_factor` | `Healthy` |
//! | `1 .. replication_factor` | `Degraded` |
//! | `0` | `Empty` |

use serde::Serialize;

use crate::types::{NodeRecord, NodeStatus};

/// Replication verdict for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellHealth {
    Healthy,
    Degraded,
    Empty,
}

impl CellHealth {
    pub fn from_coverage(replicas: usize, replication_factor: usize) -> Self {
        if replicas == 0 {
            CellHealth::Empty
        } else if replicas >= replication_factor {
            CellHealth::Healthy
        } else {
            CellHealth::Degraded
        }
    }
}

/// Fleet-wide view of one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalCell {
    pub id: u32,
    /// Endpoints of online nodes claiming the cell.
    pub claimants: Vec<String>,
    pub replication_count: usize,
    pub health: CellHealth,
}

/// Coverage of every cell id in `0..total_cells`.
///
/// Claims for ids outside that range are ignored.
pub fn global_cells(nodes: &[NodeRecord], total_cells: u32, replication_factor: usize) -> Vec<GlobalCell> {
    let mut claimants: Vec<Vec<String>> = vec![Vec::new(); total_cells as usize];
    for node in nodes.iter().filter(|n| n.is_online()) {
        for id in node.claimed_cells() {
            if let Some(slot) = claimants.get_mut(id as usize) {
                slot.push(node.endpoint.clone());
            }
        }
    }

    claimants
        .into_iter()
        .enumerate()
        .map(|(id, claimants)| {
            let replication_count = claimants.len();
            GlobalCell {
                id: id as u32,
                claimants,
                replication_count,
                health: CellHealth::from_coverage(replication_count, replication_factor),
            }
        })
        .collect()
}

/// Aggregate statistics of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
    pub total_nodes: usize,
    /// Healthy plus degraded.
    pub active_nodes: usize,
    pub healthy_nodes: usize,
    pub degraded_nodes: usize,
    pub offline_nodes: usize,

    pub total_cells: u32,
    pub healthy_cells: usize,
    pub degraded_cells: usize,
    pub empty_cells: usize,

    pub total_throughput: f64,
    pub avg_latency_p50: f64,
    pub avg_latency_p95: f64,
    pub avg_latency_p99: f64,
    pub total_active_workers: u64,
    pub attested_nodes: usize,
    pub secure_nodes: usize,
}

impl ClusterSummary {
    /// Summarizes `nodes`. An all-offline fleet yields zeroed aggregates.
    pub fn from_nodes(nodes: &[NodeRecord], total_cells: u32, replication_factor: usize) -> Self {
        let mut summary = ClusterSummary {
            total_nodes: nodes.len(),
            total_cells,
            ..ClusterSummary::default()
        };

        for node in nodes {
            match node.status {
                NodeStatus::Healthy => summary.healthy_nodes += 1,
                NodeStatus::Degraded => summary.degraded_nodes += 1,
                NodeStatus::Offline => summary.offline_nodes += 1,
            }
        }
        summary.active_nodes = summary.healthy_nodes + summary.degraded_nodes;

        for cell in global_cells(nodes, total_cells, replication_factor) {
            match cell.health {
                CellHealth::Healthy => summary.healthy_cells += 1,
                CellHealth::Degraded => summary.degraded_cells += 1,
                CellHealth::Empty => summary.empty_cells += 1,
            }
        }

        let online: Vec<&NodeRecord> = nodes.iter().filter(|n| n.is_online()).collect();
        summary.total_throughput = online.iter().map(|n| n.throughput).sum();
        summary.total_active_workers = online.iter().map(|n| n.workers.active).sum();
        summary.attested_nodes = online.iter().filter(|n| n.tee_attested).count();
        summary.secure_nodes = online.iter().filter(|n| n.secure).count();
        summary.avg_latency_p50 = mean(online.iter().map(|n| n.latency.p50));
        summary.avg_latency_p95 = mean(online.iter().map(|n| n.latency.p95));
        summary.avg_latency_p99 = mean(online.iter().map(|n| n.latency.p99));

        summary
    }
}

/// Arithmetic mean; 0 for an empty input.
pub(crate) fn mean<I: Iterator<Item = f64>>(values: I) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
