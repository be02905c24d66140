//! Published view of the fleet after each poll cycle.

use serde::Serialize;

use crate::classifier::{global_cells, ClusterSummary, GlobalCell};
use crate::error::SnapshotError;
use crate::source::DataMode;
use crate::timeseries::TimeSeriesPoint;
use crate::types::{Connection, NodeRecord};

/// Everything a consumer needs to render one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSnapshot {
    pub mode: DataMode,
    pub nodes: Vec<NodeRecord>,
    pub connections: Vec<Connection>,
    pub summary: ClusterSummary,
    pub cells: Vec<GlobalCell>,
    pub time_series: Vec<TimeSeriesPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotError>,
    pub taken_at: u64,
}

/// Inputs of [`FleetSnapshot::build`] that do not come from the poll itself.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotContext {
    pub mode: DataMode,
    pub known_endpoints: usize,
    pub total_cells: u32,
    pub replication_factor: usize,
    pub taken_at: u64,
}

impl FleetSnapshot {
    pub fn build(
        ctx: SnapshotContext,
        nodes: Vec<NodeRecord>,
        connections: Vec<Connection>,
        time_series: Vec<TimeSeriesPoint>,
    ) -> Self {
        let summary = ClusterSummary::from_nodes(&nodes, ctx.total_cells, ctx.replication_factor);
        let cells = global_cells(&nodes, ctx.total_cells, ctx.replication_factor);
        let error = fleet_error(ctx.known_endpoints, &nodes);
        Self {
            mode: ctx.mode,
            nodes,
            connections,
            summary,
            cells,
            time_series,
            error,
            taken_at: ctx.taken_at,
        }
    }

    /// Snapshot published before the first poll completes.
    pub fn empty(mode: DataMode, total_cells: u32, replication_factor: usize, taken_at: u64) -> Self {
        Self::build(
            SnapshotContext {
                mode,
                known_endpoints: 0,
                total_cells,
                replication_factor,
                taken_at,
            },
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }
}

/// `NoEndpoints` when nothing is known, `NoneReachable` when every known
/// node is offline.
pub fn fleet_error(known_endpoints: usize, nodes: &[NodeRecord]) -> Option<SnapshotError> {
    if known_endpoints == 0 && nodes.is_empty() {
        Some(SnapshotError::NoEndpoints)
    } else if !nodes.iter().any(NodeRecord::is_online) {
        Some(SnapshotError::NoneReachable)
    } else {
        None
    }
}
