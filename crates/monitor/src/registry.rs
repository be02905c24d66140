//! # Node Registry
//!
//! Endpoint-keyed store of [`NodeRecord`]s and [`Connection`]s, and the
//! merge rules that fold one fetch outcome into it.
//!
//! ## Merge Rules
//!
//! | Outcome | Record exists | Effect on record | Effect on connection |
//! |---------|---------------|------------------|----------------------|
//! | success | any | replaced by fresh record, `status = healthy` | `connected = true`, `last_seen = now` |
//! | failure | yes | all fields kept, `status = offline`, `last_update = now` | `connected = false`, `last_seen` kept |
//! | failure | no | offline placeholder | `connected = false`, `last_seen = None` |
//!
//! ## Invariants
//!
//! - At most one record and one connection per endpoint.
//! - A record's `endpoint` field always equals its key.
//! - A record that has seen a success is never replaced by a placeholder.

use std::collections::HashMap;

use crate::types::{Connection, NodeRecord, NodeStatus};

/// Endpoint-keyed registry. Not synchronized; the owner serializes access.
#[derive(Debug, Default, Clone)]
pub struct NodeRegistry {
    nodes: HashMap<String, NodeRecord>,
    connections: HashMap<String, Connection>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a successful fetch into the registry.
    pub fn apply_success(&mut self, endpoint: &str, mut record: NodeRecord, now_ms: u64) {
        record.endpoint = endpoint.to_string();
        record.status = NodeStatus::Healthy;

        self.connections.insert(
            endpoint.to_string(),
            Connection {
                endpoint: endpoint.to_string(),
                node_id: record.node_id.clone(),
                connected: true,
                last_seen: Some(now_ms),
            },
        );
        self.nodes.insert(endpoint.to_string(), record);
    }

    /// Folds a failed fetch into the registry.
    pub fn apply_failure(&mut self, endpoint: &str, now_ms: u64) {
        let record = self
            .nodes
            .entry(endpoint.to_string())
            .and_modify(|existing| {
                existing.status = NodeStatus::Offline;
                existing.last_update = now_ms;
            })
            .or_insert_with(|| NodeRecord::offline_placeholder(endpoint, now_ms));
        let node_id = record.node_id.clone();

        self.connections
            .entry(endpoint.to_string())
            .and_modify(|c| c.connected = false)
            .or_insert_with(|| Connection {
                endpoint: endpoint.to_string(),
                node_id,
                connected: false,
                last_seen: None,
            });
    }

    /// Drops the record and connection of `endpoint`.
    pub fn remove(&mut self, endpoint: &str) -> bool {
        let had_node = self.nodes.remove(endpoint).is_some();
        let had_conn = self.connections.remove(endpoint).is_some();
        had_node || had_conn
    }

    pub fn get(&self, endpoint: &str) -> Option<&NodeRecord> {
        self.nodes.get(endpoint)
    }

    pub fn connection(&self, endpoint: &str) -> Option<&Connection> {
        self.connections.get(endpoint)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// One record per listed endpoint, in the given order.
    ///
    /// Endpoints not yet fetched are represented by a placeholder that is
    /// not stored.
    pub fn snapshot_for(&self, endpoints: &[String], now_ms: u64) -> Vec<NodeRecord> {
        endpoints
            .iter()
            .map(|e| {
                self.nodes
                    .get(e)
                    .cloned()
                    .unwrap_or_else(|| NodeRecord::offline_placeholder(e, now_ms))
            })
            .collect()
    }

    /// Every connection, sorted by endpoint.
    pub fn connections(&self) -> Vec<Connection> {
        let mut out: Vec<Connection> = self.connections.values().cloned().collect();
        out.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        out
    }

    /// Endpoints whose latest fetch failed.
    pub fn unreachable_endpoints(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .connections
            .values()
            .filter(|c| !c.connected)
            .map(|c| c.endpoint.clone())
            .collect();
        out.sort();
        out
    }
}
