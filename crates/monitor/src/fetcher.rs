//! # Metrics Fetcher
//!
//! One bounded-timeout `GET <endpoint>/metrics` per call, parsed into a
//! [`NodeRecord`].
//!
//! ## Contract
//!
//! - Pure request/parse: a fetch never touches shared state, so any
//!   number of fetches can run in parallel.
//! - Transport errors, timeouts, non-2xx status and bodies that are not a
//!   JSON object come back as [`FetchError`]. The caller decides what the
//!   failure means for the node.
//! - Every field is optional. Absent or mistyped fields take their zero
//!   value:
//!
//! | Field | Default |
//! |-------|---------|
//! | `nodeId` | endpoint without scheme |
//! | `peerId` | `"unknown"` |
//! | numbers | `0` |
//! | booleans | `false` |
//! | `teePlatform` | `null` |
//! | arrays | empty |
//! | `workers`, `latency` | all-zero object; missing members are `0` |
//!
//! A parsed record always carries `status = healthy`, `packetLoss = 0`
//! and `lastUpdate = now`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};
use crate::config::METRICS_TIMEOUT_MS;
use crate::types::{
    endpoint_label, CellMetric, CellRole, LatencyMetrics, NodeRecord, NodeStatus, TeePlatform,
    WorkerMetrics, UNKNOWN_PEER,
};

// ════════════════════════════════════════════════════════════════════════════
// ERRORS
// ════════════════════════════════════════════════════════════════════════════

/// Why a metrics fetch produced no record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("malformed metrics body: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// FETCH TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// Source of per-endpoint metrics.
#[async_trait]
pub trait MetricsFetch: Send + Sync {
    async fn fetch(&self, endpoint: &str) -> Result<NodeRecord, FetchError>;
}

/// [`MetricsFetch`] over HTTP.
#[derive(Clone)]
pub struct HttpMetricsFetcher {
    client: Client,
    clock: Arc<dyn Clock>,
}

impl HttpMetricsFetcher {
    /// Fetcher with the default timeout and the system clock.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_millis(METRICS_TIMEOUT_MS), Arc::new(SystemClock))
    }

    pub fn with_timeout(timeout: Duration, clock: Arc<dyn Clock>) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, clock })
    }
}

#[async_trait]
impl MetricsFetch for HttpMetricsFetcher {
    async fn fetch(&self, endpoint: &str) -> Result<NodeRecord, FetchError> {
        let resp = self
            .client
            .get(metrics_url(endpoint))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        let json: Value =
            serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;
        parse_node_metrics(&json, endpoint, self.clock.now_ms())
    }
}

/// `<endpoint>/metrics`, assuming `http://` when no scheme is given.
pub fn metrics_url(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        format!("{}/metrics", endpoint)
    } else {
        format!("http://{}/metrics", endpoint)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PARSING
// ════════════════════════════════════════════════════════════════════════════

/// Builds a record from a `/metrics` body with defaults for every field.
///
/// Fails only when the body is not a JSON object.
pub fn parse_node_metrics(
    body: &Value,
    endpoint: &str,
    now_ms: u64,
) -> Result<NodeRecord, FetchError> {
    let raw = body
        .as_object()
        .ok_or_else(|| FetchError::Malformed("expected a JSON object".to_string()))?;

    Ok(NodeRecord {
        node_id: str_field(raw, "nodeId").unwrap_or_else(|| endpoint_label(endpoint)),
        endpoint: endpoint.to_string(),
        peer_id: str_field(raw, "peerId").unwrap_or_else(|| UNKNOWN_PEER.to_string()),
        secure: bool_field(raw, "secure"),
        tee_platform: raw
            .get("teePlatform")
            .and_then(Value::as_str)
            .and_then(TeePlatform::parse),
        tee_attested: bool_field(raw, "teeAttested"),
        uptime: u64_field(raw, "uptime"),
        cells: parse_cells(raw.get("cells")),
        owned_cells: raw
            .get("ownedCells")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(as_cell_id).collect())
            .unwrap_or_default(),
        claimed_events: u64_field(raw, "claimedEvents"),
        workers: raw
            .get("workers")
            .and_then(Value::as_object)
            .map(|w| WorkerMetrics {
                active: u64_field(w, "active"),
                total: u64_field(w, "total"),
                max: u64_field(w, "max"),
            })
            .unwrap_or_default(),
        latency: raw
            .get("latency")
            .and_then(Value::as_object)
            .map(|l| LatencyMetrics {
                p50: f64_field(l, "p50"),
                p95: f64_field(l, "p95"),
                p99: f64_field(l, "p99"),
                avg: f64_field(l, "avg"),
                samples: u64_field(l, "samples"),
            })
            .unwrap_or_default(),
        throughput: f64_field(raw, "throughput"),
        tasks_processed: u64_field(raw, "tasksProcessed"),
        tasks_failed: u64_field(raw, "tasksFailed"),
        fuel_consumed: u64_field(raw, "fuelConsumed"),
        peers: raw
            .get("peers")
            .and_then(Value::as_array)
            .map(|p| p.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default(),
        status: NodeStatus::Healthy,
        packet_loss: 0.0,
        last_update: now_ms,
    })
}

fn parse_cells(value: Option<&Value>) -> Vec<CellMetric> {
    let Some(entries) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let cell = entry.as_object()?;
            let id = cell.get("id").and_then(as_cell_id)?;
            Some(CellMetric {
                id,
                signal: f64_field(cell, "signal").clamp(0.0, 100.0),
                queue_depth: u64_field(cell, "queueDepth"),
                role: match cell.get("role").and_then(Value::as_str) {
                    Some(r) if r.eq_ignore_ascii_case("primary") => Some(CellRole::Primary),
                    Some(r) if r.eq_ignore_ascii_case("replica") => Some(CellRole::Replica),
                    _ => None,
                },
            })
        })
        .collect()
}

fn as_cell_id(v: &Value) -> Option<u32> {
    v.as_u64().and_then(|id| u32::try_from(id).ok())
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn f64_field(obj: &Map<String, Value>, key: &str) -> f64 {
    obj.get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Non-negative integer; fractional values are truncated.
fn u64_field(obj: &Map<String, Value>, key: &str) -> u64 {
    match obj.get(key) {
        Some(v) => v
            .as_u64()
            .or_else(|| v.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EP: &str = "http://10.0.0.1:8080";

    #[test]
    fn full_body_is_parsed() {
        let body = json!({
            "nodeId": "node-001",
            "peerId": "12D3KooWabc",
            "secure": true,
            "teePlatform": "IntelTDX",
            "teeAttested": true,
            "uptime": 3600,
            "cells": [{"id": 7, "signal": 55.5, "queueDepth": 3, "role": "replica"}],
            "ownedCells": [1, 2],
            "claimedEvents": 9,
            "workers": {"active": 4, "total": 10, "max": 100},
            "latency": {"p50": 12.0, "p95": 40.0, "p99": 80.5, "avg": 15.0, "samples": 500},
            "throughput": 120,
            "tasksProcessed": 1000,
            "tasksFailed": 2,
            "fuelConsumed": 77,
            "peers": ["a", "b"]
        });
        let n = parse_node_metrics(&body, EP, 99).unwrap();
        assert_eq!(n.node_id, "node-001");
        assert_eq!(n.endpoint, EP);
        assert_eq!(n.peer_id, "12D3KooWabc");
        assert!(n.secure && n.tee_attested);
        assert_eq!(n.tee_platform, Some(TeePlatform::IntelTdx));
        assert_eq!(n.uptime, 3600);
        assert_eq!(n.cells.len(), 1);
        assert_eq!(n.cells[0].role, Some(CellRole::Replica));
        assert_eq!(n.owned_cells, vec![1, 2]);
        assert_eq!(n.claimed_events, 9);
        assert_eq!(n.workers, WorkerMetrics { active: 4, total: 10, max: 100 });
        assert_eq!(n.latency.p99, 80.5);
        assert_eq!(n.latency.samples, 500);
        assert_eq!(n.throughput, 120.0);
        assert_eq!(n.tasks_processed, 1000);
        assert_eq!(n.tasks_failed, 2);
        assert_eq!(n.fuel_consumed, 77);
        assert_eq!(n.peers, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(n.status, NodeStatus::Healthy);
        assert_eq!(n.last_update, 99);
    }

    #[test]
    fn empty_object_gets_defaults() {
        let n = parse_node_metrics(&json!({}), EP, 5).unwrap();
        assert_eq!(n.node_id, "10.0.0.1:8080");
        assert_eq!(n.peer_id, UNKNOWN_PEER);
        assert_eq!(n.tee_platform, None);
        assert!(!n.secure);
        assert!(n.cells.is_empty() && n.peers.is_empty() && n.owned_cells.is_empty());
        assert_eq!(n.workers, WorkerMetrics::default());
        assert_eq!(n.latency, LatencyMetrics::default());
        assert_eq!(n.throughput, 0.0);
        assert_eq!(n.status, NodeStatus::Healthy);
    }

    #[test]
    fn mistyped_fields_fall_back_to_defaults() {
        let body = json!({
            "nodeId": 17,
            "secure": "yes",
            "uptime": "long",
            "cells": [{"signal": 3}, {"id": -1}, {"id": 2, "signal": 400, "role": "leader"}],
            "workers": {"active": "four", "total": 8},
            "latency": [1, 2, 3],
            "throughput": null,
            "peers": ["ok", 3],
            "teePlatform": "Unknown"
        });
        let n = parse_node_metrics(&body, EP, 0).unwrap();
        assert_eq!(n.node_id, "10.0.0.1:8080");
        assert!(!n.secure);
        assert_eq!(n.uptime, 0);
        assert_eq!(n.cells.len(), 1);
        assert_eq!(n.cells[0].id, 2);
        assert_eq!(n.cells[0].signal, 100.0);
        assert_eq!(n.cells[0].role, None);
        assert_eq!(n.workers, WorkerMetrics { active: 0, total: 8, max: 0 });
        assert_eq!(n.latency, LatencyMetrics::default());
        assert_eq!(n.throughput, 0.0);
        assert_eq!(n.peers, vec!["ok".to_string()]);
        assert_eq!(n.tee_platform, None);
    }

    #[test]
    fn fractional_counters_truncate() {
        let n = parse_node_metrics(&json!({"tasksProcessed": 12.9, "tasksFailed": -3}), EP, 0).unwrap();
        assert_eq!(n.tasks_processed, 12);
        assert_eq!(n.tasks_failed, 0);
    }

    #[test]
    fn non_object_body_is_malformed() {
        assert!(matches!(
            parse_node_metrics(&json!([1, 2]), EP, 0),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn metrics_url_adds_scheme_when_missing() {
        assert_eq!(metrics_url("https://h"), "https://h/metrics");
        assert_eq!(metrics_url("h:8080"), "http://h:8080/metrics");
    }
}
