//! Rolling in-memory window of fleet-wide throughput and latency.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::classifier::mean;
use crate::types::NodeRecord;

/// Fleet aggregate at one instant, over online nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    pub timestamp: u64,
    pub throughput: f64,
    pub latency_p50: f64,
    pub latency_p99: f64,
    pub active_workers: u64,
}

impl TimeSeriesPoint {
    pub fn from_nodes(nodes: &[NodeRecord], timestamp: u64) -> Self {
        let online: Vec<&NodeRecord> = nodes.iter().filter(|n| n.is_online()).collect();
        Self {
            timestamp,
            throughput: online.iter().map(|n| n.throughput).sum(),
            latency_p50: mean(online.iter().map(|n| n.latency.p50)),
            latency_p99: mean(online.iter().map(|n| n.latency.p99)),
            active_workers: online.iter().map(|n| n.workers.active).sum(),
        }
    }
}

/// Keeps the newest `capacity` points.
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    points: VecDeque<TimeSeriesPoint>,
    capacity: usize,
}

impl TimeSeriesBuffer {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, point: TimeSeriesPoint) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn record(&mut self, nodes: &[NodeRecord], timestamp: u64) {
        self.push(TimeSeriesPoint::from_nodes(nodes, timestamp));
    }

    pub fn extend<I: IntoIterator<Item = TimeSeriesPoint>>(&mut self, points: I) {
        for p in points {
            self.push(p);
        }
    }

    /// Oldest first.
    pub fn points(&self) -> Vec<TimeSeriesPoint> {
        self.points.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
