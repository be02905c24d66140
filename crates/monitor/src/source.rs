//! Data sources the scheduler can drive.
//!
//! Live discovery ([`NodeDiscovery`](crate::discovery::NodeDiscovery)) and
//! the fault simulation ([`SimulatedFleet`](crate::simulation::SimulatedFleet))
//! both implement [`NodeSource`], so consumers never know which one is
//! feeding them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::types::{Connection, NodeRecord};

/// Where node records come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    Live,
    Simulation,
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataMode::Live => write!(f, "live"),
            DataMode::Simulation => write!(f, "simulation"),
        }
    }
}

#[async_trait]
pub trait NodeSource: Send + Sync {
    fn mode(&self) -> DataMode;

    /// Runs one metrics-poll cycle and returns one record per known node.
    async fn poll(&self) -> Vec<NodeRecord>;

    /// Looks for new endpoints. Returns how many were added.
    async fn rediscover(&self) -> usize {
        0
    }

    /// Reachability of every known endpoint.
    fn connections(&self) -> Vec<Connection> {
        Vec::new()
    }

    /// Number of nodes or endpoints the source knows about.
    fn known_endpoints(&self) -> usize;

    /// Makes results of polls already in flight be discarded.
    fn invalidate_in_flight(&self) {}

    /// Signal fired when the source wants an out-of-band poll.
    fn refresh_signal(&self) -> Option<Arc<Notify>> {
        None
    }
}
