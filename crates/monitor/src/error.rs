//! Setup errors and the user-visible fleet error state.

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

/// Failures that prevent the monitor from being built.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Fleet-wide condition reported alongside a snapshot.
///
/// Per-node failures never appear here; they show up as offline records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotError {
    #[error("No nodes discovered. Add an endpoint or configure a directory.")]
    NoEndpoints,

    #[error("No nodes reachable. Check if nodes are running.")]
    NoneReachable,
}
