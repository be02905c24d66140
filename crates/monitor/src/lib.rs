//! # Fleet Monitor
//!
//! Discovers worker nodes, polls their metrics endpoints, reconciles the
//! results into one record per endpoint and classifies fleet health.
//! A fault simulation can stand in for the network.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                            FleetMonitor                               │
//! ├───────────────────────────────────────────────────────────────────────┤
//! │                                                                       │
//! │   ┌──────────────────────────┐        ┌───────────────────────────┐   │
//! │   │      NodeDiscovery       │        │      SimulatedFleet       │   │
//! │   │  ┌────────────────────┐  │        │  ┌─────────────────────┐  │   │
//! │   │  │ DirectoryClient    │  │        │  │ FaultSimulator      │  │   │
//! │   │  │ PortProber         │──┼─▶ add  │  │  healthy/degraded/  │  │   │
//! │   │  └────────────────────┘  │        │  │  offline transitions│  │   │
//! │   │  EndpointStore (persist) │        │  └─────────────────────┘  │   │
//! │   │  HttpMetricsFetcher      │        │                           │   │
//! │   │  NodeRegistry (by endpoint)       │                           │   │
//! │   └────────────┬─────────────┘        └─────────────┬─────────────┘   │
//! │                └──────────── NodeSource ────────────┘                 │
//! │                                  │                                    │
//! │                                  ▼                                    │
//! │   ┌───────────────────────────────────────────────────────────────┐   │
//! │   │ PollScheduler: metrics loop + rediscovery loop                │   │
//! │   │   ─▶ ClusterSummary / GlobalCell / TimeSeriesBuffer           │   │
//! │   │   ─▶ FleetSnapshot (watch channel)                            │   │
//! │   └───────────────────────────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Identity
//!
//! Records are keyed by endpoint, never by the node's self-reported id.
//! Two endpoints reporting the same id stay two records; a node that
//! restarts with a new id keeps its single record.
//!
//! # Failure Handling
//!
//! | Situation | Result |
//! |-----------|--------|
//! | Fetch fails after a success | Last metrics kept, status `offline` |
//! | Fetch fails, never succeeded | Placeholder record, status `offline` |
//! | Endpoint removed mid-cycle | Result discarded |
//! | Mode switched mid-cycle | Whole cycle discarded |
//! | Directory unreachable | Logged, no endpoints added |
//! | Persistence fails | Store keeps working for the session |

pub mod classifier;
pub mod clock;
pub mod config;
pub mod directory;
pub mod discovery;
pub mod endpoint_store;
pub mod error;
pub mod fetcher;
pub mod metrics;
pub mod monitor;
pub mod prober;
pub mod registry;
pub mod scheduler;
pub mod simulation;
pub mod snapshot;
pub mod source;
pub mod timeseries;
pub mod types;

pub use classifier::{global_cells, CellHealth, ClusterSummary, GlobalCell};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, MonitorConfig, NetworkId, ProbeConfig};
pub use directory::{DirectoryClient, DirectoryError};
pub use discovery::NodeDiscovery;
pub use endpoint_store::{EndpointPersistence, EndpointStore, FilePersistence, MemoryPersistence, PersistenceError};
pub use error::{FleetError, SnapshotError};
pub use fetcher::{FetchError, HttpMetricsFetcher, MetricsFetch};
pub use metrics::{PollMetrics, PollMetricsSnapshot};
pub use monitor::FleetMonitor;
pub use prober::PortProber;
pub use registry::NodeRegistry;
pub use scheduler::{PollScheduler, SchedulerConfig, SchedulerHandle};
pub use simulation::{FaultConfig, FaultSimulator, SimulatedFleet};
pub use snapshot::FleetSnapshot;
pub use source::{DataMode, NodeSource};
pub use timeseries::{TimeSeriesBuffer, TimeSeriesPoint};
pub use types::{
    CellMetric, CellRole, Connection, LatencyMetrics, NodeRecord, NodeStatus, TeePlatform, WorkerMetrics,
};
