//! # Fleet Monitor
//!
//! Top-level facade tying together live discovery, the fault simulation and
//! the poll scheduler.
//!
//! The live [`NodeDiscovery`] outlives mode switches, so endpoints added in
//! one mode are still known after switching back. Switching stops the
//! running scheduler first, which invalidates every poll in flight; a result
//! from the previous mode can never reach the new mode's snapshots.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::MonitorConfig;
use crate::discovery::NodeDiscovery;
use crate::error::FleetError;
use crate::metrics::PollMetrics;
use crate::scheduler::{PollScheduler, SchedulerConfig, SchedulerHandle};
use crate::simulation::{FaultSimulator, SimulatedFleet};
use crate::snapshot::{FleetSnapshot, SnapshotContext};
use crate::source::{DataMode, NodeSource};
use crate::types::Connection;

pub struct FleetMonitor {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    discovery: Arc<NodeDiscovery>,
    simulation_seed: Option<u64>,
    running: Option<(DataMode, SchedulerHandle)>,
}

impl FleetMonitor {
    /// Validates `config` and wires live discovery from it.
    pub fn new(config: MonitorConfig) -> Result<Self, FleetError> {
        config.validate()?;
        let discovery = NodeDiscovery::from_config(&config)?;
        Ok(Self::with_discovery(config, Arc::new(discovery), Arc::new(SystemClock)))
    }

    pub fn with_discovery(config: MonitorConfig, discovery: Arc<NodeDiscovery>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            discovery,
            simulation_seed: None,
            running: None,
        }
    }

    /// Makes every simulation run deterministic.
    pub fn with_simulation_seed(mut self, seed: u64) -> Self {
        self.simulation_seed = Some(seed);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Mode configured by `simulate`.
    pub fn default_mode(&self) -> DataMode {
        if self.config.simulate {
            DataMode::Simulation
        } else {
            DataMode::Live
        }
    }

    pub fn mode(&self) -> Option<DataMode> {
        self.running.as_ref().map(|(mode, _)| *mode)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    // ────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ────────────────────────────────────────────────────────────────────────

    /// Starts polling in `mode`. A running scheduler is stopped first.
    pub async fn start(&mut self, mode: DataMode) {
        self.stop().await;

        let (source, history): (Arc<dyn NodeSource>, _) = match mode {
            DataMode::Live => (Arc::clone(&self.discovery) as Arc<dyn NodeSource>, Vec::new()),
            DataMode::Simulation => {
                let fleet = self.simulated_fleet();
                let history = fleet.history(self.config.time_series_points);
                (Arc::new(fleet) as Arc<dyn NodeSource>, history)
            }
        };

        info!("starting fleet monitor in {} mode", mode);
        let handle = PollScheduler::start(
            source,
            SchedulerConfig::from(&self.config),
            Arc::clone(&self.clock),
            history,
        );
        self.running = Some((mode, handle));
    }

    /// Restarts in `mode` unless already running in it.
    pub async fn switch_mode(&mut self, mode: DataMode) {
        if self.mode() == Some(mode) {
            return;
        }
        info!("switching data mode to {}", mode);
        self.start(mode).await;
    }

    pub async fn stop(&mut self) {
        if let Some((_, handle)) = self.running.take() {
            handle.stop().await;
        }
    }

    fn simulated_fleet(&self) -> SimulatedFleet {
        let cfg = &self.config;
        let now = self.clock.now_ms();
        let simulator = match self.simulation_seed {
            Some(seed) => FaultSimulator::with_seed(
                cfg.simulated_nodes,
                cfg.total_cells,
                cfg.replication_factor,
                cfg.faults,
                seed,
            ),
            None => FaultSimulator::new(
                cfg.simulated_nodes,
                cfg.total_cells,
                cfg.replication_factor,
                cfg.faults,
                now,
            ),
        };
        SimulatedFleet::new(simulator, Arc::clone(&self.clock))
    }

    // ────────────────────────────────────────────────────────────────────────
    // Snapshots
    // ────────────────────────────────────────────────────────────────────────

    /// Latest published snapshot.
    ///
    /// When stopped, live mode reports the discovery state as last
    /// reconciled, without polling. A stopped simulation has no fleet.
    pub fn snapshot(&self) -> FleetSnapshot {
        if let Some((_, handle)) = &self.running {
            return handle.latest();
        }
        let now = self.clock.now_ms();
        match self.default_mode() {
            DataMode::Live => FleetSnapshot::build(
                SnapshotContext {
                    mode: DataMode::Live,
                    known_endpoints: self.discovery.list_endpoints().len(),
                    total_cells: self.config.total_cells,
                    replication_factor: self.config.replication_factor,
                    taken_at: now,
                },
                self.discovery.nodes(),
                self.discovery.connections(),
                Vec::new(),
            ),
            DataMode::Simulation => FleetSnapshot::empty(
                DataMode::Simulation,
                self.config.total_cells,
                self.config.replication_factor,
                now,
            ),
        }
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<FleetSnapshot>> {
        self.running.as_ref().map(|(_, handle)| handle.subscribe())
    }

    /// Requests an immediate poll of the running source.
    pub fn refresh(&self) {
        if let Some((_, handle)) = &self.running {
            handle.refresh();
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Endpoints (live discovery)
    // ────────────────────────────────────────────────────────────────────────

    pub fn add_endpoint(&self, endpoint: &str) -> bool {
        self.discovery.add_endpoint(endpoint)
    }

    pub fn remove_endpoint(&self, endpoint: &str) -> bool {
        self.discovery.remove_endpoint(endpoint)
    }

    pub fn prune_unreachable(&self) -> usize {
        self.discovery.prune_unreachable()
    }

    pub fn list_endpoints(&self) -> Vec<String> {
        self.discovery.list_endpoints()
    }

    pub fn connections(&self) -> Vec<Connection> {
        match &self.running {
            Some((_, handle)) => handle.source().connections(),
            None => self.discovery.connections(),
        }
    }

    pub fn discovery(&self) -> &Arc<NodeDiscovery> {
        &self.discovery
    }

    pub fn poll_metrics(&self) -> &Arc<PollMetrics> {
        self.discovery.metrics()
    }
}
