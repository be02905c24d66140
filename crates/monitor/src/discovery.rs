//! # Node Discovery
//!
//! [`NodeDiscovery`] owns the endpoint store, connection map and node
//! registry, and runs the reconciliation cycle over them.
//!
//! ## Poll Cycle
//!
//! ```text
//!  list endpoints ──▶ fetch all concurrently ──▶ wait for every result
//!                                                      │
//!                  ┌───────────────────────────────────┘
//!                  ▼
//!        cycle invalidated? ── yes ──▶ discard everything
//!                  │ no
//!                  ▼
//!        per endpoint: still known? ── no ──▶ discard result
//!                  │ yes
//!                  ▼
//!        success ─▶ apply_success      failure ─▶ apply_failure
//!                  │
//!                  ▼
//!        one record per currently known endpoint
//! ```
//!
//! Fetches never hold the lock. Results are applied under a single write
//! lock, so a concurrent `remove_endpoint` either happens before the apply
//! (the result is discarded) or after it (the record is removed).
//!
//! Endpoint changes are persisted after the lock is released, so a slow
//! disk never stalls a poll cycle waiting to apply its results.
//!
//! ## Rediscovery
//!
//! Directory lookups and port probes only ever add endpoints. An endpoint
//! that disappears from the directory keeps its record until an operator
//! removes it or prunes unreachable endpoints.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::MonitorConfig;
use crate::directory::DirectoryClient;
use crate::endpoint_store::{normalize_endpoint, EndpointStore, FilePersistence, PendingSave};
use crate::error::FleetError;
use crate::fetcher::{HttpMetricsFetcher, MetricsFetch};
use crate::metrics::PollMetrics;
use crate::prober::PortProber;
use crate::registry::NodeRegistry;
use crate::source::{DataMode, NodeSource};
use crate::types::{Connection, NodeRecord};

struct DiscoveryState {
    store: EndpointStore,
    registry: NodeRegistry,
}

/// Live discovery and reconciliation service.
pub struct NodeDiscovery {
    state: RwLock<DiscoveryState>,
    fetcher: Arc<dyn MetricsFetch>,
    directory: Option<(DirectoryClient, String)>,
    prober: Option<PortProber>,
    clock: Arc<dyn Clock>,
    /// Bumped to invalidate poll cycles in flight.
    epoch: AtomicU64,
    refresh: Arc<Notify>,
    metrics: Arc<PollMetrics>,
}

impl NodeDiscovery {
    /// Service without directory or prober.
    pub fn new(store: EndpointStore, fetcher: Arc<dyn MetricsFetch>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(DiscoveryState {
                store,
                registry: NodeRegistry::new(),
            }),
            fetcher,
            directory: None,
            prober: None,
            clock,
            epoch: AtomicU64::new(0),
            refresh: Arc::new(Notify::new()),
            metrics: Arc::new(PollMetrics::new()),
        }
    }

    /// Adds a directory service consulted on every rediscovery.
    pub fn with_directory(mut self, client: DirectoryClient, directory_url: impl Into<String>) -> Self {
        self.directory = Some((client, directory_url.into()));
        self
    }

    /// Adds a local port prober consulted on every rediscovery.
    pub fn with_prober(mut self, prober: PortProber) -> Self {
        self.prober = Some(prober);
        self
    }

    /// Wires HTTP fetcher, directory, prober and persistence from `config`.
    pub fn from_config(config: &MonitorConfig) -> Result<Self, FleetError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = match &config.endpoints_file {
            Some(path) => EndpointStore::open(Box::new(FilePersistence::new(path))),
            None => EndpointStore::in_memory(),
        };
        let fetcher = HttpMetricsFetcher::with_timeout(config.metrics_timeout, Arc::clone(&clock))
            .map_err(|e| FleetError::Client(e.to_string()))?;

        let mut discovery = Self::new(store, Arc::new(fetcher), clock);
        if let Some(url) = &config.directory_url {
            let client = DirectoryClient::with_timeout(config.directory_timeout)
                .map_err(|e| FleetError::Client(e.to_string()))?;
            discovery = discovery.with_directory(client, url.clone());
        }
        if config.probe_enabled() {
            let prober =
                PortProber::new(config.probe.clone()).map_err(|e| FleetError::Client(e.to_string()))?;
            discovery = discovery.with_prober(prober);
        }
        Ok(discovery)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Endpoint operations
    // ────────────────────────────────────────────────────────────────────────

    /// Adds an endpoint. Returns `false` if it was empty or already known.
    ///
    /// A new endpoint requests an out-of-band refresh.
    pub fn add_endpoint(&self, endpoint: &str) -> bool {
        let (added, save) = {
            let mut state = self.state.write();
            let added = state.store.add(endpoint);
            (added, state.store.take_save())
        };
        persist(save);
        match added {
            Some(normalized) => {
                info!("endpoint added: {}", normalized);
                self.request_refresh();
                true
            }
            None => false,
        }
    }

    /// Removes an endpoint together with its record and connection.
    ///
    /// Returns `false` if the endpoint was unknown.
    pub fn remove_endpoint(&self, endpoint: &str) -> bool {
        let Some(normalized) = normalize_endpoint(endpoint) else {
            return false;
        };
        let (removed, save) = {
            let mut state = self.state.write();
            let removed = state.store.remove(&normalized);
            state.registry.remove(&normalized);
            (removed, state.store.take_save())
        };
        persist(save);
        if removed {
            info!("endpoint removed: {}", normalized);
            self.request_refresh();
        }
        removed
    }

    /// Removes every endpoint whose latest fetch failed.
    ///
    /// Returns the number of endpoints removed.
    pub fn prune_unreachable(&self) -> usize {
        let (removed, save) = {
            let mut state = self.state.write();
            let unreachable = state.registry.unreachable_endpoints();
            for endpoint in &unreachable {
                state.registry.remove(endpoint);
            }
            (state.store.remove_all(&unreachable), state.store.take_save())
        };
        persist(save);
        if removed > 0 {
            info!("pruned {} unreachable endpoints", removed);
            self.request_refresh();
        }
        removed
    }

    /// Known endpoints, sorted.
    pub fn list_endpoints(&self) -> Vec<String> {
        self.state.read().store.list()
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.state.read().registry.connections()
    }

    /// Current record of every known endpoint without polling.
    pub fn nodes(&self) -> Vec<NodeRecord> {
        let state = self.state.read();
        state.registry.snapshot_for(&state.store.list(), self.clock.now_ms())
    }

    /// `true` once endpoint persistence has failed this session.
    pub fn is_session_only(&self) -> bool {
        self.state.read().store.is_session_only()
    }

    pub fn metrics(&self) -> &Arc<PollMetrics> {
        &self.metrics
    }

    fn request_refresh(&self) {
        self.metrics.record_refresh_request();
        self.refresh.notify_one();
    }

    // ────────────────────────────────────────────────────────────────────────
    // Cycles
    // ────────────────────────────────────────────────────────────────────────

    /// Consults the directory and the prober and stores what they find.
    ///
    /// Returns the number of new endpoints.
    pub async fn rediscover(&self) -> usize {
        let mut found: Vec<String> = Vec::new();

        if let Some((client, url)) = &self.directory {
            match client.try_fetch(url).await {
                Ok(candidates) => found.extend(candidates),
                Err(e) => {
                    warn!("directory {} unavailable: {}", url, e);
                    self.metrics.record_directory_failure();
                }
            }
        }

        if let Some(prober) = &self.prober {
            let known: HashSet<String> = self.list_endpoints().into_iter().collect();
            let hits = prober.scan(&known).await;
            self.metrics.add_probe_hits(hits.len() as u64);
            found.extend(hits);
        }

        let (added, save) = {
            let mut state = self.state.write();
            let added = state.store.extend(found);
            (added, state.store.take_save())
        };
        if let Some(save) = save {
            if let Err(e) = tokio::task::spawn_blocking(move || save.write()).await {
                warn!("endpoint save task failed: {}", e);
            }
        }
        if !added.is_empty() {
            info!("rediscovery added {} endpoints", added.len());
            self.request_refresh();
        }
        added.len()
    }

    /// Runs one reconciliation cycle.
    ///
    /// Returns one record per endpoint known when the cycle finishes.
    pub async fn discover_nodes(&self) -> Vec<NodeRecord> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let endpoints = self.list_endpoints();

        let results = join_all(endpoints.iter().map(|endpoint| {
            let fetcher = Arc::clone(&self.fetcher);
            async move { fetcher.fetch(endpoint).await }
        }))
        .await;

        let now = self.clock.now_ms();
        let mut state = self.state.write();

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("poll cycle cancelled, discarding {} results", results.len());
            self.metrics.add_discarded_results(results.len() as u64);
            return state.registry.snapshot_for(&state.store.list(), now);
        }

        let (mut ok, mut failed, mut discarded) = (0u64, 0u64, 0u64);
        for (endpoint, result) in endpoints.iter().zip(results) {
            if !state.store.contains(endpoint) {
                discarded += 1;
                continue;
            }
            match result {
                Ok(record) => {
                    ok += 1;
                    state.registry.apply_success(endpoint, record, now);
                }
                Err(e) => {
                    failed += 1;
                    debug!("fetch {} failed: {}", endpoint, e);
                    state.registry.apply_failure(endpoint, now);
                }
            }
        }

        self.metrics.record_poll_cycle();
        self.metrics.add_fetch_successes(ok);
        self.metrics.add_fetch_failures(failed);
        self.metrics.add_discarded_results(discarded);
        debug!("poll cycle: {} ok, {} failed, {} discarded", ok, failed, discarded);

        state.registry.snapshot_for(&state.store.list(), now)
    }

    /// Makes every cycle currently in flight discard its results.
    pub fn invalidate_in_flight(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

fn persist(save: Option<PendingSave>) {
    if let Some(save) = save {
        save.write();
    }
}

#[async_trait]
impl NodeSource for NodeDiscovery {
    fn mode(&self) -> DataMode {
        DataMode::Live
    }

    async fn poll(&self) -> Vec<NodeRecord> {
        self.discover_nodes().await
    }

    async fn rediscover(&self) -> usize {
        NodeDiscovery::rediscover(self).await
    }

    fn connections(&self) -> Vec<Connection> {
        NodeDiscovery::connections(self)
    }

    fn known_endpoints(&self) -> usize {
        self.state.read().store.len()
    }

    fn invalidate_in_flight(&self) {
        NodeDiscovery::invalidate_in_flight(self)
    }

    fn refresh_signal(&self) -> Option<Arc<Notify>> {
        Some(Arc::clone(&self.refresh))
    }
}
