//! # Poll Scheduler
//!
//! Drives a [`NodeSource`] on two independent loops and publishes a
//! [`FleetSnapshot`] after every completed poll.
//!
//! ```text
//!  ┌──────────── metrics loop ─────────────┐   ┌──── rediscovery loop ────┐
//!  │ wait: tick | refresh | manual | stop  │   │ wait: tick | stop        │
//!  │ poll source (abandoned on stop)       │   │ rediscover (abandoned    │
//!  │ record time-series point              │   │   on stop)               │
//!  │ publish snapshot                      │   └──────────────────────────┘
//!  └───────────────────────────────────────┘
//! ```
//!
//! Both loops fire once immediately. Missed ticks are skipped, never
//! replayed. After [`SchedulerHandle::stop`] returns, nothing else is
//! published and every poll still in flight has been invalidated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::snapshot::{FleetSnapshot, SnapshotContext};
use crate::source::NodeSource;
use crate::timeseries::{TimeSeriesBuffer, TimeSeriesPoint};

/// Timing and classification parameters of a scheduler run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub rediscovery_interval: Duration,
    pub total_cells: u32,
    pub replication_factor: usize,
    pub time_series_points: usize,
}

impl From<&MonitorConfig> for SchedulerConfig {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval,
            rediscovery_interval: cfg.rediscovery_interval,
            total_cells: cfg.total_cells,
            replication_factor: cfg.replication_factor,
            time_series_points: cfg.time_series_points,
        }
    }
}

pub struct PollScheduler;

impl PollScheduler {
    /// Spawns both loops on the current runtime.
    ///
    /// `history` seeds the time-series window.
    pub fn start(
        source: Arc<dyn NodeSource>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        history: Vec<TimeSeriesPoint>,
    ) -> SchedulerHandle {
        let mut buffer = TimeSeriesBuffer::new(config.time_series_points);
        buffer.extend(history);

        let mut initial = FleetSnapshot::empty(
            source.mode(),
            config.total_cells,
            config.replication_factor,
            clock.now_ms(),
        );
        initial.time_series = buffer.points();

        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let manual = Arc::new(Notify::new());

        info!(
            "scheduler started in {} mode: poll every {:?}, rediscover every {:?}",
            source.mode(),
            config.poll_interval,
            config.rediscovery_interval
        );

        let metrics_task = tokio::spawn(metrics_loop(
            Arc::clone(&source),
            config,
            Arc::clone(&clock),
            buffer,
            snapshot_tx,
            Arc::clone(&manual),
            shutdown_rx.clone(),
        ));
        let rediscovery_task = tokio::spawn(rediscovery_loop(
            Arc::clone(&source),
            config.rediscovery_interval,
            shutdown_rx,
        ));

        SchedulerHandle {
            source,
            snapshots: snapshot_rx,
            shutdown: shutdown_tx,
            manual,
            tasks: vec![metrics_task, rediscovery_task],
        }
    }
}

/// Control handle of a running scheduler.
pub struct SchedulerHandle {
    source: Arc<dyn NodeSource>,
    snapshots: watch::Receiver<FleetSnapshot>,
    shutdown: watch::Sender<bool>,
    manual: Arc<Notify>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Latest published snapshot.
    pub fn latest(&self) -> FleetSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<FleetSnapshot> {
        self.snapshots.clone()
    }

    pub fn source(&self) -> &Arc<dyn NodeSource> {
        &self.source
    }

    /// Requests an immediate poll.
    pub fn refresh(&self) {
        self.manual.notify_one();
    }

    /// Cancels in-flight work and waits for both loops to exit.
    pub async fn stop(self) {
        self.source.invalidate_in_flight();
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("scheduler task ended abnormally: {}", e);
            }
        }
        info!("scheduler stopped");
    }
}

async fn wait_for(signal: &Option<Arc<Notify>>) {
    match signal {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

async fn metrics_loop(
    source: Arc<dyn NodeSource>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    mut history: TimeSeriesBuffer,
    snapshots: watch::Sender<FleetSnapshot>,
    manual: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let refresh = source.refresh_signal();
    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            _ = wait_for(&refresh) => debug!("refresh requested by source"),
            _ = manual.notified() => debug!("manual refresh"),
        }
        if *shutdown.borrow() {
            break;
        }

        let nodes = tokio::select! {
            _ = shutdown.changed() => break,
            nodes = source.poll() => nodes,
        };

        let now = clock.now_ms();
        history.record(&nodes, now);
        let snapshot = FleetSnapshot::build(
            SnapshotContext {
                mode: source.mode(),
                known_endpoints: source.known_endpoints(),
                total_cells: config.total_cells,
                replication_factor: config.replication_factor,
                taken_at: now,
            },
            nodes,
            source.connections(),
            history.points(),
        );
        if let Some(err) = snapshot.error {
            debug!("fleet condition: {}", err);
        }
        snapshots.send_replace(snapshot);
    }
    debug!("metrics loop exited");
}

async fn rediscovery_loop(source: Arc<dyn NodeSource>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        let added = tokio::select! {
            _ = shutdown.changed() => break,
            added = source.rediscover() => added,
        };
        if added > 0 {
            debug!("rediscovery found {} endpoints", added);
        }
    }
    debug!("rediscovery loop exited");
}
