//! # Fleet Monitor CLI
//!
//! ## Commands
//!
//! - `watch`: run the scheduler and log a summary line per snapshot until Ctrl-C
//! - `poll`: one rediscovery plus one poll cycle, then print the snapshot
//!   - `--json`: print the full snapshot as JSON
//!   - `--metrics`: also print pipeline counters in Prometheus format
//! - `endpoints list`: show known endpoints
//! - `endpoints add <url>` / `endpoints remove <url>`: edit the persisted store
//! - `endpoints prune`: poll once, then drop every unreachable endpoint
//!
//! ## Environment Variables
//!
//! Every `FLEET_*` variable understood by `MonitorConfig::from_env` applies;
//! flags given on the command line win over the environment.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleet_monitor::snapshot::SnapshotContext;
use fleet_monitor::{
    Clock, Connection, DataMode, FleetMonitor, FleetSnapshot, MonitorConfig, NetworkId, NodeRecord, NodeSource,
    NodeStatus, SimulatedFleet, SystemClock, TimeSeriesPoint,
};

#[derive(Parser)]
#[command(version, about = "Fleet node discovery and health monitor")]
struct Cli {
    /// Directory service base URL
    #[arg(long, global = true)]
    directory: Option<String>,

    /// Directory preset: mainnet or devnet
    #[arg(long, global = true)]
    network: Option<String>,

    /// JSON file holding known endpoints
    #[arg(long, global = true)]
    endpoints_file: Option<PathBuf>,

    /// Use the fault simulation instead of the network
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll continuously and log a summary of every snapshot
    Watch {
        /// Override the poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Run one discovery and poll cycle and print the result
    Poll {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        metrics: bool,
    },

    /// Manage known endpoints
    Endpoints {
        #[command(subcommand)]
        cmd: EndpointCmd,
    },
}

#[derive(Subcommand)]
enum EndpointCmd {
    /// List known endpoints
    List,
    /// Add an endpoint
    Add { endpoint: String },
    /// Remove an endpoint
    Remove { endpoint: String },
    /// Poll once and remove every unreachable endpoint
    Prune,
}

fn load_config(cli: &Cli) -> Result<MonitorConfig> {
    let mut config = MonitorConfig::from_env()?;
    if let Some(raw) = &cli.network {
        let Some(network) = NetworkId::parse(raw) else {
            bail!("unknown network '{}', expected mainnet or devnet", raw);
        };
        config.directory_url = Some(network.directory_url().to_string());
    }
    if let Some(url) = &cli.directory {
        config.directory_url = Some(url.clone());
    }
    if let Some(path) = &cli.endpoints_file {
        config.endpoints_file = Some(path.clone());
    }
    if cli.simulate {
        config.simulate = true;
    }
    if let Commands::Watch { interval_ms: Some(ms) } = &cli.cmd {
        config.poll_interval = std::time::Duration::from_millis(*ms);
    }
    config.validate()?;
    Ok(config)
}

fn status_symbol(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Healthy => "✓",
        NodeStatus::Degraded => "!",
        NodeStatus::Offline => "✗",
    }
}

fn summary_line(snapshot: &FleetSnapshot) -> String {
    let s = &snapshot.summary;
    format!(
        "[{}] nodes {}/{} online ({} degraded) | cells {} healthy, {} degraded, {} empty | {:.0} tasks/s | p99 {:.1}ms",
        snapshot.mode,
        s.active_nodes,
        s.total_nodes,
        s.degraded_nodes,
        s.healthy_cells,
        s.degraded_cells,
        s.empty_cells,
        s.total_throughput,
        s.avg_latency_p99,
    )
}

fn print_snapshot(snapshot: &FleetSnapshot) {
    println!("{}", summary_line(snapshot));
    if let Some(err) = snapshot.error {
        println!("  {}", err);
    }
    println!();
    for node in &snapshot.nodes {
        println!(
            "  {} {:<40} {:<16} {:<9} {:>8.1} tasks/s  p99 {:>7.1}ms  cells {}",
            status_symbol(node.status),
            node.endpoint,
            node.node_id,
            node.status,
            node.throughput,
            node.latency.p99,
            node.claimed_cells().len(),
        );
    }
}

async fn run_watch(config: MonitorConfig) -> Result<()> {
    let mode = if config.simulate { DataMode::Simulation } else { DataMode::Live };
    let mut monitor = FleetMonitor::new(config)?;
    monitor.start(mode).await;

    let Some(mut snapshots) = monitor.subscribe() else {
        bail!("scheduler did not start");
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = summary_line(&snapshots.borrow_and_update());
                info!("{}", line);
            }
        }
    }

    monitor.stop().await;
    Ok(())
}

async fn one_cycle(monitor: &FleetMonitor, simulate: bool) -> (Vec<NodeRecord>, Vec<Connection>) {
    if simulate {
        let fleet = SimulatedFleet::from_config(monitor.config());
        let nodes = fleet.poll().await;
        return (nodes, fleet.connections());
    }
    let discovery = monitor.discovery();
    discovery.rediscover().await;
    let nodes = discovery.discover_nodes().await;
    (nodes, discovery.connections())
}

async fn run_poll(config: MonitorConfig, json: bool, metrics: bool) -> Result<()> {
    let simulate = config.simulate;
    let monitor = FleetMonitor::new(config)?;
    let (nodes, connections) = one_cycle(&monitor, simulate).await;

    let cfg = monitor.config();
    let mode = if simulate { DataMode::Simulation } else { DataMode::Live };
    let known = if simulate { cfg.simulated_nodes } else { monitor.list_endpoints().len() };
    let now = SystemClock.now_ms();
    let snapshot = FleetSnapshot::build(
        SnapshotContext {
            mode,
            known_endpoints: known,
            total_cells: cfg.total_cells,
            replication_factor: cfg.replication_factor,
            taken_at: now,
        },
        nodes.clone(),
        connections,
        vec![TimeSeriesPoint::from_nodes(&nodes, now)],
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    if metrics {
        println!();
        print!("{}", monitor.poll_metrics().to_prometheus());
    }
    Ok(())
}

async fn run_endpoints(config: MonitorConfig, cmd: EndpointCmd) -> Result<()> {
    if config.endpoints_file.is_none() {
        warn!("no endpoints file configured, changes last for this invocation only");
    }
    let monitor = FleetMonitor::new(config)?;

    match cmd {
        EndpointCmd::List => {
            let endpoints = monitor.list_endpoints();
            if endpoints.is_empty() {
                println!("no endpoints known");
            }
            for e in endpoints {
                println!("{}", e);
            }
        }
        EndpointCmd::Add { endpoint } => {
            if monitor.add_endpoint(&endpoint) {
                println!("added {}", endpoint);
            } else {
                println!("{} already known or empty", endpoint);
            }
        }
        EndpointCmd::Remove { endpoint } => {
            if monitor.remove_endpoint(&endpoint) {
                println!("removed {}", endpoint);
            } else {
                println!("{} not known", endpoint);
            }
        }
        EndpointCmd::Prune => {
            monitor.discovery().discover_nodes().await;
            let removed = monitor.prune_unreachable();
            println!("pruned {} unreachable endpoints", removed);
        }
    }

    if monitor.discovery().is_session_only() {
        warn!("endpoint persistence failed, store is session-only");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.cmd {
        Commands::Watch { .. } => run_watch(config).await,
        Commands::Poll { json, metrics } => run_poll(config, json, metrics).await,
        Commands::Endpoints { cmd } => run_endpoints(config, cmd).await,
    }
}
