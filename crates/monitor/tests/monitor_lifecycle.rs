//! # Fleet Monitor Integration Tests: Lifecycle
//!
//! Runs the full monitor (scheduler, live discovery, simulation) against an
//! HTTP stub with short real intervals.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::sync::watch;

    use fleet_monitor::{
        DataMode, FaultConfig, FleetMonitor, FleetSnapshot, MonitorConfig, NodeStatus, ProbeConfig,
        SnapshotError,
    };

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Endpoints come only from the test: the directory refuses
    /// connections and local ports are never scanned.
    fn config() -> MonitorConfig {
        MonitorConfig {
            directory_url: Some("http://127.0.0.1:1".to_string()),
            probe: ProbeConfig {
                always: false,
                ..ProbeConfig::default()
            },
            poll_interval: Duration::from_millis(50),
            rediscovery_interval: Duration::from_secs(60),
            total_cells: 4,
            replication_factor: 1,
            simulated_nodes: 3,
            faults: FaultConfig::none(),
            ..MonitorConfig::default()
        }
    }

    /// Waits until a published snapshot satisfies `pred`.
    async fn wait_for<F>(rx: &mut watch::Receiver<FleetSnapshot>, pred: F) -> FleetSnapshot
    where
        F: Fn(&FleetSnapshot) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let snap = rx.borrow_and_update();
                    if pred(&snap) {
                        return snap.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("snapshot condition not reached")
    }

    #[tokio::test]
    async fn live_add_remove_and_switch_to_simulation() {
        let url = serve(Router::new().route(
            "/metrics",
            get(|| async { Json(json!({"nodeId": "n1", "throughput": 42.0, "cells": [{"id": 2}]})) }),
        ))
        .await;

        let mut monitor = FleetMonitor::new(config()).unwrap();
        monitor.start(DataMode::Live).await;
        let mut rx = monitor.subscribe().unwrap();

        wait_for(&mut rx, |s| s.error == Some(SnapshotError::NoEndpoints) && s.taken_at > 0).await;

        assert!(monitor.add_endpoint(&url));
        let snap = wait_for(&mut rx, |s| s.nodes.iter().any(|n| n.status == NodeStatus::Healthy)).await;
        assert_eq!(snap.nodes.len(), 1);
        assert_eq!(snap.summary.total_throughput, 42.0);
        assert_eq!(snap.summary.healthy_cells, 1);
        assert_eq!(snap.summary.empty_cells, 3);
        assert!(monitor.poll_metrics().snapshot().fetch_successes >= 1);

        assert!(monitor.remove_endpoint(&url));
        let snap = wait_for(&mut rx, |s| s.nodes.is_empty()).await;
        assert_eq!(snap.error, Some(SnapshotError::NoEndpoints));
        assert!(monitor.connections().is_empty());

        monitor.switch_mode(DataMode::Simulation).await;
        let mut rx = monitor.subscribe().unwrap();
        let snap = wait_for(&mut rx, |s| s.mode == DataMode::Simulation && !s.nodes.is_empty()).await;
        assert_eq!(snap.nodes.len(), 3);
        assert!(snap.nodes.iter().all(|n| n.endpoint.starts_with("sim://")));
        assert_eq!(snap.time_series.len(), 60);

        monitor.stop().await;
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_none_reachable() {
        let config = config();
        assert!(!config.probe_enabled());
        let mut monitor = FleetMonitor::new(config).unwrap();
        monitor.add_endpoint("http://127.0.0.1:1");
        monitor.start(DataMode::Live).await;
        let mut rx = monitor.subscribe().unwrap();

        let snap = wait_for(&mut rx, |s| !s.nodes.is_empty()).await;
        assert_eq!(snap.error, Some(SnapshotError::NoneReachable));
        assert_eq!(snap.nodes[0].status, NodeStatus::Offline);

        assert_eq!(monitor.prune_unreachable(), 1);
        assert!(monitor.list_endpoints().is_empty());
        monitor.stop().await;
    }
}
