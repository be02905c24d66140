//! # Fleet Monitor Integration Tests: HTTP Pipeline
//!
//! Exercises the discovery pipeline against real HTTP stubs bound to
//! `127.0.0.1:0`.
//!
//! ## Test Categories
//!
//! | Category | What It Tests |
//! |----------|---------------|
//! | A. Directory | Envelope parsing, field priority, failures as zero candidates |
//! | B. Metrics Fetch | Field mapping, defaults, malformed bodies, non-2xx |
//! | C. Reconciliation | Success then failure keeps the last metrics, hanging nodes cost one timeout |
//! | D. Port Probing | Responsive ports are added once, known and hanging ones don't stall the scan |
//! | E. Persistence | Endpoints survive a monitor restart |

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    use fleet_monitor::{
        ClusterSummary, DirectoryClient, DirectoryError, EndpointStore, FetchError, FleetMonitor,
        HttpMetricsFetcher, ManualClock, MetricsFetch, MonitorConfig, NodeDiscovery, NodeStatus, PortProber,
        ProbeConfig, TeePlatform,
    };

    // ═══════════════════════════════════════════════════════════════════════
    // STUB SERVERS
    // ═══════════════════════════════════════════════════════════════════════

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        serve_on(listener, app)
    }

    fn serve_on(listener: tokio::net::TcpListener, app: Router) -> String {
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// `n` listeners on consecutive loopback ports, for range scans.
    async fn bind_port_block(n: u16) -> Vec<tokio::net::TcpListener> {
        for _ in 0..50 {
            let first = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = first.local_addr().unwrap().port();
            if base.checked_add(n).is_none() {
                continue;
            }
            let mut block = vec![first];
            for port in base + 1..base + n {
                match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
                    Ok(l) => block.push(l),
                    Err(_) => break,
                }
            }
            if block.len() == n as usize {
                return block;
            }
        }
        panic!("no block of {} free consecutive ports", n);
    }

    /// Router whose `route` never answers within any test timeout.
    fn hanging(route: &str) -> Router {
        Router::new().route(
            route,
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        )
    }

    fn metrics_body(node_id: &str, throughput: f64) -> Value {
        json!({
            "nodeId": node_id,
            "peerId": "12D3KooWabc",
            "secure": true,
            "teePlatform": "IntelTDX",
            "teeAttested": true,
            "uptime": 3600,
            "cells": [
                {"id": 7, "signal": 42.5, "queueDepth": 3, "role": "primary"},
                {"id": 8, "signal": 150, "queueDepth": 0}
            ],
            "ownedCells": [9],
            "workers": {"active": 4, "total": 8, "max": 16},
            "latency": {"p50": 10.0, "p95": 20.0, "p99": 30.0, "avg": 12.0, "samples": 100},
            "throughput": throughput,
            "tasksProcessed": 1000,
            "tasksFailed": 2,
            "peers": ["p1", "p2"]
        })
    }

    /// Metrics stub that answers 503 while `down` is set.
    async fn toggling_node(node_id: &'static str, throughput: f64) -> (String, Arc<AtomicBool>) {
        let down = Arc::new(AtomicBool::new(false));
        let app = Router::new()
            .route(
                "/metrics",
                get(move |State(down): State<Arc<AtomicBool>>| async move {
                    if down.load(Ordering::SeqCst) {
                        StatusCode::SERVICE_UNAVAILABLE.into_response()
                    } else {
                        Json(metrics_body(node_id, throughput)).into_response()
                    }
                }),
            )
            .with_state(Arc::clone(&down));
        (serve(app).await, down)
    }

    fn live_discovery() -> (NodeDiscovery, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let fetcher = HttpMetricsFetcher::with_timeout(Duration::from_secs(2), clock.clone()).unwrap();
        let d = NodeDiscovery::new(EndpointStore::in_memory(), Arc::new(fetcher), clock.clone());
        (d, clock)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // A. DIRECTORY
    // ═══════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn directory_envelope_resolves_every_field_kind() {
        let app = Router::new().route(
            "/nodes",
            get(|| async {
                Json(json!({"nodes": [
                    {"endpoint": "http://10.0.0.1:8080"},
                    {"url": "http://10.0.0.2:8080/"},
                    {"host": "node3.example"},
                    {"nodeId": "node4"},
                    {"endpoint": "http://10.0.0.1:8080"}
                ]}))
            }),
        );
        let url = serve(app).await;

        let got = DirectoryClient::new().unwrap().fetch(&url).await;
        assert_eq!(
            got,
            vec![
                "http://10.0.0.1:8080".to_string(),
                "http://10.0.0.2:8080".to_string(),
                "https://node3.example".to_string(),
                "https://node4".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn directory_failures_yield_no_candidates() {
        let app = Router::new()
            .route("/nodes", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
        let url = serve(app).await;
        let client = DirectoryClient::new().unwrap();

        assert!(client.fetch(&url).await.is_empty());
        assert!(matches!(client.try_fetch(&url).await, Err(DirectoryError::Status(500))));

        let garbage = serve(Router::new().route("/nodes", get(|| async { "not json" }))).await;
        assert!(matches!(client.try_fetch(&garbage).await, Err(DirectoryError::Malformed(_))));
    }

    #[tokio::test]
    async fn rediscovery_adds_directory_endpoints_once() {
        let app = Router::new().route(
            "/nodes",
            get(|| async { Json(json!([{"endpoint": "http://10.0.0.9:8080"}])) }),
        );
        let url = serve(app).await;
        let (d, _) = live_discovery();
        let d = d.with_directory(DirectoryClient::new().unwrap(), url);

        assert_eq!(d.rediscover().await, 1);
        assert_eq!(d.rediscover().await, 0);
        assert_eq!(d.list_endpoints(), vec!["http://10.0.0.9:8080".to_string()]);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // B. METRICS FETCH
    // ═══════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn metrics_body_maps_to_record() {
        let (url, _) = toggling_node("node-a", 250.0).await;
        let clock = Arc::new(ManualClock::new(77));
        let fetcher = HttpMetricsFetcher::with_timeout(Duration::from_secs(2), clock).unwrap();

        let r = fetcher.fetch(&url).await.unwrap();
        assert_eq!(r.node_id, "node-a");
        assert_eq!(r.endpoint, url);
        assert_eq!(r.status, NodeStatus::Healthy);
        assert_eq!(r.tee_platform, Some(TeePlatform::IntelTdx));
        assert_eq!(r.throughput, 250.0);
        assert_eq!(r.workers.max, 16);
        assert_eq!(r.cells.len(), 2);
        assert_eq!(r.cells[1].signal, 100.0);
        assert_eq!(r.claimed_cells(), vec![7, 8, 9]);
        assert_eq!(r.last_update, 77);
    }

    #[tokio::test]
    async fn empty_object_gets_defaults() {
        let url = serve(Router::new().route("/metrics", get(|| async { Json(json!({})) }))).await;
        let r = HttpMetricsFetcher::new().unwrap().fetch(&url).await.unwrap();
        assert_eq!(r.peer_id, "unknown");
        assert_eq!(r.throughput, 0.0);
        assert!(r.cells.is_empty());
        assert!(!r.node_id.is_empty());
    }

    #[tokio::test]
    async fn malformed_and_non_success_bodies_fail() {
        let fetcher = HttpMetricsFetcher::new().unwrap();

        let garbage = serve(Router::new().route("/metrics", get(|| async { "{not json" }))).await;
        assert!(matches!(fetcher.fetch(&garbage).await, Err(FetchError::Malformed(_))));

        let array = serve(Router::new().route("/metrics", get(|| async { Json(json!([1, 2])) }))).await;
        assert!(matches!(fetcher.fetch(&array).await, Err(FetchError::Malformed(_))));

        let missing = serve(Router::new()).await;
        assert!(matches!(fetcher.fetch(&missing).await, Err(FetchError::Status(404))));
    }

    #[tokio::test]
    async fn slow_node_times_out() {
        let app = Router::new().route(
            "/metrics",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({})).into_response()
            }),
        );
        let url = serve(app).await;
        let clock = Arc::new(ManualClock::new(0));
        let fetcher = HttpMetricsFetcher::with_timeout(Duration::from_millis(100), clock).unwrap();
        assert!(matches!(fetcher.fetch(&url).await, Err(FetchError::Timeout)));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // C. RECONCILIATION
    // ═══════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn failure_after_success_freezes_last_metrics() {
        let (url, down) = toggling_node("node-b", 120.0).await;
        let (d, clock) = live_discovery();
        assert!(d.add_endpoint(&url));

        let first = d.discover_nodes().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, NodeStatus::Healthy);

        down.store(true, Ordering::SeqCst);
        clock.advance(5_000);
        let second = d.discover_nodes().await;
        assert_eq!(second.len(), 1);
        let n = &second[0];
        assert_eq!(n.status, NodeStatus::Offline);
        assert_eq!(n.node_id, "node-b");
        assert_eq!(n.throughput, 120.0);
        assert_eq!(n.cells, first[0].cells);
        assert_eq!(n.last_update, 6_000);

        let conn = &d.connections()[0];
        assert!(!conn.connected);
        assert_eq!(conn.last_seen, Some(1_000));

        let summary = ClusterSummary::from_nodes(&second, 16, 1);
        assert_eq!(summary.active_nodes, 0);
        assert_eq!(summary.total_throughput, 0.0);

        down.store(false, Ordering::SeqCst);
        let third = d.discover_nodes().await;
        assert_eq!(third[0].status, NodeStatus::Healthy);
    }

    #[tokio::test]
    async fn two_endpoints_with_same_id_stay_separate() {
        let (a, _) = toggling_node("same", 1.0).await;
        let (b, _) = toggling_node("same", 2.0).await;
        let (d, _) = live_discovery();
        d.add_endpoint(&a);
        d.add_endpoint(&b);

        let nodes = d.discover_nodes().await;
        assert_eq!(nodes.len(), 2);
        let endpoints: HashSet<_> = nodes.iter().map(|n| n.endpoint.clone()).collect();
        assert_eq!(endpoints.len(), 2);
        let total: f64 = nodes.iter().map(|n| n.throughput).sum();
        assert_eq!(total, 3.0);
    }

    #[tokio::test]
    async fn hanging_endpoints_cost_one_timeout() {
        let clock = Arc::new(ManualClock::new(1_000));
        let fetcher = HttpMetricsFetcher::with_timeout(Duration::from_millis(300), clock.clone()).unwrap();
        let d = NodeDiscovery::new(EndpointStore::in_memory(), Arc::new(fetcher), clock);

        for _ in 0..10 {
            d.add_endpoint(&serve(hanging("/metrics")).await);
        }
        let (healthy, _) = toggling_node("steady", 5.0).await;
        d.add_endpoint(&healthy);

        let started = Instant::now();
        let nodes = d.discover_nodes().await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(300), "settled early: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1_500), "cycle stalled: {:?}", elapsed);
        assert_eq!(nodes.len(), 11);
        assert_eq!(nodes.iter().filter(|n| n.status == NodeStatus::Offline).count(), 10);
        let steady = nodes.iter().find(|n| n.endpoint == healthy).unwrap();
        assert_eq!(steady.status, NodeStatus::Healthy);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // D. PORT PROBING
    // ═══════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn prober_finds_responsive_port() {
        let url = serve(Router::new().route("/health", get(|| async { "ok" }))).await;
        let port: u16 = url.rsplit(':').next().unwrap().parse().unwrap();

        let prober = PortProber::new(ProbeConfig {
            hosts: vec!["127.0.0.1".into()],
            port_start: port,
            port_end: port,
            timeout: Duration::from_millis(500),
            always: true,
        })
        .unwrap();

        assert_eq!(prober.scan(&HashSet::new()).await, vec![url.clone()]);
        let known: HashSet<String> = [url.clone()].into_iter().collect();
        assert!(prober.scan(&known).await.is_empty());

        let (d, _) = live_discovery();
        let d = d.with_prober(prober);
        assert_eq!(d.rediscover().await, 1);
        assert_eq!(d.list_endpoints(), vec![url]);
    }

    #[tokio::test]
    async fn node_answering_on_both_loopback_names_is_added_once() {
        let url = serve(
            Router::new()
                .route("/health", get(|| async { "ok" }))
                .route("/metrics", get(|| async { Json(json!({"nodeId": "only-node", "cells": [{"id": 7}]})) })),
        )
        .await;
        let port: u16 = url.rsplit(':').next().unwrap().parse().unwrap();

        let default_hosts = PortProber::new(ProbeConfig {
            port_start: port,
            port_end: port,
            ..ProbeConfig::default()
        })
        .unwrap();
        assert_eq!(default_hosts.scan(&HashSet::new()).await.len(), 1);

        let both_names = PortProber::new(ProbeConfig {
            hosts: vec!["localhost".into(), "127.0.0.1".into()],
            port_start: port,
            port_end: port,
            ..ProbeConfig::default()
        })
        .unwrap();
        let found = both_names.scan(&HashSet::new()).await;
        assert_eq!(found, vec![format!("http://localhost:{}", port)]);

        let (d, _) = live_discovery();
        let d = d.with_prober(both_names);
        assert_eq!(d.rediscover().await, 1);
        assert_eq!(d.rediscover().await, 0);
        let nodes = d.discover_nodes().await;
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, "only-node");

        let summary = ClusterSummary::from_nodes(&nodes, 16, 2);
        assert_eq!(summary.healthy_cells, 0);
        assert_eq!(summary.degraded_cells, 1);
    }

    #[tokio::test]
    async fn hanging_ports_cost_one_probe_timeout() {
        let mut block = bind_port_block(6).await;
        let responsive = serve_on(block.pop().unwrap(), Router::new().route("/health", get(|| async { "ok" })));
        let port_start = block[0].local_addr().unwrap().port();
        for listener in block {
            serve_on(listener, hanging("/health"));
        }

        let prober = PortProber::new(ProbeConfig {
            hosts: vec!["127.0.0.1".into()],
            port_start,
            port_end: port_start + 5,
            timeout: Duration::from_millis(300),
            always: true,
        })
        .unwrap();

        let started = Instant::now();
        let found = prober.scan(&HashSet::new()).await;
        let elapsed = started.elapsed();

        assert_eq!(found, vec![responsive]);
        assert!(elapsed < Duration::from_millis(1_500), "scan stalled: {:?}", elapsed);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // E. PERSISTENCE
    // ═══════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn endpoints_survive_restart() {
        let dir = TempDir::new().unwrap();
        let config = MonitorConfig {
            endpoints_file: Some(dir.path().join("endpoints.json")),
            ..MonitorConfig::default()
        };

        {
            let m = FleetMonitor::new(config.clone()).unwrap();
            assert!(m.add_endpoint("http://10.0.0.1:8080/"));
            assert!(m.add_endpoint("http://10.0.0.2:8080"));
            assert!(m.remove_endpoint("http://10.0.0.2:8080"));
        }

        let m = FleetMonitor::new(config).unwrap();
        assert_eq!(m.list_endpoints(), vec!["http://10.0.0.1:8080".to_string()]);
        assert!(!m.discovery().is_session_only());

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("endpoints.json")).unwrap()).unwrap();
        assert_eq!(raw["discoveredEndpoints"], json!(["http://10.0.0.1:8080"]));
    }

    #[tokio::test]
    async fn unwritable_store_is_session_only() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let config = MonitorConfig {
            endpoints_file: Some(blocker.join("endpoints.json")),
            ..MonitorConfig::default()
        };
        let m = FleetMonitor::new(config).unwrap();
        assert!(m.add_endpoint("http://10.0.0.1:8080"));
        assert!(m.discovery().is_session_only());
        assert_eq!(m.list_endpoints().len(), 1);
    }
}
