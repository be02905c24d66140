//! # Port Prober
//!
//! Finds nodes on local ports when no directory is configured, or as a
//! supplementary discovery path.
//!
//! Every `(host, port)` pair gets one `GET http://<host>:<port>/health`
//! with a short timeout. All probes run concurrently, so a hanging port
//! costs at most one timeout for the whole scan. Any 2xx answer makes the
//! address a candidate.
//!
//! Loopback aliases (`localhost`, `127.0.0.1`, `::1`) name the same socket,
//! so a port answering under several of them yields one endpoint: the first
//! configured host wins, and a port already known under any alias is not
//! probed again.

use std::collections::HashSet;

use futures::future::join_all;
use reqwest::Client;
use tracing::debug;

use crate::config::ProbeConfig;

/// Concurrent `/health` scanner.
#[derive(Clone)]
pub struct PortProber {
    client: Client,
    config: ProbeConfig,
}

impl PortProber {
    pub fn new(config: ProbeConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    /// Addresses the scan covers, in host-major order.
    pub fn candidates(&self) -> Vec<String> {
        self.config
            .hosts
            .iter()
            .flat_map(|host| {
                (self.config.port_start..=self.config.port_end)
                    .map(move |port| format!("http://{}:{}", host, port))
            })
            .collect()
    }

    /// Candidates whose socket is not already in `known` under any alias.
    pub fn targets(&self, known: &HashSet<String>) -> Vec<String> {
        let known_sockets: HashSet<String> = known.iter().map(|e| socket_key(e)).collect();
        self.candidates()
            .into_iter()
            .filter(|e| !known_sockets.contains(&socket_key(e)))
            .collect()
    }

    /// Probes every candidate not already in `known`.
    ///
    /// Returns the responsive endpoints.
    pub async fn scan(&self, known: &HashSet<String>) -> Vec<String> {
        let checks = self.targets(known).into_iter().map(|endpoint| async move {
            if self.probe(&endpoint).await {
                Some(endpoint)
            } else {
                None
            }
        });
        let mut seen = HashSet::new();
        let found: Vec<String> = join_all(checks)
            .await
            .into_iter()
            .flatten()
            .filter(|e| seen.insert(socket_key(e)))
            .collect();
        debug!("port scan found {} responsive endpoints", found.len());
        found
    }

    /// `true` if `<endpoint>/health` answers 2xx within the timeout.
    pub async fn probe(&self, endpoint: &str) -> bool {
        match self.client.get(format!("{}/health", endpoint)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Endpoint with loopback host aliases folded together.
fn socket_key(endpoint: &str) -> String {
    let rest = endpoint.split_once("://").map_or(endpoint, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or(rest);
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) if !p.contains(']') => (h, p),
        _ => (authority, ""),
    };
    let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
    let host = match host.as_str() {
        "localhost" | "::1" => "127.0.0.1",
        h => h,
    };
    format!("{}:{}", host, port)
}
