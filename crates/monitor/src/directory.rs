//! # Directory Client
//!
//! Fetches candidate endpoints from the central directory service.
//!
//! ## Wire Format
//!
//! `GET <directory>/nodes` returns either a bare array or an envelope:
//!
//! ```text
//! [ {"endpoint": "http://h1:8080"}, {"host": "h2"} ]
//! { "nodes": [ ... ] }
//! ```
//!
//! Each entry resolves to one endpoint, first match wins:
//!
//! 1. `endpoint`
//! 2. `url`
//! 3. `https://<host>`
//! 4. `https://<nodeId>`
//!
//! Entries that resolve to nothing are skipped. Plain string entries are
//! taken as endpoints.
//!
//! ## Failure Policy
//!
//! [`DirectoryClient::fetch`] never fails: network errors, non-2xx status
//! and malformed bodies are logged and reported as zero candidates.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DIRECTORY_TIMEOUT_MS;
use crate::endpoint_store::normalize_endpoint;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("directory returned status {0}")]
    Status(u16),

    #[error("directory returned malformed body: {0}")]
    Malformed(String),
}

/// HTTP client for the directory service.
#[derive(Clone)]
pub struct DirectoryClient {
    client: Client,
}

impl DirectoryClient {
    /// Client with the default request timeout.
    pub fn new() -> Result<Self, DirectoryError> {
        Self::with_timeout(Duration::from_millis(DIRECTORY_TIMEOUT_MS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, DirectoryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Candidate endpoints listed by the directory at `directory_url`.
    ///
    /// Returns an empty list on any failure.
    pub async fn fetch(&self, directory_url: &str) -> Vec<String> {
        match self.try_fetch(directory_url).await {
            Ok(endpoints) => {
                debug!("directory {} listed {} candidates", directory_url, endpoints.len());
                endpoints
            }
            Err(e) => {
                warn!("directory {} unavailable: {}", directory_url, e);
                Vec::new()
            }
        }
    }

    /// Like [`fetch`](Self::fetch) but reports why nothing came back.
    pub async fn try_fetch(&self, directory_url: &str) -> Result<Vec<String>, DirectoryError> {
        let url = format!("{}/nodes", directory_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DirectoryError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        let json: Value =
            serde_json::from_str(&body).map_err(|e| DirectoryError::Malformed(e.to_string()))?;
        parse_directory_body(&json)
    }
}

/// Extracts candidate endpoints from a directory response body.
///
/// Fails only when the body is neither an array nor a `{nodes: [...]}`
/// envelope.
pub fn parse_directory_body(body: &Value) -> Result<Vec<String>, DirectoryError> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(map) => match map.get("nodes") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(DirectoryError::Malformed(
                    "object without a \"nodes\" array".to_string(),
                ))
            }
        },
        _ => {
            return Err(DirectoryError::Malformed(
                "expected an array or {\"nodes\": [...]}".to_string(),
            ))
        }
    };

    let mut out: Vec<String> = Vec::with_capacity(entries.len());
    for endpoint in entries.iter().filter_map(resolve_candidate) {
        if !out.contains(&endpoint) {
            out.push(endpoint);
        }
    }
    Ok(out)
}

/// Resolves one directory entry to a normalized endpoint.
pub fn resolve_candidate(entry: &Value) -> Option<String> {
    if let Value::String(s) = entry {
        return normalize_endpoint(s);
    }
    let field = |name: &str| {
        entry
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    if let Some(explicit) = field("endpoint").or_else(|| field("url")) {
        return normalize_endpoint(explicit);
    }
    field("host")
        .or_else(|| field("nodeId"))
        .and_then(|host| normalize_endpoint(&format!("https://{}", host)))
}
