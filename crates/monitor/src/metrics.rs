//! Poll Metrics
//!
//! Lock-free counters describing what the discovery pipeline has done.
//!
//! | Metric | Description |
//! |--------|-------------|
//! | poll_cycles | Completed metrics-poll cycles |
//! | fetch_successes | Endpoint fetches that produced a record |
//! | fetch_failures | Endpoint fetches that failed |
//! | discarded_results | Fetch results dropped (endpoint removed or cycle cancelled) |
//! | directory_failures | Directory lookups that returned nothing due to an error |
//! | probe_hits | Endpoints found by the port prober |
//! | refresh_requests | Out-of-band refreshes requested by store mutations |

use std::sync::atomic::{AtomicU64, Ordering};

// ════════════════════════════════════════════════════════════════════════════════
// POLL METRICS
// ════════════════════════════════════════════════════════════════════════════════

/// Pipeline counters.
///
/// Increments use `Ordering::Relaxed`; reads use `Ordering::SeqCst`.
#[derive(Debug, Default)]
pub struct PollMetrics {
    poll_cycles: AtomicU64,
    fetch_successes: AtomicU64,
    fetch_failures: AtomicU64,
    discarded_results: AtomicU64,
    directory_failures: AtomicU64,
    probe_hits: AtomicU64,
    refresh_requests: AtomicU64,
}

/// Point-in-time copy of [`PollMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollMetricsSnapshot {
    pub poll_cycles: u64,
    pub fetch_successes: u64,
    pub fetch_failures: u64,
    pub discarded_results: u64,
    pub directory_failures: u64,
    pub probe_hits: u64,
    pub refresh_requests: u64,
}

impl PollMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_poll_cycle(&self) {
        self.poll_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_fetch_successes(&self, count: u64) {
        self.fetch_successes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_fetch_failures(&self, count: u64) {
        self.fetch_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_discarded_results(&self, count: u64) {
        self.discarded_results.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_directory_failure(&self) {
        self.directory_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_probe_hits(&self, count: u64) {
        self.probe_hits.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_refresh_request(&self) {
        self.refresh_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> PollMetricsSnapshot {
        PollMetricsSnapshot {
            poll_cycles: self.poll_cycles.load(Ordering::SeqCst),
            fetch_successes: self.fetch_successes.load(Ordering::SeqCst),
            fetch_failures: self.fetch_failures.load(Ordering::SeqCst),
            discarded_results: self.discarded_results.load(Ordering::SeqCst),
            directory_failures: self.directory_failures.load(Ordering::SeqCst),
            probe_hits: self.probe_hits.load(Ordering::SeqCst),
            refresh_requests: self.refresh_requests.load(Ordering::SeqCst),
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // PROMETHEUS EXPORT
    // ════════════════════════════════════════════════════════════════════════════

    /// Prometheus text exposition of every counter.
    ///
    /// ```text
    /// # HELP fleet_monitor_poll_cycles_total Completed metrics-poll cycles
    /// # TYPE fleet_monitor_poll_cycles_total counter
    /// fleet_monitor_poll_cycles_total 0
    /// ```
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let rows: [(&str, &str, u64); 7] = [
            ("poll_cycles_total", "Completed metrics-poll cycles", s.poll_cycles),
            ("fetch_successes_total", "Endpoint fetches that produced a record", s.fetch_successes),
            ("fetch_failures_total", "Endpoint fetches that failed", s.fetch_failures),
            ("discarded_results_total", "Fetch results dropped before being applied", s.discarded_results),
            ("directory_failures_total", "Directory lookups that failed", s.directory_failures),
            ("probe_hits_total", "Endpoints found by the port prober", s.probe_hits),
            ("refresh_requests_total", "Out-of-band refreshes requested", s.refresh_requests),
        ];

        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP fleet_monitor_{name} {help}\n# TYPE fleet_monitor_{name} counter\nfleet_monitor_{name} {value}\n"
            ));
        }
        out
    }
}
