//! Prometheus-compatible counters for the agency.
//!
//! Tracks routing outcomes, remote deliveries, agent lifecycle and HTTP traffic.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Every counter the agency exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    RoutedLocal,
    RoutedRemote,
    Dropped,
    AddressLookups,
    DeliveriesOk,
    DeliveriesFailed,
    Ingested,
    AgentsStarted,
    AgentsTerminated,
    AgentsCrashed,
    HttpRequests,
    HttpErrors,
    LogRecordsDropped,
}

impl Counter {
    const ALL: [Counter; 13] = [
        Counter::RoutedLocal,
        Counter::RoutedRemote,
        Counter::Dropped,
        Counter::AddressLookups,
        Counter::DeliveriesOk,
        Counter::DeliveriesFailed,
        Counter::Ingested,
        Counter::AgentsStarted,
        Counter::AgentsTerminated,
        Counter::AgentsCrashed,
        Counter::HttpRequests,
        Counter::HttpErrors,
        Counter::LogRecordsDropped,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Counter::RoutedLocal => "cmap_messages_routed_local_total",
            Counter::RoutedRemote => "cmap_messages_routed_remote_total",
            Counter::Dropped => "cmap_messages_dropped_total",
            Counter::AddressLookups => "cmap_address_lookups_total",
            Counter::DeliveriesOk => "cmap_remote_deliveries_total",
            Counter::DeliveriesFailed => "cmap_remote_delivery_failures_total",
            Counter::Ingested => "cmap_messages_ingested_total",
            Counter::AgentsStarted => "cmap_agents_started_total",
            Counter::AgentsTerminated => "cmap_agents_terminated_total",
            Counter::AgentsCrashed => "cmap_agents_crashed_total",
            Counter::HttpRequests => "cmap_http_requests_total",
            Counter::HttpErrors => "cmap_http_errors_total",
            Counter::LogRecordsDropped => "cmap_log_records_dropped_total",
        }
    }

    fn help(self) -> &'static str {
        match self {
            Counter::RoutedLocal => "Messages delivered to a local inbox by the router.",
            Counter::RoutedRemote => "Messages handed to a remote agency queue.",
            Counter::Dropped => "Messages dropped because the destination could not be resolved.",
            Counter::AddressLookups => "Agent address lookups sent to the directory.",
            Counter::DeliveriesOk => "Messages accepted by a remote agency.",
            Counter::DeliveriesFailed => "Remote deliveries that failed or were rejected.",
            Counter::Ingested => "Messages received from peer agencies.",
            Counter::AgentsStarted => "Agent execution contexts started.",
            Counter::AgentsTerminated => "Agent execution contexts terminated.",
            Counter::AgentsCrashed => "Agent execution contexts that crashed.",
            Counter::HttpRequests => "Control API requests served.",
            Counter::HttpErrors => "Control API requests answered with 4xx/5xx.",
            Counter::LogRecordsDropped => "Log records dropped because the sink queue was full.",
        }
    }
}

/// Shared metrics registry. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    counters: [AtomicU64; Counter::ALL.len()],
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                counters: std::array::from_fn(|_| AtomicU64::new(0)),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn inc(&self, counter: Counter) {
        self.inner.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.inner.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let uptime = self.inner.started_at.elapsed().as_secs();
        let _ = writeln!(out, "# HELP cmap_uptime_seconds Time since the agency started.");
        let _ = writeln!(out, "# TYPE cmap_uptime_seconds gauge");
        let _ = writeln!(out, "cmap_uptime_seconds {uptime}");
        for counter in Counter::ALL {
            let name = counter.name();
            let _ = writeln!(out);
            let _ = writeln!(out, "# HELP {name} {}", counter.help());
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {}", self.get(counter));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counter_increments() {
        let m = Metrics::new();
        m.inc(Counter::HttpRequests);
        m.inc(Counter::HttpRequests);
        m.inc(Counter::RoutedLocal);
        let output = m.render_prometheus();
        assert!(output.contains("cmap_http_requests_total 2"));
        assert!(output.contains("cmap_messages_routed_local_total 1"));
        assert!(output.contains("cmap_messages_dropped_total 0"));
    }

    #[test]
    fn test_metrics_clones_share_counters() {
        let m = Metrics::new();
        let clone = m.clone();
        clone.inc(Counter::DeliveriesFailed);
        assert_eq!(m.get(Counter::DeliveriesFailed), 1);
    }

    #[test]
    fn test_metrics_prometheus_format() {
        let m = Metrics::new();
        let output = m.render_prometheus();
        assert!(output.contains("# HELP cmap_uptime_seconds"));
        assert!(output.contains("# TYPE cmap_uptime_seconds gauge"));
        assert!(output.contains("# TYPE cmap_remote_deliveries_total counter"));
    }

    #[test]
    fn test_counter_names_are_unique() {
        let mut names: Vec<_> = Counter::ALL.iter().map(|c| c.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Counter::ALL.len());
    }
}
