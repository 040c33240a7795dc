//! In-process counters exposed at `GET /metrics` in Prometheus text
//! format (spec.md §6). No `prometheus` crate dependency — every counter
//! is an inline `AtomicU64`, matching the teacher's own hand-rolled
//! approach rather than pulling in the registry-based crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
pub struct Metrics {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub singleflight_joins: AtomicU64,
    pub fanout_queries_total: AtomicU64,
    pub publish_attempts_total: AtomicU64,
    pub publish_successes_total: AtomicU64,
    pub sse_messages_sent_total: AtomicU64,
    pub sse_messages_dropped_total: AtomicU64,
    pub upstream_protocol_errors_total: AtomicU64,
    pub backpressure_rejections_total: AtomicU64,
    pub started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            singleflight_joins: AtomicU64::new(0),
            fanout_queries_total: AtomicU64::new(0),
            publish_attempts_total: AtomicU64::new(0),
            publish_successes_total: AtomicU64::new(0),
            sse_messages_sent_total: AtomicU64::new(0),
            sse_messages_dropped_total: AtomicU64::new(0),
            upstream_protocol_errors_total: AtomicU64::new(0),
            backpressure_rejections_total: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn inc_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_fanout_query(&self) {
        self.fanout_queries_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_publish_attempt(&self) {
        self.publish_attempts_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_publish_success(&self) {
        self.publish_successes_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_backpressure_rejection(&self) {
        self.backpressure_rejections_total.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_upstream_protocol_error(&self) {
        self.upstream_protocol_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Renders the counters plus live gauges (relay health, open
    /// connections, SSE subscriber counts) supplied by the caller, since
    /// those live in the `HealthStore` / `ConnectionPool` / `SseFabric`,
    /// not here.
    pub fn render_prometheus(&self, gauges: &PrometheusGauges) -> String {
        let uptime = self.started_at.elapsed().as_secs();
        let g = |name: &str, help: &str, value: impl std::fmt::Display| {
            format!("# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n")
        };
        let c = |name: &str, help: &str, value: u64| {
            format!("# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n")
        };

        let mut out = String::new();
        out.push_str(&g("relaygate_uptime_seconds", "Process uptime in seconds.", uptime));
        out.push_str(&g("relaygate_relays_healthy", "Relays not currently in backoff.", gauges.relays_healthy));
        out.push_str(&g("relaygate_relays_unhealthy", "Relays currently in backoff.", gauges.relays_unhealthy));
        out.push_str(&g(
            "relaygate_relay_latency_ms_avg",
            "EWMA latency across known relays, milliseconds.",
            format!("{:.2}", gauges.avg_latency_ms),
        ));
        out.push_str(&g("relaygate_connections_open", "Currently open relay connections.", gauges.connections_open));
        out.push_str(&g("relaygate_cache_entries", "Cached query result entries.", gauges.cache_entries));
        out.push_str(&c(
            "relaygate_cache_hits_total",
            "Query cache hits.",
            self.cache_hits.load(Ordering::Relaxed),
        ));
        out.push_str(&c(
            "relaygate_cache_misses_total",
            "Query cache misses.",
            self.cache_misses.load(Ordering::Relaxed),
        ));
        out.push_str(&c(
            "relaygate_fanout_queries_total",
            "Fan-out queries issued.",
            self.fanout_queries_total.load(Ordering::Relaxed),
        ));
        out.push_str(&c(
            "relaygate_publish_attempts_total",
            "Publish attempts.",
            self.publish_attempts_total.load(Ordering::Relaxed),
        ));
        out.push_str(&c(
            "relaygate_publish_successes_total",
            "Publish attempts accepted by at least one relay.",
            self.publish_successes_total.load(Ordering::Relaxed),
        ));
        out.push_str(&c(
            "relaygate_sse_messages_dropped_total",
            "SSE messages dropped due to a full subscriber buffer.",
            self.sse_messages_dropped_total.load(Ordering::Relaxed),
        ));
        out.push_str(&c(
            "relaygate_upstream_protocol_errors_total",
            "Malformed or oversize frames rejected from relays.",
            self.upstream_protocol_errors_total.load(Ordering::Relaxed),
        ));
        out.push_str(&c(
            "relaygate_backpressure_rejections_total",
            "Requests rejected due to a saturated send queue.",
            self.backpressure_rejections_total.load(Ordering::Relaxed),
        ));
        out
    }
}

#[derive(Debug, Default)]
pub struct PrometheusGauges {
    pub relays_healthy: usize,
    pub relays_unhealthy: usize,
    pub avg_latency_ms: f64,
    pub connections_open: usize,
    pub cache_entries: usize,
}

pub type SharedMetrics = Arc<Metrics>;
