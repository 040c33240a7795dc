//! Structured-logging helpers and the `/health` response shape.

use std::time::Instant;
use tracing::{debug, info};

/// Tracks latency of an async operation and emits a structured log line
/// on completion — slow operations (>1s) log at `info`, everything else
/// at `debug`.
pub struct LatencyTracker {
    operation: String,
    start: Instant,
}

impl LatencyTracker {
    pub fn start(operation: impl Into<String>) -> Self {
        Self { operation: operation.into(), start: Instant::now() }
    }

    pub fn finish(self) {
        let elapsed_ms = self.start.elapsed().as_millis();
        if elapsed_ms > 1000 {
            info!(operation = %self.operation, elapsed_ms, "slow operation");
        } else {
            debug!(operation = %self.operation, elapsed_ms, "operation complete");
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub relays_healthy: usize,
    pub relays_unhealthy: usize,
}

impl HealthStatus {
    pub fn of(uptime_secs: u64, relays_healthy: usize, relays_unhealthy: usize) -> Self {
        let status = if relays_healthy == 0 && relays_unhealthy > 0 { "degraded" } else { "ok" };
        Self { status, version: env!("CARGO_PKG_VERSION"), uptime_secs, relays_healthy, relays_unhealthy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_when_every_known_relay_is_unhealthy() {
        let h = HealthStatus::of(10, 0, 3);
        assert_eq!(h.status, "degraded");
    }

    #[test]
    fn ok_when_at_least_one_relay_is_healthy() {
        let h = HealthStatus::of(10, 1, 3);
        assert_eq!(h.status, "ok");
    }
}
