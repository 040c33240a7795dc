//! Health Store (C12, spec.md §4.12): per-relay EWMA latency, success
//! ratio over the last 50 outcomes, consecutive-failure count, and
//! earliest-retry time. Backed by a sharded concurrent map — the
//! crate-idiomatic analogue of the Go `sync.Map` spec.md §9 calls for.

use crate::relay_url::RelayUrl;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

const SHARD_COUNT: usize = 16;
const OUTCOME_WINDOW: usize = 50;
const EWMA_ALPHA: f64 = 0.2;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub latency_ewma_ms: f64,
    outcomes: VecDeque<bool>,
    pub consecutive_failures: u32,
    next_retry_at: Option<Instant>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            latency_ewma_ms: 0.0,
            outcomes: VecDeque::with_capacity(OUTCOME_WINDOW),
            consecutive_failures: 0,
            next_retry_at: None,
        }
    }
}

impl HealthRecord {
    pub fn success_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        let ok = self.outcomes.iter().filter(|o| **o).count();
        ok as f64 / self.outcomes.len() as f64
    }

    fn push_outcome(&mut self, ok: bool) {
        if self.outcomes.len() >= OUTCOME_WINDOW {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(ok);
    }

    fn in_backoff(&self) -> bool {
        self.next_retry_at
            .map(|t| Instant::now() < t)
            .unwrap_or(false)
    }

    /// Seconds remaining until the relay may be dialed again, for
    /// `Retry-After` headers (spec.md §7 `Unhealthy`).
    fn retry_after_secs(&self) -> u64 {
        self.next_retry_at
            .map(|t| t.saturating_duration_since(Instant::now()).as_secs().max(1))
            .unwrap_or(0)
    }
}

/// Exponential backoff window: `min(2^n * 1s, 5min)`, spec.md §4.2. No
/// jitter — this is a deliberate departure from the teacher's jittered
/// `scheduler::backoff`, which exists to spread out many independent
/// retrying clients; a relay's backoff window here is purely a local
/// health signal with no thundering-herd concern across processes.
fn backoff_for(consecutive_failures: u32) -> Duration {
    let exp = consecutive_failures.min(32);
    let scaled = BASE_BACKOFF.saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
    scaled.min(MAX_BACKOFF)
}

pub struct HealthStore {
    shards: Vec<RwLock<HashMap<RelayUrl, HealthRecord>>>,
    healthy_count: AtomicUsize,
    unhealthy_count: AtomicUsize,
}

impl Default for HealthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthStore {
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(RwLock::new(HashMap::new()));
        }
        Self {
            shards,
            healthy_count: AtomicUsize::new(0),
            unhealthy_count: AtomicUsize::new(0),
        }
    }

    fn shard_for(&self, relay: &RelayUrl) -> &RwLock<HashMap<RelayUrl, HealthRecord>> {
        let mut hash: u64 = 1469598103934665603;
        for b in relay.as_str().as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        &self.shards[(hash as usize) % SHARD_COUNT]
    }

    /// A successful EOSE decrements the failure signal (spec.md §4.12).
    pub async fn record_success(&self, relay: &RelayUrl, latency: Duration) {
        let mut guard = self.shard_for(relay).write().await;
        let rec = guard.entry(relay.clone()).or_default();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        rec.latency_ewma_ms = if rec.outcomes.is_empty() {
            latency_ms
        } else {
            EWMA_ALPHA * latency_ms + (1.0 - EWMA_ALPHA) * rec.latency_ewma_ms
        };
        rec.consecutive_failures = 0;
        rec.next_retry_at = None;
        rec.push_outcome(true);
    }

    /// A failure on any subscription-level error increments (spec.md §4.12)
    /// and schedules the next eligible dial time via the backoff formula.
    pub async fn record_failure(&self, relay: &RelayUrl) {
        let mut guard = self.shard_for(relay).write().await;
        let rec = guard.entry(relay.clone()).or_default();
        rec.consecutive_failures += 1;
        rec.push_outcome(false);
        let backoff = backoff_for(rec.consecutive_failures);
        rec.next_retry_at = Some(Instant::now() + backoff);
        tracing::warn!(
            relay = %relay,
            consecutive_failures = rec.consecutive_failures,
            backoff_secs = backoff.as_secs(),
            "relay health: failure recorded, entering backoff"
        );
    }

    /// Consulted by the Pool before dialing (spec.md §4.3).
    pub async fn in_backoff(&self, relay: &RelayUrl) -> bool {
        let guard = self.shard_for(relay).read().await;
        guard.get(relay).map(|r| r.in_backoff()).unwrap_or(false)
    }

    pub async fn retry_after_secs(&self, relay: &RelayUrl) -> u64 {
        let guard = self.shard_for(relay).read().await;
        guard.get(relay).map(|r| r.retry_after_secs()).unwrap_or(0)
    }

    pub async fn snapshot(&self, relay: &RelayUrl) -> HealthRecord {
        let guard = self.shard_for(relay).read().await;
        guard.get(relay).cloned().unwrap_or_default()
    }

    /// Minimum `Retry-After` across a relay set, for the `Unhealthy` error
    /// when every targeted relay is in backoff (spec.md §7).
    pub async fn min_retry_after_secs(&self, relays: &[RelayUrl]) -> u64 {
        let mut min = u64::MAX;
        for r in relays {
            let secs = self.retry_after_secs(r).await;
            if secs > 0 {
                min = min.min(secs);
            }
        }
        if min == u64::MAX {
            5
        } else {
            min
        }
    }

    /// Exposed metrics for `GET /metrics` (spec.md §4.12): healthy count,
    /// unhealthy count, average latency across all known relays.
    pub async fn metrics_snapshot(&self) -> HealthMetrics {
        let mut healthy = 0usize;
        let mut unhealthy = 0usize;
        let mut latency_sum = 0.0;
        let mut latency_n = 0usize;
        for shard in &self.shards {
            let guard = shard.read().await;
            for rec in guard.values() {
                if rec.in_backoff() {
                    unhealthy += 1;
                } else {
                    healthy += 1;
                }
                if rec.latency_ewma_ms > 0.0 {
                    latency_sum += rec.latency_ewma_ms;
                    latency_n += 1;
                }
            }
        }
        self.healthy_count.store(healthy, Ordering::Relaxed);
        self.unhealthy_count.store(unhealthy, Ordering::Relaxed);
        HealthMetrics {
            healthy,
            unhealthy,
            avg_latency_ms: if latency_n > 0 {
                latency_sum / latency_n as f64
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthMetrics {
    pub healthy: usize,
    pub unhealthy: usize,
    pub avg_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(s: &str) -> RelayUrl {
        RelayUrl::parse(s).unwrap()
    }

    #[test]
    fn backoff_formula_matches_spec() {
        assert_eq!(backoff_for(0), Duration::from_secs(1));
        assert_eq!(backoff_for(1), Duration::from_secs(2));
        assert_eq!(backoff_for(2), Duration::from_secs(4));
        assert_eq!(backoff_for(10), Duration::from_secs(5 * 60));
    }

    #[tokio::test]
    async fn failure_then_success_clears_backoff() {
        let store = HealthStore::new();
        let r = relay("wss://a.example");
        store.record_failure(&r).await;
        assert!(store.in_backoff(&r).await);
        store.record_success(&r, Duration::from_millis(50)).await;
        assert!(!store.in_backoff(&r).await);
    }

    #[tokio::test]
    async fn unknown_relay_is_not_in_backoff() {
        let store = HealthStore::new();
        assert!(!store.in_backoff(&relay("wss://unknown.example")).await);
    }

    #[tokio::test]
    async fn metrics_snapshot_counts_healthy_and_unhealthy() {
        let store = HealthStore::new();
        store.record_success(&relay("wss://a.example"), Duration::from_millis(10)).await;
        store.record_failure(&relay("wss://b.example")).await;
        let snap = store.metrics_snapshot().await;
        assert_eq!(snap.healthy, 1);
        assert_eq!(snap.unhealthy, 1);
    }
}
