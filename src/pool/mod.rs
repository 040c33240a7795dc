//! Connection Pool (C3, spec.md §4.3): dial-on-demand with a single-dial
//! guard per URL, a global cap on open connections, and idle eviction.
//! Grounded on the teacher's `AppContext` pattern of one `Arc`-wrapped
//! registry shared across request handlers.

use crate::config::Tunables;
use crate::connection::RelayConnection;
use crate::error::AppError;
use crate::health::HealthStore;
use crate::metrics::SharedMetrics;
use crate::relay_url::RelayUrl;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

struct Slot {
    conn: Arc<RelayConnection>,
    last_subscriber_at: Instant,
    subscriber_count: usize,
}

/// URL-keyed registry of live relay connections. A `tokio::sync::Mutex`
/// around the dial step would serialize every relay's connect attempt
/// behind one lock; instead each URL gets its own one-shot gate so
/// concurrent dials to different relays never block each other (spec.md
/// §9, "single-initialization gate with memoized error").
pub struct ConnectionPool {
    slots: RwLock<HashMap<RelayUrl, Slot>>,
    dial_gates: RwLock<HashMap<RelayUrl, Arc<tokio::sync::Mutex<()>>>>,
    tunables: Arc<Tunables>,
    health: Arc<HealthStore>,
    metrics: SharedMetrics,
    shutdown: CancellationToken,
}

impl ConnectionPool {
    pub fn new(
        tunables: Arc<Tunables>,
        health: Arc<HealthStore>,
        metrics: SharedMetrics,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            slots: RwLock::new(HashMap::new()),
            dial_gates: RwLock::new(HashMap::new()),
            tunables,
            health,
            metrics,
            shutdown,
        })
    }

    async fn gate_for(&self, url: &RelayUrl) -> Arc<tokio::sync::Mutex<()>> {
        if let Some(g) = self.dial_gates.read().await.get(url) {
            return g.clone();
        }
        let mut gates = self.dial_gates.write().await;
        gates
            .entry(url.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Returns an existing connection, or dials one. Refuses when the
    /// relay is in backoff (`Unhealthy`) or the pool is at capacity and
    /// no idle slot can be evicted.
    pub async fn get_or_dial(&self, url: &RelayUrl) -> Result<Arc<RelayConnection>, AppError> {
        if let Some(slot) = self.slots.read().await.get(url) {
            return Ok(slot.conn.clone());
        }

        if self.health.in_backoff(url).await {
            let retry_after = self.health.retry_after_secs(url).await;
            return Err(AppError::Unhealthy { retry_after_secs: retry_after.max(1) });
        }

        let gate = self.gate_for(url).await;
        let _permit = gate.lock().await;

        // Re-check: another caller may have finished dialing while we
        // waited for the gate.
        if let Some(slot) = self.slots.read().await.get(url) {
            return Ok(slot.conn.clone());
        }

        self.evict_idle_if_at_capacity().await;

        let conn = RelayConnection::spawn(
            url.clone(),
            self.tunables.clone(),
            self.health.clone(),
            self.metrics.clone(),
            self.shutdown.child_token(),
        );
        self.slots.write().await.insert(
            url.clone(),
            Slot { conn: conn.clone(), last_subscriber_at: Instant::now(), subscriber_count: 0 },
        );
        Ok(conn)
    }

    pub async fn mark_subscribed(&self, url: &RelayUrl) {
        if let Some(slot) = self.slots.write().await.get_mut(url) {
            slot.subscriber_count += 1;
            slot.last_subscriber_at = Instant::now();
        }
    }

    pub async fn mark_unsubscribed(&self, url: &RelayUrl) {
        if let Some(slot) = self.slots.write().await.get_mut(url) {
            slot.subscriber_count = slot.subscriber_count.saturating_sub(1);
            slot.last_subscriber_at = Instant::now();
        }
    }

    /// Evicts the oldest zero-subscriber connection when at capacity
    /// (spec.md §4.3: idle ≥60s with no subscribers is eviction-eligible).
    async fn evict_idle_if_at_capacity(&self) {
        let mut slots = self.slots.write().await;
        if slots.len() < self.tunables.max_open_connections {
            return;
        }
        let idle_after = self.tunables.idle_evict_after;
        let candidate = slots
            .iter()
            .filter(|(_, s)| s.subscriber_count == 0 && s.last_subscriber_at.elapsed() >= idle_after)
            .min_by_key(|(_, s)| s.last_subscriber_at)
            .map(|(url, _)| url.clone());

        if let Some(url) = candidate {
            if let Some(slot) = slots.remove(&url) {
                slot.conn.close();
                tracing::info!(relay = %url, "evicted idle connection");
            }
        }
    }

    pub async fn open_count(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn ready_count(&self) -> usize {
        self.slots.read().await.values().filter(|s| s.conn.is_ready()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Tunables;
    use crate::metrics::Metrics;

    #[tokio::test]
    async fn dialing_an_unhealthy_relay_returns_unhealthy_error() {
        let tunables = Arc::new(Tunables::default());
        let health = Arc::new(HealthStore::new());
        let url = RelayUrl::parse("wss://down.example").unwrap();
        health.record_failure(&url).await;

        let pool = ConnectionPool::new(tunables, health, Arc::new(Metrics::new()), CancellationToken::new());
        let err = pool.get_or_dial(&url).await.unwrap_err();
        assert!(matches!(err, AppError::Unhealthy { .. }));
    }
}
