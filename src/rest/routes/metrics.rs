//! `GET /metrics` — Prometheus text exposition (spec.md §6).

use crate::metrics::PrometheusGauges;
use crate::AppContext;
use axum::extract::State;
use std::sync::Arc;

pub async fn get_metrics(State(ctx): State<Arc<AppContext>>) -> String {
    let health = ctx.health.metrics_snapshot().await;
    let gauges = PrometheusGauges {
        relays_healthy: health.healthy,
        relays_unhealthy: health.unhealthy,
        avg_latency_ms: health.avg_latency_ms,
        connections_open: ctx.pool.open_count().await,
        cache_entries: ctx.cache.query_entry_count().await,
    };
    ctx.metrics.render_prometheus(&gauges)
}
