//! `GET /health`, `/health/live`, `/health/ready` (spec.md §6).

use crate::observability::HealthStatus;
use crate::AppContext;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<HealthStatus> {
    let snapshot = ctx.health.metrics_snapshot().await;
    Json(HealthStatus::of(ctx.started_at.elapsed().as_secs(), snapshot.healthy, snapshot.unhealthy))
}

/// Liveness: the process is running and able to answer HTTP at all.
/// Never reflects relay health — that's what readiness is for.
pub async fn live() -> StatusCode {
    StatusCode::OK
}

/// Readiness: at least one relay must be reachable, otherwise this
/// instance shouldn't receive traffic from a load balancer.
pub async fn ready(State(ctx): State<Arc<AppContext>>) -> StatusCode {
    let snapshot = ctx.health.metrics_snapshot().await;
    if ctx.config.relay_urls.is_empty() || snapshot.healthy > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
