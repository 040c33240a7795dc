//! Public HTTP surface (spec.md §6): read routes backed by cache/fan-out/
//! enrichment, write routes that publish client-signed events, SSE
//! streams bridging the topic fabric, and the health/metrics endpoints.

pub mod filter_query;
pub mod respond;
pub mod routes;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppContext;

pub async fn start_rest_server(ctx: Arc<AppContext>) -> Result<()> {
    let port = ctx.config.port;
    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;

    let router = build_router(ctx.clone());

    info!(%addr, "REST API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(ctx))
        .await?;
    Ok(())
}

async fn shutdown_signal(ctx: Arc<AppContext>) {
    ctx.shutdown.cancelled().await;
    info!("shutdown signal received, draining in-flight requests");
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let mut router = Router::new()
        .route("/timeline", get(routes::timeline::get_timeline))
        .route("/thread/{id}", get(routes::thread::get_thread))
        .route("/profile/{pubkey}", get(routes::profile::get_profile))
        .route("/notifications", get(routes::notifications::get_notifications))
        .route("/post", post(routes::actions::post_event))
        .route("/reply", post(routes::actions::post_event))
        .route("/react", post(routes::actions::post_event))
        .route("/repost", post(routes::actions::post_event))
        .route("/bookmark", post(routes::actions::post_event))
        .route("/mute", post(routes::actions::post_event))
        .route("/follow", post(routes::actions::post_event))
        .route("/zap", post(routes::actions::post_event))
        .route("/stream/timeline", get(routes::stream::stream_timeline))
        .route("/stream/notifications", get(routes::stream::stream_notifications))
        .route("/stream/config", get(routes::stream::stream_config))
        .route("/stream/corrections", get(routes::stream::stream_corrections))
        .route("/health", get(routes::health::health))
        .route("/health/live", get(routes::health::live))
        .route("/health/ready", get(routes::health::ready))
        .route("/metrics", get(routes::metrics::get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    if ctx.config.gzip_enabled {
        router = router.layer(CompressionLayer::new());
    }

    router.with_state(ctx)
}
