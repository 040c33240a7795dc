//! `POST /post`, `/reply`, `/react`, `/repost`, `/bookmark`, `/mute`,
//! `/follow`, `/zap` (spec.md §6): every write route accepts a client-signed
//! event and publishes it unchanged — the distinction between "a post" and
//! "a reaction" lives entirely in the event's own `kind`/tags, so one
//! handler serves all eight paths.

use crate::codec;
use crate::csrf;
use crate::error::AppError;
use crate::model::Event;
use crate::publish::{self, PublishResult};
use crate::sse::{SseMessage, Topic};
use crate::AppContext;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use std::sync::Arc;

const CSRF_HEADER: &str = "x-csrf-token";

pub async fn post_event(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(event): Json<Event>,
) -> Result<Json<PublishResult>, AppError> {
    let token = headers
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::CsrfInvalid)?;
    if !csrf::verify(&ctx.config.csrf_secret, token) {
        return Err(AppError::CsrfInvalid);
    }

    if compute_and_check(&event).is_err() {
        return Err(AppError::invalid("event id/signature mismatch"));
    }

    ctx.metrics.inc_publish_attempt();
    let result = publish::publish(
        &ctx.pool,
        &ctx.health,
        ctx.config.tunables.publish_ok_timeout,
        &ctx.config.relay_urls,
        event.clone(),
    )
    .await;

    if result.success {
        ctx.metrics.inc_publish_success();
        ctx.cache.dirty_by_member(&event.id).await;
        let topic = Topic::for_kind(event.kind);
        ctx.sse
            .publish(topic, SseMessage { event: "published".into(), data: serde_json::json!(&event) })
            .await;
    }

    Ok(Json(result))
}

fn compute_and_check(event: &Event) -> Result<(), ()> {
    if codec::compute_event_id(event) != event.id {
        return Err(());
    }
    if !codec::verify_event_signature(event) {
        return Err(());
    }
    Ok(())
}
