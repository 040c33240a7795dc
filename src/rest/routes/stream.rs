//! `GET /stream/{timeline,notifications,config,corrections}` (spec.md
//! §6): long-lived SSE streams bridging the topic fabric to HTTP.
//! Grounded on the teacher's `rest/sse.rs` bridge, adapted from one
//! process-wide broadcast channel to one subscription per topic; the
//! `SseSubscription` itself lives inside the unfold state so dropping the
//! stream (client disconnect) triggers its registry cleanup.

use crate::sse::Topic;
use crate::AppContext;
use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

async fn next_message(
    ctx: Arc<AppContext>,
    topic: Topic,
) -> impl futures_util::Stream<Item = Result<SseEvent, Infallible>> {
    let idle_close_after = ctx.config.tunables.sse_idle_close_after;
    let subscription = ctx.sse.subscribe(topic).await;
    stream::unfold(subscription, move |mut sub| async move {
        let msg = tokio::time::timeout(idle_close_after, sub.receiver.recv()).await.ok()??;
        let event = SseEvent::default().event(msg.event).json_data(msg.data).unwrap_or_else(|_| SseEvent::default());
        Some((Ok(event), sub))
    })
}

pub async fn stream_timeline(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Sse::new(next_message(ctx, Topic::Timeline).await)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("ping"))
}

pub async fn stream_notifications(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Sse::new(next_message(ctx, Topic::Notifications).await)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("ping"))
}

pub async fn stream_config(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Sse::new(next_message(ctx, Topic::Config).await)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("ping"))
}

pub async fn stream_corrections(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    Sse::new(next_message(ctx, Topic::Corrections).await)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(30)).text("ping"))
}
