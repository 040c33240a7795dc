//! `GET /notifications` (spec.md §6): replies, reactions, reposts and
//! zap receipts that `#p`-tag the caller's pubkey.

use crate::enrich;
use crate::error::AppError;
use crate::model::{Filter, PubKey, TagFilter};
use crate::rest::respond::{cached_json, Meta, Page};
use crate::AppContext;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    pubkey: String,
    since: Option<i64>,
    limit: Option<u16>,
}

/// Kinds that can notify a pubkey: replies/mentions (1), reposts (6),
/// reactions (7), zap receipts (9735).
const NOTIFYING_KINDS: [u32; 4] = [1, 6, 7, 9735];

pub async fn get_notifications(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(q): Query<NotificationsQuery>,
) -> Result<Response, AppError> {
    let pubkey = PubKey::from_hex(&q.pubkey).map_err(|e| AppError::invalid(e.to_string()))?;

    let filter = Filter {
        kinds: Some(NOTIFYING_KINDS.to_vec()),
        tags: vec![TagFilter { name: "p".into(), values: vec![q.pubkey.clone()] }],
        since: q.since,
        limit: q.limit.unwrap_or(50),
        ..Default::default()
    };
    filter.validate().map_err(|e| AppError::invalid(e.to_string()))?;

    let relays = &ctx.config.relay_urls;
    let tunables = &ctx.config.tunables;
    let result = crate::fanout::query(&ctx.pool, &ctx.health, tunables, relays, filter.clone()).await?;
    let events: Vec<_> = result.events.into_iter().filter(|e| e.pubkey != pubkey).collect();

    let enrichment = enrich::enrich(&ctx.pool, &ctx.health, &ctx.profile_batcher, tunables, relays, &events).await;

    let next_until = filter.next_page(&events).and_then(|f| f.until);
    let page = Page {
        events: serde_json::json!({ "items": &events, "enrichment": enrichment }),
        meta: Meta { eose_union: result.eose_union, enrichment_degraded: enrichment.degraded, next_until },
    };
    Ok(cached_json(&headers, &events, &page))
}
