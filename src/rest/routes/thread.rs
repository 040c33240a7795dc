//! `GET /thread/{id}` (spec.md §6): a root event plus every reply that
//! tags it, merged and enriched the same way as the timeline route.

use crate::enrich;
use crate::error::AppError;
use crate::model::{Event, EventId, Filter, TagFilter};
use crate::rest::respond::{cached_json, Meta, Page};
use crate::AppContext;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use std::sync::Arc;

pub async fn get_thread(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(id_hex): Path<String>,
) -> Result<Response, AppError> {
    let root_id = EventId::from_hex(&id_hex).map_err(|e| AppError::invalid(e.to_string()))?;

    let root_filter = Filter { ids: Some(vec![root_id]), limit: 1, ..Default::default() };
    let replies_filter = Filter {
        kinds: Some(vec![1]),
        tags: vec![TagFilter { name: "e".into(), values: vec![id_hex.clone()] }],
        limit: 200,
        ..Default::default()
    };

    let relays = &ctx.config.relay_urls;
    let tunables = &ctx.config.tunables;

    let (root_result, replies_result) = tokio::join!(
        crate::fanout::query(&ctx.pool, &ctx.health, tunables, relays, root_filter),
        crate::fanout::query(&ctx.pool, &ctx.health, tunables, relays, replies_filter),
    );

    let root_result = root_result?;
    let replies_result = replies_result?;

    if root_result.events.is_empty() {
        return Err(AppError::NotFound);
    }

    let mut events: Vec<Event> = root_result.events;
    events.extend(replies_result.events);
    let eose_union = root_result.eose_union && replies_result.eose_union;

    let enrichment = enrich::enrich(&ctx.pool, &ctx.health, &ctx.profile_batcher, tunables, relays, &events).await;

    let page = Page {
        events: serde_json::json!({ "root": root_id, "items": &events, "enrichment": enrichment }),
        meta: Meta { eose_union, enrichment_degraded: enrichment.degraded, next_until: None },
    };
    Ok(cached_json(&headers, &events, &page))
}
