//! `GET /timeline` (spec.md §6): fan-out + cache + enrichment for the
//! primary feed query.

use crate::enrich;
use crate::fanout;
use crate::rest::filter_query::FilterQuery;
use crate::rest::respond::{cached_json, Meta, Page};
use crate::AppContext;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use std::sync::Arc;

pub async fn get_timeline(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(q): Query<FilterQuery>,
) -> Result<Response, crate::error::AppError> {
    let filter = q.into_filter()?;
    let fp = filter.fingerprint();

    let (events, eose_union) = match ctx.cache.get(&fp).await {
        Some(entry) if entry.freshness == crate::cache::Freshness::Fresh => {
            ctx.metrics.inc_cache_hit();
            (entry.events, entry.eose_union)
        }
        cached => {
            ctx.metrics.inc_cache_miss();
            ctx.metrics.inc_fanout_query();
            let pool = ctx.pool.clone();
            let health = ctx.health.clone();
            let tunables = Arc::new(ctx.config.tunables.clone());
            let relays = ctx.config.relay_urls.clone();
            let filter_for_fetch = filter.clone();
            let result = ctx
                .query_gate
                .run(fp, move || async move {
                    fanout::query(&pool, &health, &tunables, &relays, filter_for_fetch)
                        .await
                        .unwrap_or(fanout::QueryResult { events: vec![], eose_union: false })
                })
                .await;
            ctx.cache.put(fp, result.events.clone(), result.eose_union).await;
            match cached {
                // Stale-while-revalidate: we already triggered a refetch above;
                // serve the stale copy immediately rather than wait on it.
                Some(entry) if entry.freshness == crate::cache::Freshness::Stale => {
                    (entry.events, entry.eose_union)
                }
                _ => (result.events.clone(), result.eose_union),
            }
        }
    };

    let enrichment = enrich::enrich(
        &ctx.pool,
        &ctx.health,
        &ctx.profile_batcher,
        &ctx.config.tunables,
        &ctx.config.relay_urls,
        &events,
    )
    .await;

    let next_until = filter.next_page(&events).and_then(|f| f.until);
    let page = Page {
        events: serde_json::json!({ "items": &events, "enrichment": enrichment }),
        meta: Meta { eose_union, enrichment_degraded: enrichment.degraded, next_until },
    };
    Ok(cached_json(&headers, &events, &page))
}
