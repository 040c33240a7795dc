//! `GET /profile/{pubkey}` (spec.md §6): single-author profile lookup,
//! routed through the same windowed batcher the timeline enrichment uses
//! so a burst of profile requests collapses into one upstream query.

use crate::error::AppError;
use crate::model::{Filter, PubKey};
use crate::AppContext;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// How many of the profile's own recent notes to return alongside it.
const AUTHORED_EVENTS_LIMIT: u16 = 50;

pub async fn get_profile(
    State(ctx): State<Arc<AppContext>>,
    Path(raw): Path<String>,
) -> Result<Response, AppError> {
    // npub (bech32) input is not decoded here — accept hex pubkeys only.
    let pubkey = PubKey::from_hex(&raw).map_err(|e| AppError::invalid(e.to_string()))?;

    let authored_filter = Filter {
        authors: Some(vec![pubkey]),
        kinds: Some(vec![1]),
        limit: AUTHORED_EVENTS_LIMIT,
        ..Default::default()
    };
    let (profile, authored) = tokio::join!(
        ctx.profile_batcher.get(pubkey),
        crate::fanout::query(&ctx.pool, &ctx.health, &ctx.config.tunables, &ctx.config.relay_urls, authored_filter),
    );
    let authored_events = authored.map(|r| r.events).unwrap_or_default();

    if profile.is_none() && authored_events.is_empty() {
        return Err(AppError::NotFound);
    }

    Ok(axum::Json(serde_json::json!({ "profile": profile, "events": authored_events })).into_response())
}
