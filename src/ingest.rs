//! Live Ingest: the background subscriptions spec.md §2 describes as
//! "running background subscriptions that keep caches warm and push live
//! updates via server-sent events." One long-lived REQ per configured
//! relay, opened for the life of the process — independent of any HTTP
//! request — feeding both the [`EventCache`](crate::cache::EventCache)
//! (dirtying stale pages) and the [`SseFabric`](crate::sse::SseFabric).
//! Grounded on the same `multiplexer::subscribe` primitive the fan-out
//! query uses, but never closed on EOSE: a query wants a result set, an
//! ingest subscription wants everything after it.

use crate::model::Filter;
use crate::multiplexer::{self, SubscriptionMessage};
use crate::sse::{SseMessage, Topic};
use crate::AppContext;
use std::sync::Arc;
use std::time::Duration;

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(5);

/// Spawns one background task per configured relay. Each task redials and
/// resubscribes on its own after a connection drop; callers don't await
/// this — it runs for the lifetime of the process.
pub fn spawn(ctx: Arc<AppContext>) {
    for url in ctx.config.relay_urls.clone() {
        let ctx = ctx.clone();
        tokio::spawn(run_for_relay(ctx, url));
    }
}

async fn run_for_relay(ctx: Arc<AppContext>, url: crate::relay_url::RelayUrl) {
    loop {
        if ctx.shutdown.is_cancelled() {
            return;
        }

        let conn = match ctx.pool.get_or_dial(&url).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(relay = %url, err = %e, "ingest dial deferred, relay unhealthy");
                if sleep_or_shutdown(&ctx, RESUBSCRIBE_BACKOFF).await {
                    return;
                }
                continue;
            }
        };

        ctx.pool.mark_subscribed(&url).await;
        let filter = Filter {
            since: Some(chrono::Utc::now().timestamp()),
            limit: 200,
            ..Default::default()
        };
        let mut sub = multiplexer::subscribe(conn, vec![filter], ctx.config.tunables.subscriber_buffer);

        loop {
            tokio::select! {
                msg = sub.messages.recv() => {
                    match msg {
                        Some(SubscriptionMessage::Event(event)) => {
                            ctx.cache.dirty_by_member(&event.id).await;
                            let topic = Topic::for_kind(event.kind);
                            ctx.sse
                                .publish(
                                    topic,
                                    SseMessage { event: "event".into(), data: serde_json::json!(&event) },
                                )
                                .await;
                        }
                        Some(SubscriptionMessage::Closed(reason)) => {
                            tracing::debug!(relay = %url, reason, "ingest subscription closed by relay");
                            break;
                        }
                        Some(SubscriptionMessage::Eose) | Some(SubscriptionMessage::Notice(_)) => {}
                        None => break,
                    }
                }
                _ = ctx.shutdown.cancelled() => {
                    drop(sub);
                    ctx.pool.mark_unsubscribed(&url).await;
                    return;
                }
            }
        }

        ctx.pool.mark_unsubscribed(&url).await;
        if sleep_or_shutdown(&ctx, RESUBSCRIBE_BACKOFF).await {
            return;
        }
    }
}

/// Returns `true` if shutdown fired while waiting.
async fn sleep_or_shutdown(ctx: &AppContext, dur: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => false,
        _ = ctx.shutdown.cancelled() => true,
    }
}
