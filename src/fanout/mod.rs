//! Fan-Out Query (C5, spec.md §4.5): send one REQ per targeted relay,
//! merge results into a single deduplicated, canonically-ordered page.
//! Grounded on the teacher's `tokio::select!` fan-in style (`relay_loop`'s
//! three-way select) generalized from three fixed tasks to an arbitrary
//! per-relay subscription set.

use crate::config::Tunables;
use crate::health::HealthStore;
use crate::model::{sort_desc, Event, Filter};
use crate::multiplexer::{self, SubscriptionMessage};
use crate::pool::ConnectionPool;
use crate::relay_url::RelayUrl;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::Instant as TokioInstant;

/// Result of a fan-out query: the merged, truncated page plus whether
/// every targeted relay reached EOSE before the hard deadline.
#[derive(Clone)]
pub struct QueryResult {
    pub events: Vec<Event>,
    pub eose_union: bool,
}

/// Queries `relays` with `filter`, merging by event identifier. Events
/// seen from more than one relay keep the union of `relays_seen`
/// (spec.md §4.5, "Union merge"). Returns once every relay has reached
/// EOSE/CLOSED, or the soft-EOSE window has elapsed since the first
/// reply and no relay is still silent past `hard_deadline`.
pub async fn query(
    pool: &Arc<ConnectionPool>,
    health: &Arc<HealthStore>,
    tunables: &Tunables,
    relays: &[RelayUrl],
    filter: Filter,
) -> Result<QueryResult, crate::error::AppError> {
    filter.validate().map_err(|e| crate::error::AppError::invalid(e.to_string()))?;

    if relays.is_empty() {
        return Ok(QueryResult { events: vec![], eose_union: true });
    }

    let mut subs = Vec::new();
    let mut reachable = 0usize;
    for url in relays {
        match pool.get_or_dial(url).await {
            Ok(conn) => {
                pool.mark_subscribed(url).await;
                let sub = multiplexer::subscribe(conn, vec![filter.clone()], tunables.subscriber_buffer);
                subs.push((url.clone(), sub));
                reachable += 1;
            }
            Err(_) => {
                tracing::debug!(relay = %url, "skipping unhealthy relay for fan-out");
            }
        }
    }

    if reachable == 0 {
        return Ok(QueryResult { events: vec![], eose_union: false });
    }

    let mut union: HashMap<crate::model::EventId, Event> = HashMap::new();
    let mut done: Vec<bool> = vec![false; subs.len()];
    let start = Instant::now();
    let hard_deadline = TokioInstant::now() + tunables.hard_deadline;
    let mut soft_deadline: Option<TokioInstant> = None;

    loop {
        if done.iter().all(|d| *d) {
            break;
        }

        let soft_sleep = async {
            match soft_deadline {
                Some(t) => tokio::time::sleep_until(t).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(hard_deadline) => {
                for (idx, (url, _)) in subs.iter().enumerate() {
                    if !done[idx] {
                        tracing::debug!(relay = %url, "fan-out hard deadline reached with subscriber still open");
                    }
                }
                break;
            }
            _ = soft_sleep => {
                break;
            }
            (idx, msg) = recv_any(&mut subs, &done) => {
                match msg {
                    Some(SubscriptionMessage::Event(event)) => {
                        let (url, _) = &subs[idx];
                        union
                            .entry(event.id)
                            .and_modify(|e| { e.relays_seen.insert(url.clone()); })
                            .or_insert_with(|| {
                                let mut e = event;
                                e.relays_seen.insert(url.clone());
                                e
                            });
                        if soft_deadline.is_none() {
                            soft_deadline = Some(TokioInstant::now() + tunables.soft_eose_window);
                        }
                    }
                    Some(SubscriptionMessage::Eose) => {
                        let (url, _) = &subs[idx];
                        health.record_success(url, start.elapsed()).await;
                        done[idx] = true;
                        if soft_deadline.is_none() {
                            soft_deadline = Some(TokioInstant::now() + tunables.soft_eose_window);
                        }
                    }
                    Some(SubscriptionMessage::Closed(reason)) => {
                        let (url, _) = &subs[idx];
                        tracing::debug!(relay = %url, reason, "relay closed subscription");
                        done[idx] = true;
                    }
                    Some(SubscriptionMessage::Notice(text)) => {
                        tracing::debug!(notice = %text, "relay notice during fan-out");
                    }
                    None => {
                        done[idx] = true;
                    }
                }
            }
        }
    }

    let eose_union = done.iter().all(|d| *d);

    for (url, _) in &subs {
        pool.mark_unsubscribed(url).await;
    }

    let mut events: Vec<Event> = union.into_values().collect();
    sort_desc(&mut events);
    events.truncate(filter.limit as usize);

    Ok(QueryResult { events, eose_union })
}

/// Polls every not-yet-done subscription's channel and returns the first
/// message available, tagged with its index. `None` signals the
/// subscription's channel closed.
async fn recv_any(
    subs: &mut [(RelayUrl, multiplexer::Subscription)],
    done: &[bool],
) -> (usize, Option<SubscriptionMessage>) {
    use futures_util::stream::{FuturesUnordered, StreamExt};

    let mut futs = FuturesUnordered::new();
    for (idx, (_, sub)) in subs.iter_mut().enumerate() {
        if done[idx] {
            continue;
        }
        futs.push(async move { (idx, sub.messages.recv().await) });
    }

    match futs.next().await {
        Some(result) => result,
        None => std::future::pending().await,
    }
}
