//! Enrichment Pipeline (C9, spec.md §4.9): attaches author profiles,
//! reaction summaries, and reply counts to a page of events. Each
//! dimension fetches independently and degrades independently — a
//! failure in one never blocks the others or the base timeline.

use crate::batcher::KeyBatcher;
use crate::config::Tunables;
use crate::fanout;
use crate::health::HealthStore;
use crate::model::{Event, EventId, Filter, PubKey, TagFilter};
use crate::observability::LatencyTracker;
use crate::pool::ConnectionPool;
use crate::relay_url::RelayUrl;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type ProfileFetchFut = Pin<Box<dyn Future<Output = HashMap<PubKey, Event>> + Send>>;
type ProfileFetchFn = Box<dyn Fn(Vec<PubKey>) -> ProfileFetchFut + Send + Sync>;

/// Windowed profile lookup (spec.md §4.8/§4.9): many callers requesting
/// individual authors within the same ~50ms window collapse into one
/// `kinds:[0]` fan-out query instead of one query per author.
pub type ProfileBatcher = KeyBatcher<PubKey, Event, ProfileFetchFn>;

pub fn new_profile_batcher(
    pool: Arc<ConnectionPool>,
    health: Arc<HealthStore>,
    tunables: Arc<Tunables>,
    relays: Vec<RelayUrl>,
) -> Arc<ProfileBatcher> {
    let window = tunables.batch_window;
    let max_keys = tunables.batch_max_keys;
    let fetch: ProfileFetchFn = Box::new(move |authors: Vec<PubKey>| {
        let pool = pool.clone();
        let health = health.clone();
        let tunables = tunables.clone();
        let relays = relays.clone();
        Box::pin(async move {
            let filter = Filter { authors: Some(authors), kinds: Some(vec![0]), limit: 200, ..Default::default() };
            let mut out = HashMap::new();
            if let Ok(result) = fanout::query(&pool, &health, &tunables, &relays, filter).await {
                for event in result.events {
                    out.insert(event.pubkey, event);
                }
            }
            out
        })
    });
    KeyBatcher::new(window, max_keys, fetch)
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReactionSummary {
    pub likes: u32,
    pub reposts: u32,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Enrichment {
    pub profiles: HashMap<String, Event>,
    pub reactions: HashMap<String, ReactionSummary>,
    pub reply_counts: HashMap<String, u32>,
    /// Set when any dimension could not be fully resolved before its
    /// deadline — the caller still returns the base timeline, just
    /// without that dimension's data (spec.md §4.9, "partial-failure →
    /// empty contribution").
    pub degraded: bool,
}

/// Resolves profiles (kind 0), reaction counts, and reply counts for
/// `events`, each via an independent fan-out query so one relay's
/// slowness on reactions never delays profile resolution.
pub async fn enrich(
    pool: &Arc<ConnectionPool>,
    health: &Arc<HealthStore>,
    profile_batcher: &Arc<ProfileBatcher>,
    tunables: &Tunables,
    relays: &[RelayUrl],
    events: &[Event],
) -> Enrichment {
    let tracker = LatencyTracker::start("enrich");
    let authors: Vec<PubKey> = {
        let mut seen = std::collections::HashSet::new();
        events.iter().map(|e| e.pubkey).filter(|p| seen.insert(*p)).collect()
    };
    let ids: Vec<EventId> = events.iter().map(|e| e.id).collect();

    let (profiles_res, reactions_res, replies_res) = tokio::join!(
        fetch_profiles(profile_batcher, &authors),
        fetch_reactions(pool, health, tunables, relays, &ids),
        fetch_reply_counts(pool, health, tunables, relays, &ids),
    );

    let mut degraded = false;
    let profiles = profiles_res.unwrap_or_else(|| {
        degraded = true;
        HashMap::new()
    });
    let reactions = reactions_res.unwrap_or_else(|| {
        degraded = true;
        HashMap::new()
    });
    let reply_counts = replies_res.unwrap_or_else(|| {
        degraded = true;
        HashMap::new()
    });

    tracker.finish();
    Enrichment { profiles, reactions, reply_counts, degraded }
}

async fn fetch_profiles(batcher: &Arc<ProfileBatcher>, authors: &[PubKey]) -> Option<HashMap<String, Event>> {
    if authors.is_empty() {
        return Some(HashMap::new());
    }

    let results = futures_util::future::join_all(authors.iter().map(|a| {
        let batcher = batcher.clone();
        let author = *a;
        async move { (author, batcher.get(author).await) }
    }))
    .await;

    Some(results.into_iter().filter_map(|(author, ev)| ev.map(|e| (author.to_hex(), e))).collect())
}

async fn fetch_reactions(
    pool: &Arc<ConnectionPool>,
    health: &Arc<HealthStore>,
    tunables: &Tunables,
    relays: &[RelayUrl],
    ids: &[EventId],
) -> Option<HashMap<String, ReactionSummary>> {
    if ids.is_empty() {
        return Some(HashMap::new());
    }
    let tag = TagFilter { name: "e".into(), values: ids.iter().map(|i| i.to_hex()).collect() };
    let filter = Filter { kinds: Some(vec![6, 7]), tags: vec![tag], limit: 200, ..Default::default() };
    let result = fanout::query(pool, health, tunables, relays, filter).await.ok()?;

    let mut out: HashMap<String, ReactionSummary> = HashMap::new();
    for event in result.events {
        let Some(target) = event.tag_value("e") else { continue };
        let entry = out.entry(target.to_string()).or_default();
        match event.kind {
            7 => entry.likes += 1,
            6 => entry.reposts += 1,
            _ => {}
        }
    }
    Some(out)
}

async fn fetch_reply_counts(
    pool: &Arc<ConnectionPool>,
    health: &Arc<HealthStore>,
    tunables: &Tunables,
    relays: &[RelayUrl],
    ids: &[EventId],
) -> Option<HashMap<String, u32>> {
    if ids.is_empty() {
        return Some(HashMap::new());
    }
    let tag = TagFilter { name: "e".into(), values: ids.iter().map(|i| i.to_hex()).collect() };
    let filter = Filter { kinds: Some(vec![1]), tags: vec![tag], limit: 200, ..Default::default() };
    let result = fanout::query(pool, health, tunables, relays, filter).await.ok()?;

    let mut out: HashMap<String, u32> = HashMap::new();
    for event in result.events {
        if let Some(target) = event.tag_value("e") {
            *out.entry(target.to_string()).or_default() += 1;
        }
    }
    Some(out)
}
