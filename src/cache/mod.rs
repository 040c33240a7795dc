//! Event Cache (C6, spec.md §4.6): fingerprint-keyed query results with a
//! two-tier TTL (fresh / stale-while-revalidate) plus a content-addressed
//! id→event cache for cross-query reuse. Grounded on the teacher's
//! `observability::LatencyTracker` ring-buffer-with-lock shape, reused
//! here for an LRU instead of a latency window.

use crate::model::{Event, EventId, Fingerprint};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

struct QueryEntry {
    events: Vec<Event>,
    eose_union: bool,
    stored_at: Instant,
    last_used: Instant,
    member_ids: Vec<EventId>,
    /// Set when an SSE-delivered event touches a member id — forces the
    /// entry stale even inside the fresh window (spec.md §8, "Cache
    /// coherence": a live update invalidates within 50ms).
    dirtied: bool,
}

pub struct CacheEntry {
    pub events: Vec<Event>,
    pub eose_union: bool,
    pub freshness: Freshness,
}

pub struct EventCache {
    queries: RwLock<HashMap<Fingerprint, QueryEntry>>,
    events: RwLock<HashMap<EventId, Event>>,
    fresh_ttl: Duration,
    stale_ttl: Duration,
    max_entries: usize,
    max_events: usize,
}

impl EventCache {
    pub fn new(fresh_ttl: Duration, stale_ttl: Duration, max_entries: usize, max_events: usize) -> Arc<Self> {
        Arc::new(Self {
            queries: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            fresh_ttl,
            stale_ttl,
            max_entries,
            max_events,
        })
    }

    pub async fn get(&self, fp: &Fingerprint) -> Option<CacheEntry> {
        let mut guard = self.queries.write().await;
        let entry = guard.get_mut(fp)?;
        let age = entry.stored_at.elapsed();
        let freshness = if entry.dirtied || age > self.stale_ttl {
            if age > self.stale_ttl {
                Freshness::Expired
            } else {
                Freshness::Stale
            }
        } else if age <= self.fresh_ttl {
            Freshness::Fresh
        } else {
            Freshness::Stale
        };

        if freshness == Freshness::Expired {
            guard.remove(fp);
            return None;
        }

        entry.last_used = Instant::now();
        Some(CacheEntry { events: entry.events.clone(), eose_union: entry.eose_union, freshness })
    }

    pub async fn put(&self, fp: Fingerprint, events: Vec<Event>, eose_union: bool) {
        let member_ids: Vec<EventId> = events.iter().map(|e| e.id).collect();

        {
            let mut event_cache = self.events.write().await;
            for e in &events {
                event_cache.insert(e.id, e.clone());
            }
            if event_cache.len() > self.max_events {
                let overflow = event_cache.len() - self.max_events;
                let drop_ids: Vec<EventId> = event_cache.keys().take(overflow).copied().collect();
                for id in drop_ids {
                    event_cache.remove(&id);
                }
            }
        }

        let mut guard = self.queries.write().await;
        guard.insert(
            fp,
            QueryEntry {
                events,
                eose_union,
                stored_at: Instant::now(),
                last_used: Instant::now(),
                member_ids,
                dirtied: false,
            },
        );

        if guard.len() > self.max_entries {
            if let Some(lru_key) = guard.iter().min_by_key(|(_, e)| e.last_used).map(|(k, _)| *k) {
                guard.remove(&lru_key);
            }
        }
    }

    /// Marks every cached query whose result set includes `id` as dirty.
    /// Called by the SSE fabric when it fans out a live EVENT, per
    /// spec.md §8 "Cache coherence".
    pub async fn dirty_by_member(&self, id: &EventId) {
        let mut guard = self.queries.write().await;
        for entry in guard.values_mut() {
            if entry.member_ids.contains(id) {
                entry.dirtied = true;
            }
        }
    }

    pub async fn get_event(&self, id: &EventId) -> Option<Event> {
        self.events.read().await.get(id).cloned()
    }

    pub async fn query_entry_count(&self) -> usize {
        self.queries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Filter, PubKey, Signature};
    use std::collections::HashSet;

    fn event(id_byte: u8, created_at: i64) -> Event {
        Event {
            id: EventId([id_byte; 32]),
            pubkey: PubKey([0; 32]),
            sig: Signature([0; 64]),
            kind: 1,
            created_at,
            content: String::new(),
            tags: vec![],
            relays_seen: HashSet::new(),
        }
    }

    #[tokio::test]
    async fn fresh_entry_is_served_without_refetch() {
        let cache = EventCache::new(Duration::from_secs(5), Duration::from_secs(60), 10, 1000);
        let fp = Filter { limit: 20, ..Default::default() }.fingerprint();
        cache.put(fp, vec![event(1, 100)], true).await;
        let entry = cache.get(&fp).await.unwrap();
        assert_eq!(entry.freshness, Freshness::Fresh);
        assert_eq!(entry.events.len(), 1);
    }

    #[tokio::test]
    async fn dirtying_a_member_marks_entry_stale() {
        let cache = EventCache::new(Duration::from_secs(5), Duration::from_secs(60), 10, 1000);
        let fp = Filter { limit: 20, ..Default::default() }.fingerprint();
        let id = EventId([7; 32]);
        cache.put(fp, vec![event(7, 100)], true).await;
        cache.dirty_by_member(&id).await;
        let entry = cache.get(&fp).await.unwrap();
        assert_eq!(entry.freshness, Freshness::Stale);
    }

    #[tokio::test]
    async fn lru_eviction_respects_max_entries() {
        let cache = EventCache::new(Duration::from_secs(5), Duration::from_secs(60), 1, 1000);
        let fp1 = Filter { limit: 1, ..Default::default() }.fingerprint();
        let fp2 = Filter { limit: 2, ..Default::default() }.fingerprint();
        cache.put(fp1, vec![event(1, 100)], true).await;
        cache.put(fp2, vec![event(2, 100)], true).await;
        assert_eq!(cache.query_entry_count().await, 1);
        assert!(cache.get(&fp1).await.is_none());
    }
}
