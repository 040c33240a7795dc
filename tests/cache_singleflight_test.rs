use relaygate::cache::{EventCache, Freshness};
use relaygate::fanout::QueryResult;
use relaygate::model::{EventId, Event, Filter, PubKey, Signature};
use relaygate::singleflight::SingleFlightGate;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn event(byte: u8) -> Event {
    Event {
        id: EventId([byte; 32]),
        pubkey: PubKey([0; 32]),
        sig: Signature([0; 64]),
        kind: 1,
        created_at: 1000,
        content: String::new(),
        tags: vec![],
        relays_seen: HashSet::new(),
    }
}

#[tokio::test]
async fn cache_hit_within_fresh_ttl_never_reaches_the_query_gate() {
    let cache = EventCache::new(Duration::from_secs(5), Duration::from_secs(60), 100, 10_000);
    let gate = Arc::new(SingleFlightGate::<QueryResult>::new());
    let calls = Arc::new(AtomicU32::new(0));

    let filter = Filter { limit: 10, ..Default::default() };
    let fp = filter.fingerprint();

    cache.put(fp, vec![event(1)], true).await;

    for _ in 0..5 {
        let cached = cache.get(&fp).await;
        match cached {
            Some(entry) if entry.freshness == Freshness::Fresh => continue,
            _ => {
                let calls = calls.clone();
                gate.run(fp, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    QueryResult { events: vec![event(1)], eose_union: true }
                })
                .await;
            }
        }
    }

    assert_eq!(calls.load(Ordering::SeqCst), 0, "a fresh cache entry must never trigger a refetch");
}

#[tokio::test]
async fn concurrent_cache_misses_for_the_same_filter_join_a_single_fetch() {
    let gate = Arc::new(SingleFlightGate::<QueryResult>::new());
    let calls = Arc::new(AtomicU32::new(0));
    let filter = Filter { limit: 10, ..Default::default() };
    let fp = filter.fingerprint();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gate = gate.clone();
        let calls = calls.clone();
        handles.push(tokio::spawn(async move {
            gate.run(fp, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                QueryResult { events: vec![event(2)], eose_union: true }
            })
            .await
        }));
    }

    for h in handles {
        let result = h.await.unwrap();
        assert_eq!(result.events.len(), 1);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
