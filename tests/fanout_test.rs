mod common;

use common::{sample_event, start_dead_relay, start_mock_relay};
use relaygate::config::Tunables;
use relaygate::fanout;
use relaygate::health::HealthStore;
use relaygate::metrics::Metrics;
use relaygate::model::Filter;
use relaygate::pool::ConnectionPool;
use relaygate::relay_url::RelayUrl;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_tunables() -> Arc<Tunables> {
    Arc::new(Tunables {
        soft_eose_window: Duration::from_millis(150),
        hard_deadline: Duration::from_secs(2),
        dial_timeout: Duration::from_secs(2),
        // These mock relays serve unsigned fixtures — skip signature
        // verification rather than fabricate valid Schnorr signatures.
        sig_verify_fraction: 0.0,
        ..Tunables::default()
    })
}

#[tokio::test]
async fn union_merge_dedups_events_seen_on_multiple_relays() {
    let shared = sample_event(1, 100, "shared across relays");
    let unique_a = sample_event(2, 90, "only on relay a");
    let unique_b = sample_event(3, 80, "only on relay b");

    let relay_a = start_mock_relay(vec![shared.clone(), unique_a], Duration::from_millis(10)).await;
    let relay_b = start_mock_relay(vec![shared, unique_b], Duration::from_millis(10)).await;

    let tunables = fast_tunables();
    let health = Arc::new(HealthStore::new());
    let pool = ConnectionPool::new(tunables.clone(), health.clone(), Arc::new(Metrics::new()), CancellationToken::new());
    let relays = vec![RelayUrl::parse(&relay_a.url).unwrap(), RelayUrl::parse(&relay_b.url).unwrap()];

    let filter = Filter { limit: 50, ..Default::default() };
    let result = fanout::query(&pool, &health, &tunables, &relays, filter).await.unwrap();

    assert_eq!(result.events.len(), 3, "shared event must collapse to one entry");
    assert!(result.eose_union);

    let shared_entry = result.events.iter().find(|e| e.created_at == 100).unwrap();
    assert_eq!(shared_entry.relays_seen.len(), 2, "shared event must record both relays");

    relay_a.handle.abort();
    relay_b.handle.abort();
}

#[tokio::test]
async fn soft_eose_window_does_not_wait_for_a_straggling_relay_forever() {
    let fast_relay = start_mock_relay(vec![sample_event(4, 100, "fast")], Duration::from_millis(5)).await;
    let slow_relay = start_mock_relay(vec![sample_event(5, 90, "slow")], Duration::from_secs(10)).await;

    let tunables = fast_tunables();
    let health = Arc::new(HealthStore::new());
    let pool = ConnectionPool::new(tunables.clone(), health.clone(), Arc::new(Metrics::new()), CancellationToken::new());
    let relays = vec![RelayUrl::parse(&fast_relay.url).unwrap(), RelayUrl::parse(&slow_relay.url).unwrap()];

    let filter = Filter { limit: 50, ..Default::default() };
    let started = std::time::Instant::now();
    let result = fanout::query(&pool, &health, &tunables, &relays, filter).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2), "soft-EOSE window should cut the wait short");
    assert_eq!(result.events.len(), 1, "only the fast relay's event should be in the page");
    assert!(!result.eose_union, "the straggling relay never reached EOSE in time");

    fast_relay.handle.abort();
    slow_relay.handle.abort();
}

#[tokio::test]
async fn an_unreachable_relay_is_skipped_without_failing_the_whole_query() {
    let live = start_mock_relay(vec![sample_event(6, 100, "live")], Duration::from_millis(5)).await;
    let dead = start_dead_relay().await;

    let tunables = fast_tunables();
    let health = Arc::new(HealthStore::new());
    let pool = ConnectionPool::new(tunables.clone(), health.clone(), Arc::new(Metrics::new()), CancellationToken::new());
    let relays = vec![RelayUrl::parse(&live.url).unwrap(), RelayUrl::parse(&dead.url).unwrap()];

    let filter = Filter { limit: 50, ..Default::default() };
    let result = fanout::query(&pool, &health, &tunables, &relays, filter).await.unwrap();

    assert_eq!(result.events.len(), 1);

    live.handle.abort();
    dead.handle.abort();
}
