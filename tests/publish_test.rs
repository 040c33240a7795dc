mod common;

use common::{start_dead_relay, start_mock_relay};
use relaygate::config::Tunables;
use relaygate::health::HealthStore;
use relaygate::metrics::Metrics;
use relaygate::model::{Event, EventId, PubKey, Signature};
use relaygate::pool::ConnectionPool;
use relaygate::publish;
use relaygate::relay_url::RelayUrl;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_tunables() -> Arc<Tunables> {
    Arc::new(Tunables {
        dial_timeout: Duration::from_secs(2),
        ..Tunables::default()
    })
}

fn unsigned_event() -> Event {
    Event {
        id: EventId([9; 32]),
        pubkey: PubKey([1; 32]),
        sig: Signature([0; 64]),
        kind: 1,
        created_at: 1000,
        content: "publish me".into(),
        tags: vec![],
        relays_seen: HashSet::new(),
    }
}

#[tokio::test]
async fn publish_succeeds_when_at_least_one_targeted_relay_accepts() {
    let accepting = start_mock_relay(vec![], Duration::from_millis(5)).await;
    let dead = start_dead_relay().await;

    let tunables = fast_tunables();
    let health = Arc::new(HealthStore::new());
    let pool = ConnectionPool::new(tunables.clone(), health.clone(), Arc::new(Metrics::new()), CancellationToken::new());
    let relays = vec![RelayUrl::parse(&accepting.url).unwrap(), RelayUrl::parse(&dead.url).unwrap()];

    let result = publish::publish(&pool, &health, Duration::from_secs(2), &relays, unsigned_event()).await;

    assert!(result.success, "one accepting relay is enough for overall success");
    assert_eq!(result.reports.len(), 2);
    assert!(result.reports.iter().any(|r| r.accepted));
    assert!(result.reports.iter().any(|r| !r.accepted), "the dead relay's report must record failure");

    accepting.handle.abort();
    dead.handle.abort();
}

#[tokio::test]
async fn publish_fails_when_every_targeted_relay_is_unreachable() {
    let dead_a = start_dead_relay().await;
    let dead_b = start_dead_relay().await;

    let tunables = fast_tunables();
    let health = Arc::new(HealthStore::new());
    let pool = ConnectionPool::new(tunables.clone(), health.clone(), Arc::new(Metrics::new()), CancellationToken::new());
    let relays = vec![RelayUrl::parse(&dead_a.url).unwrap(), RelayUrl::parse(&dead_b.url).unwrap()];

    let result = publish::publish(&pool, &health, Duration::from_secs(2), &relays, unsigned_event()).await;

    assert!(!result.success);
    assert!(result.reports.iter().all(|r| !r.accepted));

    dead_a.handle.abort();
    dead_b.handle.abort();
}

#[tokio::test]
async fn publish_does_not_retry_a_relay_that_already_answered() {
    let relay = start_mock_relay(vec![], Duration::from_millis(5)).await;

    let tunables = fast_tunables();
    let health = Arc::new(HealthStore::new());
    let pool = ConnectionPool::new(tunables.clone(), health.clone(), Arc::new(Metrics::new()), CancellationToken::new());
    let relays = vec![RelayUrl::parse(&relay.url).unwrap()];

    let first = publish::publish(&pool, &health, Duration::from_secs(2), &relays, unsigned_event()).await;
    let second = publish::publish(&pool, &health, Duration::from_secs(2), &relays, unsigned_event()).await;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(first.reports.len(), 1);
    assert_eq!(second.reports.len(), 1, "a second call is a distinct publish, not a retry of the first");

    relay.handle.abort();
}
