//! Publish Path (C10, spec.md §4.10): sends one EVENT frame per targeted
//! relay in parallel and waits for each relay's OK response, up to a
//! fixed timeout. No automatic retry — a caller that wants another
//! attempt issues a new publish, since resending an already-accepted
//! event to a slow-OK relay risks duplicate side effects downstream.

use crate::codec::ClientFrame;
use crate::codec::RelayFrame;
use crate::health::HealthStore;
use crate::model::{Event, EventId};
use crate::pool::ConnectionPool;
use crate::relay_url::RelayUrl;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize)]
pub struct RelayReport {
    pub relay: RelayUrl,
    pub accepted: bool,
    pub message: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PublishResult {
    pub event_id: EventId,
    /// True iff at least one targeted relay returned `OK true`.
    pub success: bool,
    pub reports: Vec<RelayReport>,
}

pub async fn publish(
    pool: &Arc<ConnectionPool>,
    health: &Arc<HealthStore>,
    ok_timeout: Duration,
    relays: &[RelayUrl],
    event: Event,
) -> PublishResult {
    let event_id = event.id;
    let futures = relays.iter().map(|url| {
        let pool = pool.clone();
        let health = health.clone();
        let url = url.clone();
        let event = event.clone();
        async move { publish_one(&pool, &health, ok_timeout, &url, event).await }
    });

    let reports: Vec<RelayReport> = futures_util::future::join_all(futures).await;
    let success = reports.iter().any(|r| r.accepted);

    PublishResult { event_id, success, reports }
}

async fn publish_one(
    pool: &Arc<ConnectionPool>,
    health: &Arc<HealthStore>,
    ok_timeout: Duration,
    url: &RelayUrl,
    event: Event,
) -> RelayReport {
    let conn = match pool.get_or_dial(url).await {
        Ok(conn) => conn,
        Err(_) => {
            return RelayReport { relay: url.clone(), accepted: false, message: "relay unreachable".into() }
        }
    };

    let mut frames = conn.subscribe_frames();
    if conn.try_send(ClientFrame::Event(Box::new(event.clone()))).is_err() {
        return RelayReport { relay: url.clone(), accepted: false, message: "send queue full".into() };
    }

    let wait = async {
        loop {
            match frames.recv().await {
                Ok(RelayFrame::Ok { event_id, accepted, message }) if event_id == event.id => {
                    return (accepted, message);
                }
                Ok(_) => continue,
                Err(_) => return (false, "connection closed before OK".to_string()),
            }
        }
    };

    match tokio::time::timeout(ok_timeout, wait).await {
        Ok((accepted, message)) => {
            if accepted {
                health.record_success(url, Duration::from_millis(0)).await;
            }
            RelayReport { relay: url.clone(), accepted, message }
        }
        Err(_) => RelayReport { relay: url.clone(), accepted: false, message: "timed out awaiting OK".into() },
    }
}
