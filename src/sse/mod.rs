//! SSE Fabric (C11, spec.md §4.11): per-topic fan-out to HTTP
//! long-lived streams. Grounded on the teacher's `EventBroadcaster`
//! (`ipc/event.rs`) and `rest/sse.rs` bridge, generalized from one
//! process-wide channel to topic-scoped registries so a notifications
//! subscriber never buffers timeline traffic it doesn't want.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Timeline,
    Notifications,
    Config,
    Corrections,
}

impl Topic {
    /// Reactions, reposts, and zap receipts are notification-worthy;
    /// everything else rides the timeline topic.
    pub fn for_kind(kind: u32) -> Self {
        match kind {
            7 | 6 | 9735 => Topic::Notifications,
            _ => Topic::Timeline,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SseMessage {
    pub event: String,
    pub data: serde_json::Value,
}

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

struct TopicRegistry {
    subscribers: HashMap<u64, mpsc::Sender<SseMessage>>,
}

impl TopicRegistry {
    fn new() -> Self {
        Self { subscribers: HashMap::new() }
    }
}

pub struct SseFabric {
    topics: RwLock<HashMap<Topic, TopicRegistry>>,
    buffer_depth: usize,
    dropped: AtomicU64,
}

/// Handle returned to an HTTP handler. Deregisters itself from the fabric
/// on drop (connection close or idle-timeout), per spec.md §4.11
/// "remove-on-disconnect".
pub struct SseSubscription {
    fabric: Arc<SseFabric>,
    topic: Topic,
    id: u64,
    pub receiver: mpsc::Receiver<SseMessage>,
}

impl Drop for SseSubscription {
    fn drop(&mut self) {
        let fabric = self.fabric.clone();
        let topic = self.topic;
        let id = self.id;
        tokio::spawn(async move {
            if let Some(registry) = fabric.topics.write().await.get_mut(&topic) {
                registry.subscribers.remove(&id);
            }
        });
    }
}

impl SseFabric {
    pub fn new(buffer_depth: usize) -> Arc<Self> {
        Arc::new(Self { topics: RwLock::new(HashMap::new()), buffer_depth, dropped: AtomicU64::new(0) })
    }

    pub async fn subscribe(self: &Arc<Self>, topic: Topic) -> SseSubscription {
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer_depth);
        self.topics.write().await.entry(topic).or_insert_with(TopicRegistry::new).subscribers.insert(id, tx);
        SseSubscription { fabric: self.clone(), topic, id, receiver: rx }
    }

    /// Non-blocking fan-out: a saturated subscriber drops the newest
    /// message rather than stall every other subscriber on this topic
    /// (spec.md §4.11, "drop-newest-on-full backpressure").
    pub async fn publish(&self, topic: Topic, message: SseMessage) {
        let guard = self.topics.read().await;
        let Some(registry) = guard.get(&topic) else { return };
        for tx in registry.subscribers.values() {
            if tx.try_send(message.clone()).is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub async fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.read().await.get(&topic).map(|r| r.subscribers.len()).unwrap_or(0)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_only_its_topic() {
        let fabric = SseFabric::new(4);
        let mut timeline_sub = fabric.subscribe(Topic::Timeline).await;
        let mut notif_sub = fabric.subscribe(Topic::Notifications).await;

        fabric
            .publish(Topic::Timeline, SseMessage { event: "post".into(), data: serde_json::json!({}) })
            .await;

        assert!(timeline_sub.receiver.try_recv().is_ok());
        assert!(notif_sub.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_subscription_removes_it_from_the_registry() {
        let fabric = SseFabric::new(4);
        let sub = fabric.subscribe(Topic::Config).await;
        assert_eq!(fabric.subscriber_count(Topic::Config).await, 1);
        drop(sub);
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(fabric.subscriber_count(Topic::Config).await, 0);
    }
}
