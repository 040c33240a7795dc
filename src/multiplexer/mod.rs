//! Subscription Multiplexer (C4, spec.md §4.4): one REQ per relay
//! connection fans out to exactly one local task that demultiplexes
//! EVENT/EOSE/CLOSED/NOTICE frames by sub-id and forwards them to the
//! caller's bounded channel. Grounded on the teacher's `EventBroadcaster`
//! subscribe/unsubscribe shape (`ipc/event.rs`), adapted from a single
//! process-wide broadcaster to one demultiplexer per relay connection.

use crate::codec::{ClientFrame, RelayFrame};
use crate::connection::RelayConnection;
use crate::model::{Event, Filter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

static NEXT_SUB_ID: AtomicU64 = AtomicU64::new(1);

fn next_sub_id() -> String {
    format!("sub{}", NEXT_SUB_ID.fetch_add(1, Ordering::Relaxed))
}

#[derive(Debug)]
pub enum SubscriptionMessage {
    Event(Event),
    Eose,
    Closed(String),
    Notice(String),
}

/// A live subscription on one relay connection. Dropping it sends CLOSE —
/// even with frames already in flight on the demultiplexer task, per
/// spec.md §4.4 ("CLOSE on caller-close even with frames in flight").
pub struct Subscription {
    sub_id: String,
    conn: Arc<RelayConnection>,
    pub messages: mpsc::Receiver<SubscriptionMessage>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub fn sub_id(&self) -> &str {
        &self.sub_id
    }

    /// Frames dropped because this subscription's buffer (default 64) was
    /// full — drop-newest, never blocks the relay's read loop.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.conn.try_send(ClientFrame::Close { sub_id: self.sub_id.clone() });
    }
}

/// Opens a subscription on `conn` for `filters`, buffering up to
/// `buffer_depth` messages (default 64). Excess frames are dropped —
/// newest first — with a counter, never by blocking the relay's read
/// loop (spec.md §4.4, "fair delivery, no starvation").
pub fn subscribe(conn: Arc<RelayConnection>, filters: Vec<Filter>, buffer_depth: usize) -> Subscription {
    let sub_id = next_sub_id();
    let (tx, rx) = mpsc::channel(buffer_depth);
    let dropped = Arc::new(AtomicU64::new(0));

    conn.try_send(ClientFrame::Req { sub_id: sub_id.clone(), filters }).ok();

    let mut frames = conn.subscribe_frames();
    let demux_sub_id = sub_id.clone();
    let demux_dropped = dropped.clone();
    tokio::spawn(async move {
        let mut eose_sent = false;
        loop {
            let frame = match frames.recv().await {
                Ok(f) => f,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(sub_id = %demux_sub_id, skipped = n, "demultiplexer lagged behind relay");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            };

            let msg = match frame {
                RelayFrame::Event { sub_id, event } if sub_id == demux_sub_id => {
                    SubscriptionMessage::Event(event)
                }
                RelayFrame::Eose { sub_id } if sub_id == demux_sub_id => {
                    if eose_sent {
                        continue;
                    }
                    eose_sent = true;
                    SubscriptionMessage::Eose
                }
                RelayFrame::Closed { sub_id, reason } if sub_id == demux_sub_id => {
                    if tx.send(SubscriptionMessage::Closed(reason)).await.is_err() {
                        return;
                    }
                    return;
                }
                RelayFrame::Notice { text } => SubscriptionMessage::Notice(text),
                _ => continue,
            };

            if tx.try_send(msg).is_err() {
                demux_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(sub_id = %demux_sub_id, "subscriber buffer full, dropping frame");
            }
        }
    });

    Subscription { sub_id, conn, messages: rx, dropped }
}
