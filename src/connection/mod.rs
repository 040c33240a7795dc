//! Relay Connection (C2, spec.md §4.2): one WebSocket to one relay, with a
//! sole-reader task and a sole-writer task so frame ordering per direction
//! is never interleaved across callers. Grounded on the teacher's
//! `relay::relay_loop` reconnect shape — `tokio::select!` over inbound,
//! outbound, and a keepalive timer — generalized from a single outbound
//! tunnel to an arbitrary number of upstream relays, each independently
//! gated by the [`HealthStore`](crate::health::HealthStore).

use crate::codec::{decode_frame, ClientFrame, RelayFrame};
use crate::config::Tunables;
use crate::error::AppError;
use crate::health::HealthStore;
use crate::metrics::SharedMetrics;
use crate::relay_url::RelayUrl;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Closing,
}

/// A handle to one managed relay connection. Cheap to clone; the actual
/// socket lives in a spawned task pair owned by this handle's drop.
pub struct RelayConnection {
    pub url: RelayUrl,
    outbound: mpsc::Sender<ClientFrame>,
    inbound: broadcast::Sender<RelayFrame>,
    state: watch::Receiver<ConnectionState>,
    dropped_inbound: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl RelayConnection {
    pub fn spawn(
        url: RelayUrl,
        tunables: Arc<Tunables>,
        health: Arc<HealthStore>,
        metrics: SharedMetrics,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(tunables.send_queue_depth);
        let (inbound_tx, _inbound_rx) = broadcast::channel(tunables.subscriber_buffer);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let dropped_inbound = Arc::new(AtomicU64::new(0));

        let conn = Arc::new(Self {
            url: url.clone(),
            outbound: outbound_tx,
            inbound: inbound_tx.clone(),
            state: state_rx,
            dropped_inbound: dropped_inbound.clone(),
            shutdown: shutdown.clone(),
        });

        tokio::spawn(run_connection(
            url,
            tunables,
            health,
            metrics,
            outbound_rx,
            inbound_tx,
            state_tx,
            shutdown,
        ));

        conn
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Queue a frame for send. Fails fast with `Backpressure` rather than
    /// blocking the caller when the send queue (default 64) is saturated,
    /// per spec.md §4.2.
    pub fn try_send(&self, frame: ClientFrame) -> Result<(), AppError> {
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AppError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => AppError::Backpressure,
        })
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<RelayFrame> {
        self.inbound.subscribe()
    }

    pub fn dropped_inbound_frames(&self) -> u64 {
        self.dropped_inbound.load(AtomicOrdering::Relaxed)
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

async fn run_connection(
    url: RelayUrl,
    tunables: Arc<Tunables>,
    health: Arc<HealthStore>,
    metrics: SharedMetrics,
    mut outbound_rx: mpsc::Receiver<ClientFrame>,
    inbound_tx: broadcast::Sender<RelayFrame>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
) {
    let mut consecutive_failures = 0u32;

    loop {
        if shutdown.is_cancelled() {
            let _ = state_tx.send(ConnectionState::Closing);
            return;
        }

        if health.in_backoff(&url).await {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(500)) => continue,
                _ = shutdown.cancelled() => return,
            }
        }

        let _ = state_tx.send(ConnectionState::Connecting);
        tracing::debug!(relay = %url, "dialing");

        let dial = tokio::time::timeout(tunables.dial_timeout, tokio_tungstenite::connect_async(url.as_str()));
        let ws_stream = tokio::select! {
            res = dial => res,
            _ = shutdown.cancelled() => return,
        };

        let ws_stream = match ws_stream {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                tracing::warn!(relay = %url, err = %e, "dial failed");
                health.record_failure(&url).await;
                consecutive_failures += 1;
                sleep_or_shutdown(&shutdown, backoff_floor(consecutive_failures)).await;
                continue;
            }
            Err(_) => {
                tracing::warn!(relay = %url, "dial timed out");
                health.record_failure(&url).await;
                consecutive_failures += 1;
                sleep_or_shutdown(&shutdown, backoff_floor(consecutive_failures)).await;
                continue;
            }
        };

        tracing::info!(relay = %url, "connected");
        let _ = state_tx.send(ConnectionState::Ready);
        consecutive_failures = 0;
        let connected_at = Instant::now();

        let (mut sink, mut stream) = ws_stream.split();
        let reader = read_loop(&url, &mut stream, &inbound_tx, &tunables, &health, &metrics);
        let writer = write_loop(&mut outbound_rx, &mut sink, &tunables);

        tokio::select! {
            _ = reader => tracing::warn!(relay = %url, "read loop ended"),
            _ = writer => tracing::warn!(relay = %url, "write loop ended"),
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                let _ = state_tx.send(ConnectionState::Closing);
                return;
            }
        }

        let _ = state_tx.send(ConnectionState::Disconnected);
        // A connection that stayed Ready for a while resets the failure
        // streak — a clean disconnect after minutes of service is not the
        // same signal as a dial that never succeeded.
        if connected_at.elapsed() > Duration::from_secs(30) {
            consecutive_failures = 0;
        } else {
            consecutive_failures += 1;
        }
        health.record_failure(&url).await;
        sleep_or_shutdown(&shutdown, backoff_floor(consecutive_failures)).await;
    }
}

async fn read_loop(
    url: &RelayUrl,
    stream: &mut futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    >,
    inbound_tx: &broadcast::Sender<RelayFrame>,
    tunables: &Tunables,
    health: &HealthStore,
    metrics: &SharedMetrics,
) {
    let pong_deadline = tunables.pong_timeout;
    loop {
        let msg = match tokio::time::timeout(pong_deadline, stream.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                tracing::warn!(relay = %url, err = %e, "websocket read error");
                return;
            }
            Ok(None) => {
                tracing::debug!(relay = %url, "websocket closed by peer");
                return;
            }
            Err(_) => {
                tracing::warn!(relay = %url, "no frame within pong timeout");
                return;
            }
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => return,
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => continue,
        };

        let now = chrono::Utc::now().timestamp();
        match decode_frame(&text, tunables.max_frame_bytes, now, tunables.sig_verify_fraction) {
            Ok(frame) => {
                if matches!(frame, RelayFrame::Eose { .. }) {
                    // EOSE is this relay's liveness signal for the Health Store.
                    health.record_success(url, Duration::from_millis(0)).await;
                }
                let _ = inbound_tx.send(frame);
            }
            Err(e) => {
                // An upstream protocol violation (malformed or oversize frame,
                // bad signature, id mismatch) voids this connection rather
                // than being skipped — a relay sending garbage once is likely
                // to keep doing it, so we close and let the outer reconnect
                // loop redial fresh.
                tracing::warn!(relay = %url, err = %e, "upstream protocol violation, closing connection");
                metrics.inc_upstream_protocol_error();
                health.record_failure(url).await;
                return;
            }
        }
    }
}

async fn write_loop(
    outbound_rx: &mut mpsc::Receiver<ClientFrame>,
    sink: &mut futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
        Message,
    >,
    tunables: &Tunables,
) {
    let mut ping_timer = tokio::time::interval(tunables.ping_interval);
    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { return };
                if sink.send(Message::Text(frame.encode())).await.is_err() {
                    return;
                }
            }
            _ = ping_timer.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn backoff_floor(consecutive_failures: u32) -> Duration {
    let exp = consecutive_failures.min(6);
    Duration::from_secs(1).saturating_mul(1u32 << exp).min(Duration::from_secs(30))
}

async fn sleep_or_shutdown(shutdown: &CancellationToken, dur: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(dur) => {}
        _ = shutdown.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_floor_caps_at_thirty_seconds() {
        assert_eq!(backoff_floor(0), Duration::from_secs(1));
        assert_eq!(backoff_floor(20), Duration::from_secs(30));
    }
}
