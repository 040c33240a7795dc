//! Minimal in-process relay server for integration tests: accepts one
//! WebSocket connection, replies to REQ with a canned set of EVENT frames
//! then EOSE, and to EVENT with a canned OK. No relay-side persistence or
//! filter matching — tests choose what each mock relay returns.
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub struct MockRelay {
    pub url: String,
    pub handle: JoinHandle<()>,
}

/// Starts a relay that answers any REQ with `events` (as raw JSON event
/// bodies) after `eose_delay`, then an EOSE, and keeps the socket open.
pub async fn start_mock_relay(events: Vec<Value>, eose_delay: std::time::Duration) -> MockRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}");

    let handle = tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else { return };

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(frame): Result<Value, _> = serde_json::from_str(&text) else { continue };
            let Some(arr) = frame.as_array() else { continue };
            let Some(kind) = arr.first().and_then(Value::as_str) else { continue };

            match kind {
                "REQ" => {
                    let Some(sub_id) = arr.get(1).and_then(Value::as_str) else { continue };
                    tokio::time::sleep(eose_delay).await;
                    for event in &events {
                        let out = Value::Array(vec![
                            Value::String("EVENT".into()),
                            Value::String(sub_id.into()),
                            event.clone(),
                        ]);
                        if ws.send(Message::Text(out.to_string())).await.is_err() {
                            return;
                        }
                    }
                    let eose = Value::Array(vec![Value::String("EOSE".into()), Value::String(sub_id.into())]);
                    if ws.send(Message::Text(eose.to_string())).await.is_err() {
                        return;
                    }
                }
                "EVENT" => {
                    let Some(event) = arr.get(1) else { continue };
                    let Some(id) = event.get("id").and_then(Value::as_str) else { continue };
                    let ok = Value::Array(vec![
                        Value::String("OK".into()),
                        Value::String(id.into()),
                        Value::Bool(true),
                        Value::String(String::new()),
                    ]);
                    if ws.send(Message::Text(ok.to_string())).await.is_err() {
                        return;
                    }
                }
                "CLOSE" => {}
                _ => {}
            }
        }
    });

    MockRelay { url, handle }
}

/// A relay that accepts the connection and immediately closes it without
/// responding to anything — simulates an unreachable/broken upstream.
pub async fn start_dead_relay() -> MockRelay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let url = format!("ws://{addr}");

    let handle = tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                let _ = ws.close(None).await;
            }
        }
    });

    MockRelay { url, handle }
}

pub fn sample_event(id_byte: u8, created_at: i64, content: &str) -> Value {
    serde_json::json!({
        "id": hex::encode([id_byte; 32]),
        "pubkey": hex::encode([1u8; 32]),
        "sig": hex::encode([0u8; 64]),
        "kind": 1,
        "created_at": created_at,
        "content": content,
        "tags": [],
    })
}
