use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::state::AppState;

const BROADCAST_CAPACITY: usize = 256;
const MAX_QUEUE_PER_PLAN: usize = 100;
/// How long a finished plan's events stay replayable.
const COMPLETED_RETENTION_MS: i64 = 10 * 60 * 1000;
/// Plans that never finish are dropped after a day of silence.
const IDLE_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub event_type: String,
    pub payload: Value,
    pub timestamp: i64,
}

/// Fans events out to every connected UI socket.
///
/// `sync:*` events carrying a `planId` are also kept per plan so a client
/// that connects late can ask for a replay.
#[derive(Clone)]
pub struct UiBroadcaster {
    tx: broadcast::Sender<String>,
    queue: Arc<DashMap<String, VecDeque<QueuedMessage>>>,
}

impl Default for UiBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl UiBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            queue: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, event_type: &str, payload: Value) {
        let msg = serde_json::json!({
            "type": event_type,
            "payload": payload,
        });

        if event_type.starts_with("sync:") {
            if let Some(plan_id) = payload.get("planId").and_then(|v| v.as_str()) {
                let now = chrono::Utc::now().timestamp_millis();
                self.prune(now);
                let mut entry = self.queue.entry(plan_id.to_string()).or_default();
                entry.push_back(QueuedMessage {
                    event_type: event_type.to_string(),
                    payload: payload.clone(),
                    timestamp: now,
                });
                if entry.len() > MAX_QUEUE_PER_PLAN {
                    entry.pop_front();
                }
            }
        }

        // No subscribers is fine.
        let _ = self.tx.send(msg.to_string());
    }

    /// Drop replay queues of plans that completed or went quiet long enough
    /// before `now`.
    fn prune(&self, now: i64) {
        self.queue.retain(|_, queue| match queue.back() {
            Some(last) if last.event_type == "sync:completed" => {
                now - last.timestamp < COMPLETED_RETENTION_MS
            }
            Some(last) => now - last.timestamp < IDLE_RETENTION_MS,
            None => false,
        });
    }

    pub fn get_queued_messages(&self, plan_id: &str, since: i64) -> Vec<QueuedMessage> {
        self.queue
            .get(plan_id)
            .map(|q| q.iter().filter(|m| m.timestamp > since).cloned().collect())
            .unwrap_or_default()
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ui_socket(socket, state))
}

async fn handle_ui_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.ui.subscribe();
    let (replay_tx, mut replay_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    // Forward broadcasts and replays to this client
    let send_task = tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                msg = rx.recv() => match msg {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "ui socket lagging");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                replay = replay_rx.recv() => match replay {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if sender.send(Message::Text(next.into())).await.is_err() {
                break;
            }
        }
    });

    // Replay requests: {"type":"replay:request","payload":{"planId":..,"since":..}}
    let ui = state.ui.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(parsed) = serde_json::from_str::<Value>(&text) else { continue };
            if parsed.get("type").and_then(|t| t.as_str()) != Some("replay:request") {
                continue;
            }
            let Some(payload) = parsed.get("payload") else { continue };
            let plan_id = payload.get("planId").and_then(|v| v.as_str()).unwrap_or("");
            let since = payload.get("since").and_then(|v| v.as_i64()).unwrap_or(0);

            for m in ui.get_queued_messages(plan_id, since) {
                let replay = serde_json::json!({
                    "type": m.event_type,
                    "payload": m.payload,
                });
                if replay_tx.send(replay.to_string()).is_err() {
                    return;
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}
