//! Dashboard event stream
//!
//! Broadcasts tracker events (peer joined/left, file added, stats ticks)
//! to every connected `/ws` client. Slow clients lag and drop events;
//! they never block the tracker.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Event type strings pushed to dashboard clients
pub mod events {
    pub const PEER_JOINED: &str = "peer_joined";
    pub const PEER_LEFT: &str = "peer_left";
    pub const FILE_ADDED: &str = "file_added";
    pub const STATS_UPDATE: &str = "stats_update";
}

/// One dashboard event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl WsEvent {
    pub fn new(event_type: &str, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Fan-out hub for dashboard clients
#[derive(Debug)]
pub struct WsHub {
    tx: broadcast::Sender<WsEvent>,
}

impl WsHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Push an event to every connected client
    pub fn broadcast(&self, event: WsEvent) {
        // Err means nobody is listening, which is fine
        let _ = self.tx.send(event);
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Drive one accepted WebSocket until it closes
    pub async fn serve_client(&self, mut socket: WebSocket) {
        let mut rx = self.tx.subscribe();
        debug!("dashboard client connected ({} total)", self.client_count());

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Ok(event) => {
                            let Ok(text) = serde_json::to_string(&event) else { continue };
                            if socket.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("dashboard client lagged, skipped {} events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                inbound = socket.recv() => {
                    match inbound {
                        // Dashboard clients only listen; drain pings and
                        // drop on close
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => break,
                    }
                }
            }
        }
        debug!("dashboard client disconnected");
    }
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}
