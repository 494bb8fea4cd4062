//! Relay hub
//!
//! Rendezvous point for peers that cannot reach each other directly. A
//! single run loop owns the peer registry; WebSocket sessions feed it
//! through channels. Forwarding is fire-and-forget: a full outbound
//! queue drops the message and the sender sees a timeout, never
//! backpressure. Payloads are opaque and forwarded verbatim.

use crate::relay::protocol::{msg_types, ErrorPayload, RelayMessage};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::Utc;
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Per-peer outbound queue depth; overflow drops
const OUTBOUND_QUEUE: usize = 256;

/// Buffer for messages in flight between sessions and the run loop
const RELAY_QUEUE: usize = 1024;

/// Read deadline, refreshed by any inbound frame (pongs included)
const READ_DEADLINE: Duration = Duration::from_secs(120);

/// Keepalive ping cadence toward each peer
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// One registered relay session
#[derive(Debug, Clone)]
struct PeerEntry {
    id: String,
    session: u64,
    sender: mpsc::Sender<String>,
}

/// Session teardown notice
#[derive(Debug)]
struct Unregister {
    peer_id: String,
    session: u64,
}

/// Channel receivers consumed by the run loop
struct Inboxes {
    register_rx: mpsc::Receiver<PeerEntry>,
    unregister_rx: mpsc::Receiver<Unregister>,
    relay_rx: mpsc::Receiver<RelayMessage>,
}

/// WebSocket rendezvous hub
pub struct RelayHub {
    peers: RwLock<HashMap<String, PeerEntry>>,
    register_tx: mpsc::Sender<PeerEntry>,
    unregister_tx: mpsc::Sender<Unregister>,
    relay_tx: mpsc::Sender<RelayMessage>,
    inboxes: Mutex<Option<Inboxes>>,
    next_session: AtomicU64,
}

impl RelayHub {
    pub fn new() -> Self {
        let (register_tx, register_rx) = mpsc::channel(16);
        let (unregister_tx, unregister_rx) = mpsc::channel(16);
        let (relay_tx, relay_rx) = mpsc::channel(RELAY_QUEUE);

        Self {
            peers: RwLock::new(HashMap::new()),
            register_tx,
            unregister_tx,
            relay_tx,
            inboxes: Mutex::new(Some(Inboxes {
                register_rx,
                unregister_rx,
                relay_rx,
            })),
            next_session: AtomicU64::new(1),
        }
    }

    /// Run loop: the single writer of the peer registry
    pub async fn run(&self) {
        let Some(mut inboxes) = self.inboxes.lock().await.take() else {
            warn!("relay hub run loop started twice; ignoring");
            return;
        };

        loop {
            tokio::select! {
                Some(entry) = inboxes.register_rx.recv() => {
                    let mut peers = self.peers.write().await;
                    // One live session per peer id: replacing the entry
                    // drops the old queue sender and ends its writer
                    if peers.insert(entry.id.clone(), entry.clone()).is_some() {
                        debug!("replacing existing relay session for {}", entry.id);
                    }
                    info!("relay peer registered: {} (total {})", entry.id, peers.len());
                }
                Some(notice) = inboxes.unregister_rx.recv() => {
                    let mut peers = self.peers.write().await;
                    // Only remove if the entry still belongs to this session;
                    // a reconnect may already have replaced it
                    if peers.get(&notice.peer_id).map(|e| e.session) == Some(notice.session) {
                        peers.remove(&notice.peer_id);
                        info!("relay peer unregistered: {} (total {})", notice.peer_id, peers.len());
                    }
                }
                Some(msg) = inboxes.relay_rx.recv() => {
                    self.forward(msg).await;
                }
                else => break,
            }
        }
    }

    /// Route one message to its target peer's queue
    async fn forward(&self, msg: RelayMessage) {
        let Some(to) = msg.to.clone() else {
            debug!("relay message without target; dropping");
            return;
        };

        let target = {
            let peers = self.peers.read().await;
            peers.get(&to).map(|entry| entry.sender.clone())
        };

        let Some(sender) = target else {
            debug!("relay target {} not connected", to);
            if let Some(from) = msg.from.clone() {
                self.send_error(&from, msg.request_id.clone(), 404, "target peer not connected")
                    .await;
            }
            return;
        };

        let Ok(text) = serde_json::to_string(&msg) else {
            warn!("failed to encode relay message");
            return;
        };

        // Non-blocking offer: loss is preferred over unbounded latency
        if sender.try_send(text).is_err() {
            warn!("relay queue for {} full, dropping {}", to, msg.msg_type);
        }
    }

    /// Queue an error reply toward a peer
    async fn send_error(&self, peer_id: &str, request_id: Option<String>, code: i32, message: &str) {
        let sender = {
            let peers = self.peers.read().await;
            peers.get(peer_id).map(|entry| entry.sender.clone())
        };
        let Some(sender) = sender else { return };

        let payload = ErrorPayload {
            code,
            message: message.to_string(),
        };
        let Ok(msg) = RelayMessage::with_payload(msg_types::ERROR, None, request_id, &payload)
        else {
            return;
        };
        if let Ok(text) = serde_json::to_string(&msg) {
            let _ = sender.try_send(text);
        }
    }

    /// Ids of currently connected peers
    pub async fn connected_peers(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// Whether `peer_id` has a live relay session
    pub async fn is_peer_connected(&self, peer_id: &str) -> bool {
        self.peers.read().await.contains_key(peer_id)
    }

    /// Drive one accepted relay WebSocket until it closes
    ///
    /// Reads inbound envelopes, stamps their origin, answers pings
    /// locally, and feeds everything else to the run loop. A paired
    /// writer task drains this peer's queue and pings every 30 s.
    pub async fn serve_session(&self, socket: WebSocket, peer_id: String) {
        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (queue_tx, mut queue_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

        let entry = PeerEntry {
            id: peer_id.clone(),
            session,
            sender: queue_tx.clone(),
        };
        if self.register_tx.send(entry).await.is_err() {
            warn!("relay hub is not running; closing session for {}", peer_id);
            return;
        }

        let (mut sink, mut stream) = socket.split();

        let writer_peer = peer_id.clone();
        let writer = tokio::spawn(async move {
            let mut ping = tokio::time::interval(PING_INTERVAL);
            ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ping.reset();

            loop {
                tokio::select! {
                    msg = queue_rx.recv() => {
                        let Some(text) = msg else { break };
                        if sink.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    _ = ping.tick() => {
                        if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("relay writer for {} stopped", writer_peer);
        });

        loop {
            let frame = match timeout(READ_DEADLINE, stream.next()).await {
                Err(_) => {
                    debug!("relay session {} hit read deadline", peer_id);
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    debug!("relay read error from {}: {}", peer_id, e);
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                WsMessage::Text(text) => {
                    let mut msg: RelayMessage = match serde_json::from_str(&text) {
                        Ok(msg) => msg,
                        Err(e) => {
                            debug!("invalid relay message from {}: {}", peer_id, e);
                            continue;
                        }
                    };
                    msg.from = Some(peer_id.clone());
                    msg.timestamp = Utc::now();

                    if msg.msg_type == msg_types::PING {
                        let pong = RelayMessage::bare(msg_types::PONG, msg.request_id.clone());
                        if let Ok(text) = serde_json::to_string(&pong) {
                            let _ = queue_tx.try_send(text);
                        }
                        continue;
                    }

                    if self.relay_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                WsMessage::Close(_) => break,
                // Pongs and pings refresh the deadline by arriving
                _ => {}
            }
        }

        writer.abort();
        let _ = self
            .unregister_tx
            .send(Unregister {
                peer_id: peer_id.clone(),
                session,
            })
            .await;
        debug!("relay session for {} ended", peer_id);
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::protocol::ChunkRequestPayload;
    use std::sync::Arc;

    fn chunk_request(from: &str, to: &str, request_id: &str) -> RelayMessage {
        let mut msg = RelayMessage::with_payload(
            msg_types::CHUNK_REQUEST,
            Some(to.to_string()),
            Some(request_id.to_string()),
            &ChunkRequestPayload {
                file_hash: "h".to_string(),
                chunk_index: 0,
            },
        )
        .unwrap();
        msg.from = Some(from.to_string());
        msg
    }

    async fn register(hub: &RelayHub, peer_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        hub.register_tx
            .send(PeerEntry {
                id: peer_id.to_string(),
                session: hub.next_session.fetch_add(1, Ordering::Relaxed),
                sender: tx,
            })
            .await
            .unwrap();
        rx
    }

    async fn spawn_hub() -> Arc<RelayHub> {
        let hub = Arc::new(RelayHub::new());
        let runner = Arc::clone(&hub);
        tokio::spawn(async move { runner.run().await });
        hub
    }

    #[tokio::test]
    async fn test_register_and_connected_peers() {
        let hub = spawn_hub().await;
        let _rx = register(&hub, "alpha").await;

        // Give the run loop a tick to process registration
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(hub.is_peer_connected("alpha").await);
        assert_eq!(hub.connected_peers().await, vec!["alpha".to_string()]);
    }

    #[tokio::test]
    async fn test_forward_to_connected_target() {
        let hub = spawn_hub().await;
        let _from_rx = register(&hub, "alpha").await;
        let mut to_rx = register(&hub, "beta").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.relay_tx
            .send(chunk_request("alpha", "beta", "req-1"))
            .await
            .unwrap();

        let text = timeout(Duration::from_secs(1), to_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let msg: RelayMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(msg.msg_type, msg_types::CHUNK_REQUEST);
        assert_eq!(msg.from.as_deref(), Some("alpha"));
        assert_eq!(msg.request_id.as_deref(), Some("req-1"));
    }

    #[tokio::test]
    async fn test_unknown_target_errors_back_to_sender() {
        let hub = spawn_hub().await;
        let mut from_rx = register(&hub, "alpha").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.relay_tx
            .send(chunk_request("alpha", "ghost", "req-2"))
            .await
            .unwrap();

        let text = timeout(Duration::from_secs(1), from_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let msg: RelayMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(msg.msg_type, msg_types::ERROR);
        assert_eq!(msg.request_id.as_deref(), Some("req-2"));
        let payload: ErrorPayload = msg.decode_payload().unwrap();
        assert_eq!(payload.code, 404);
    }

    #[tokio::test]
    async fn test_reregistration_replaces_session() {
        let hub = spawn_hub().await;
        let mut old_rx = register(&hub, "alpha").await;
        let mut new_rx = register(&hub, "alpha").await;
        let _sender = register(&hub, "beta").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(hub.connected_peers().await.len(), 2);

        hub.relay_tx
            .send(chunk_request("beta", "alpha", "req-3"))
            .await
            .unwrap();

        let text = timeout(Duration::from_secs(1), new_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(text.contains("req-3"));
        // The replaced session's queue sender was dropped by the hub
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_unregister_does_not_remove_new_session() {
        let hub = spawn_hub().await;
        let _old = register(&hub, "alpha").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _new = register(&hub, "alpha").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Session ids start at 1; the old session was 1
        hub.unregister_tx
            .send(Unregister {
                peer_id: "alpha".to_string(),
                session: 1,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(hub.is_peer_connected("alpha").await);
    }

    #[tokio::test]
    async fn test_queue_overflow_drops_without_blocking() {
        let hub = spawn_hub().await;
        let _from = register(&hub, "alpha").await;

        // Register a target whose queue we never drain, with capacity 1
        let (tx, _undrained_rx) = mpsc::channel(1);
        hub.register_tx
            .send(PeerEntry {
                id: "slow".to_string(),
                session: 99,
                sender: tx,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Second message overflows; forward must not block the loop
        for i in 0..3 {
            hub.relay_tx
                .send(chunk_request("alpha", "slow", &format!("req-{}", i)))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(hub.is_peer_connected("slow").await);
    }
}
