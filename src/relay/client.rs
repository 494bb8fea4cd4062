//! Relay client
//!
//! One WebSocket to the tracker's relay hub. Outgoing chunk requests are
//! multiplexed by request id onto one-shot response slots; incoming chunk
//! requests are served through a registered [`ChunkProvider`]. A dropped
//! connection triggers exponential-backoff reconnects until [`RelayClient::close`]
//! is called.

use crate::error::SwarmError;
use crate::relay::protocol::{
    msg_types, ChunkDataPayload, ChunkRequestPayload, ErrorPayload, RelayMessage,
};
use anyhow::Result;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Outbound queue depth before sends block
const OUTBOUND_QUEUE: usize = 256;

/// Wall-clock bound on one relayed chunk request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// WebSocket handshake deadline
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Keepalive ping cadence
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Reconnect backoff: start, doubling, cap
const RECONNECT_BASE: Duration = Duration::from_secs(5);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// Serves chunk bytes for incoming relay requests
#[async_trait]
pub trait ChunkProvider: Send + Sync {
    /// Return the chunk bytes and their hex SHA-256
    async fn chunk(&self, file_hash: &str, chunk_index: usize) -> Result<(Vec<u8>, String)>;
}

struct Inner {
    peer_id: String,
    tracker_url: String,
    send_tx: mpsc::Sender<WsMessage>,
    send_rx: Mutex<mpsc::Receiver<WsMessage>>,
    pending: StdMutex<HashMap<String, oneshot::Sender<RelayMessage>>>,
    provider: StdMutex<Option<Arc<dyn ChunkProvider>>>,
    connected: AtomicBool,
    closing: AtomicBool,
    /// Bumped on every disconnect so stale pumps exit promptly
    conn_generation: AtomicU64,
    generation_tx: watch::Sender<u64>,
    reconnect_tx: mpsc::Sender<()>,
    reconnect_rx: Mutex<Option<mpsc::Receiver<()>>>,
    done_tx: watch::Sender<bool>,
}

/// Peer-side endpoint of the relay; cheap to clone
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<Inner>,
}

impl RelayClient {
    /// Create a client for `peer_id` against `tracker_url` (http(s) or ws(s))
    pub fn new(peer_id: impl Into<String>, tracker_url: impl Into<String>) -> Self {
        let (send_tx, send_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (reconnect_tx, reconnect_rx) = mpsc::channel(1);
        let (generation_tx, _) = watch::channel(0u64);
        let (done_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                peer_id: peer_id.into(),
                tracker_url: tracker_url.into(),
                send_tx,
                send_rx: Mutex::new(send_rx),
                pending: StdMutex::new(HashMap::new()),
                provider: StdMutex::new(None),
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                conn_generation: AtomicU64::new(0),
                generation_tx,
                reconnect_tx,
                reconnect_rx: Mutex::new(Some(reconnect_rx)),
                done_tx,
            }),
        }
    }

    /// Register the handler for incoming chunk requests
    pub fn set_chunk_provider(&self, provider: Arc<dyn ChunkProvider>) {
        *self.inner.provider.lock().expect("provider lock poisoned") = Some(provider);
    }

    /// Our peer id on the relay
    pub fn peer_id(&self) -> &str {
        &self.inner.peer_id
    }

    /// Whether the WebSocket is currently up
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Connect to the hub and start the reconnect loop
    pub async fn connect(&self) -> Result<()> {
        self.establish().await?;

        let reconnect_rx = self
            .inner
            .reconnect_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| SwarmError::transport("relay client already connected"))?;
        let client = self.clone();
        tokio::spawn(async move {
            client.reconnect_loop(reconnect_rx).await;
        });

        Ok(())
    }

    /// Close permanently; no reconnect will follow
    pub fn close(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.bump_generation();
        let _ = self.inner.done_tx.send(true);
    }

    /// Request a chunk from `target` through the relay
    pub async fn request_chunk(
        &self,
        target: &str,
        file_hash: &str,
        chunk_index: usize,
    ) -> Result<Vec<u8>> {
        if !self.is_connected() {
            return Err(SwarmError::transport("relay not connected").into());
        }

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .expect("pending lock poisoned")
            .insert(request_id.clone(), tx);

        let msg = RelayMessage::with_payload(
            msg_types::CHUNK_REQUEST,
            Some(target.to_string()),
            Some(request_id.clone()),
            &ChunkRequestPayload {
                file_hash: file_hash.to_string(),
                chunk_index,
            },
        )?;

        if let Err(e) = self.inner.send_message(&msg).await {
            self.inner.remove_pending(&request_id);
            return Err(e);
        }

        let reply = match timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                self.inner.remove_pending(&request_id);
                return Err(SwarmError::transport("relay connection closed").into());
            }
            Err(_) => {
                self.inner.remove_pending(&request_id);
                return Err(SwarmError::timeout(format!(
                    "relay request for chunk {} timed out",
                    chunk_index
                ))
                .into());
            }
        };

        if reply.msg_type == msg_types::ERROR {
            let payload: ErrorPayload = reply.decode_payload().unwrap_or(ErrorPayload {
                code: 0,
                message: "unreadable relay error".to_string(),
            });
            return Err(SwarmError::peer_full(payload.message, payload.code, target).into());
        }

        let payload: ChunkDataPayload = reply.decode_payload().map_err(|e| {
            SwarmError::protocol_with_source("malformed relay chunk payload", e.to_string())
        })?;
        Ok(payload.data)
    }

    /// Open the WebSocket and start the per-connection pumps
    async fn establish(&self) -> Result<()> {
        let url = relay_endpoint(&self.inner.tracker_url, &self.inner.peer_id)?;
        debug!("connecting to relay at {}", url);

        let (ws, _) = timeout(HANDSHAKE_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| SwarmError::timeout("relay handshake deadline elapsed"))?
            .map_err(|e| {
                SwarmError::transport_full("relay connect failed", url.to_string(), e.to_string())
            })?;

        let (sink, stream) = ws.split();
        let generation = self.inner.conn_generation.load(Ordering::SeqCst);
        self.inner.connected.store(true, Ordering::SeqCst);

        let reader = self.clone();
        tokio::spawn(async move {
            reader.read_pump(stream).await;
        });

        let writer = self.clone();
        tokio::spawn(async move {
            writer.write_pump(sink, generation).await;
        });

        info!("relay connected as {}", self.inner.peer_id);
        Ok(())
    }

    /// Read inbound messages until the stream errors or closes
    async fn read_pump(self, mut stream: WsSource) {
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<RelayMessage>(&text) {
                        Ok(msg) => self.handle_message(msg),
                        Err(e) => warn!("invalid relay message: {}", e),
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("relay stream closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("relay read error: {}", e);
                    break;
                }
            }
        }
        self.inner.disconnect();
    }

    /// Drain the outbound queue and keep the connection alive with pings
    async fn write_pump(self, mut sink: WsSink, generation: u64) {
        let mut rx = self.inner.send_rx.lock().await;
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.reset();
        let mut generation_rx = self.inner.generation_tx.subscribe();

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(e) = sink.send(msg).await {
                        warn!("relay write error: {}", e);
                        break;
                    }
                }
                _ = ping.tick() => {
                    if let Err(e) = sink.send(WsMessage::Ping(Vec::new())).await {
                        warn!("relay ping failed: {}", e);
                        break;
                    }
                }
                _ = generation_rx.changed() => {
                    // A newer connection exists; hand the queue over
                    break;
                }
            }
        }

        drop(rx);
        if self.inner.conn_generation.load(Ordering::SeqCst) == generation {
            self.inner.disconnect();
        }
    }

    /// Route one inbound message
    fn handle_message(&self, msg: RelayMessage) {
        match msg.msg_type.as_str() {
            msg_types::CHUNK_REQUEST => {
                let client = self.clone();
                tokio::spawn(async move {
                    client.handle_chunk_request(msg).await;
                });
            }
            msg_types::CHUNK_DATA | msg_types::ERROR => {
                if let Some(request_id) = msg.request_id.clone() {
                    match self.inner.remove_pending(&request_id) {
                        Some(slot) => {
                            let _ = slot.send(msg);
                        }
                        None => debug!("no pending request for id {}", request_id),
                    }
                }
            }
            msg_types::PONG => {}
            other => debug!("ignoring relay message type {}", other),
        }
    }

    /// Serve an incoming chunk request through the registered provider
    async fn handle_chunk_request(self, msg: RelayMessage) {
        let Some(from) = msg.from.clone() else {
            warn!("chunk request without sender; dropping");
            return;
        };
        let request_id = msg.request_id.clone();

        let provider = self
            .inner
            .provider
            .lock()
            .expect("provider lock poisoned")
            .clone();
        let Some(provider) = provider else {
            self.inner
                .send_error(&from, request_id, 500, "no chunk provider registered")
                .await;
            return;
        };

        let request: ChunkRequestPayload = match msg.decode_payload() {
            Ok(req) => req,
            Err(e) => {
                debug!("invalid chunk request payload: {}", e);
                self.inner
                    .send_error(&from, request_id, 400, "invalid chunk request")
                    .await;
                return;
            }
        };

        match provider.chunk(&request.file_hash, request.chunk_index).await {
            Ok((data, hash)) => {
                debug!(
                    "serving chunk {} ({} bytes) to {} via relay",
                    request.chunk_index,
                    data.len(),
                    from
                );
                let payload = ChunkDataPayload {
                    file_hash: request.file_hash,
                    chunk_index: request.chunk_index,
                    data,
                    hash,
                };
                match RelayMessage::with_payload(
                    msg_types::CHUNK_DATA,
                    Some(from),
                    request_id,
                    &payload,
                ) {
                    Ok(reply) => {
                        let _ = self.inner.send_message(&reply).await;
                    }
                    Err(e) => warn!("failed to encode chunk reply: {}", e),
                }
            }
            Err(e) => {
                debug!("chunk {} unavailable: {}", request.chunk_index, e);
                self.inner
                    .send_error(&from, request_id, 404, &e.to_string())
                    .await;
            }
        }
    }

    /// Re-dial with exponential backoff whenever the connection drops
    async fn reconnect_loop(self, mut reconnect_rx: mpsc::Receiver<()>) {
        let mut done_rx = self.inner.done_tx.subscribe();

        loop {
            tokio::select! {
                _ = done_rx.changed() => return,
                signal = reconnect_rx.recv() => {
                    if signal.is_none() || self.inner.closing.load(Ordering::SeqCst) {
                        return;
                    }

                    let mut backoff = RECONNECT_BASE;
                    let mut attempt = 1u32;
                    loop {
                        if self.inner.closing.load(Ordering::SeqCst) {
                            return;
                        }
                        info!("relay reconnecting (attempt {})", attempt);
                        match self.establish().await {
                            Ok(()) => {
                                info!("relay reconnected");
                                break;
                            }
                            Err(e) => {
                                warn!("relay reconnect failed: {}", e);
                                tokio::time::sleep(backoff).await;
                                backoff = (backoff * 2).min(RECONNECT_MAX);
                                attempt += 1;
                            }
                        }
                    }
                }
            }
        }
    }
}

impl Inner {
    /// Queue an error reply toward `to`
    async fn send_error(&self, to: &str, request_id: Option<String>, code: i32, message: &str) {
        let payload = ErrorPayload {
            code,
            message: message.to_string(),
        };
        if let Ok(msg) =
            RelayMessage::with_payload(msg_types::ERROR, Some(to.to_string()), request_id, &payload)
        {
            let _ = self.send_message(&msg).await;
        }
    }

    /// Serialize and queue a message for the write pump
    async fn send_message(&self, msg: &RelayMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        self.send_tx
            .send(WsMessage::Text(text))
            .await
            .map_err(|_| SwarmError::transport("relay send queue closed"))?;
        Ok(())
    }

    /// Mark the connection down and trigger a reconnect unless closing
    fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.bump_generation();

        if !self.closing.load(Ordering::SeqCst) {
            let _ = self.reconnect_tx.try_send(());
        }
    }

    fn bump_generation(&self) {
        let next = self.conn_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.generation_tx.send(next);
    }

    fn remove_pending(&self, request_id: &str) -> Option<oneshot::Sender<RelayMessage>> {
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .remove(request_id)
    }
}

/// [`ChunkProvider`] serving chunks straight out of a local store
pub struct StoreChunkProvider {
    store: Arc<crate::storage::LocalStore>,
}

impl StoreChunkProvider {
    pub fn new(store: Arc<crate::storage::LocalStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChunkProvider for StoreChunkProvider {
    async fn chunk(&self, file_hash: &str, chunk_index: usize) -> Result<(Vec<u8>, String)> {
        let shared = self
            .store
            .shared_file(file_hash)
            .await
            .ok_or_else(|| SwarmError::not_found_resource("file not shared", file_hash))?;

        let hash = shared
            .metadata
            .chunks
            .get(chunk_index)
            .map(|c| c.hash.clone())
            .ok_or_else(|| {
                SwarmError::not_found_resource("chunk out of range", chunk_index.to_string())
            })?;

        let chunker = crate::content::Chunker::new(shared.metadata.chunk_size);
        let data = chunker.read_chunk(&shared.file_path, chunk_index).await?;
        Ok((data, hash))
    }
}

/// Resolve the hub WebSocket endpoint from a tracker base URL
pub fn relay_endpoint(tracker_url: &str, peer_id: &str) -> Result<Url> {
    let mut url = Url::parse(tracker_url).map_err(SwarmError::from)?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(SwarmError::config_with_field(
                format!("unsupported tracker scheme: {}", other),
                "tracker_url",
            )
            .into())
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SwarmError::config("failed to set relay scheme"))?;
    url.set_path("/relay");
    url.set_query(Some(&format!("peer_id={}", peer_id)));
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_endpoint_http() {
        let url = relay_endpoint("http://tracker.example:8080", "peer-1").unwrap();
        assert_eq!(url.as_str(), "ws://tracker.example:8080/relay?peer_id=peer-1");
    }

    #[test]
    fn test_relay_endpoint_https_upgrades_to_wss() {
        let url = relay_endpoint("https://tracker.example", "peer-2").unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/relay");
        assert_eq!(url.query(), Some("peer_id=peer-2"));
    }

    #[test]
    fn test_relay_endpoint_ws_passthrough() {
        let url = relay_endpoint("ws://localhost:9000", "p").unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn test_relay_endpoint_rejects_other_schemes() {
        assert!(relay_endpoint("ftp://tracker.example", "p").is_err());
        assert!(relay_endpoint("not a url", "p").is_err());
    }

    #[tokio::test]
    async fn test_request_chunk_when_disconnected() {
        let client = RelayClient::new("peer-1", "http://127.0.0.1:1");
        let err = client.request_chunk("target", "hash", 0).await.unwrap_err();
        assert!(err.to_string().contains("relay not connected"));
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces() {
        // Nothing listens on this port; establish() should fail cleanly
        let client = RelayClient::new("peer-1", "http://127.0.0.1:1");
        assert!(client.connect().await.is_err());
        assert!(!client.is_connected());
    }

    #[test]
    fn test_close_is_idempotent() {
        let client = RelayClient::new("peer-1", "http://127.0.0.1:1");
        client.close();
        client.close();
        assert!(!client.is_connected());
    }
}
