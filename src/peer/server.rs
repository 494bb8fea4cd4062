//! Inbound peer server
//!
//! Accepts TCP sessions from other peers and serves chunks out of the
//! local store. If the preferred port is busy the listener probes
//! upward through a small range.

use crate::config::PORT_PROBE_RANGE;
use crate::content::Chunker;
use crate::error::SwarmError;
use crate::protocol::{error_codes, JsonWire, Message, WireProtocol};
use crate::storage::LocalStore;
use crate::throttle::BandwidthManager;
use anyhow::Result;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Serves chunks of shared files to the swarm
pub struct PeerServer {
    peer_id: String,
    store: Arc<LocalStore>,
    port: u16,
    bandwidth: Option<Arc<BandwidthManager>>,
}

impl PeerServer {
    /// Create a server for `store`, preferring `port`
    pub fn new(peer_id: impl Into<String>, store: Arc<LocalStore>, port: u16) -> Self {
        Self {
            peer_id: peer_id.into(),
            store,
            port,
            bandwidth: None,
        }
    }

    /// Throttle outgoing chunk data through `bandwidth`
    pub fn with_bandwidth(mut self, bandwidth: Arc<BandwidthManager>) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    /// Bind a listener, probing `port..=port+range` when ports are busy,
    /// and start accepting sessions. Returns the port actually bound.
    pub async fn start(&self) -> Result<u16> {
        self.start_with_probe(PORT_PROBE_RANGE).await
    }

    /// Like [`PeerServer::start`] with an explicit probe range
    pub async fn start_with_probe(&self, range: u16) -> Result<u16> {
        let mut last_err = None;
        for offset in 0..=range {
            let port = self.port + offset;
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => {
                    let bound = listener.local_addr().map(|a| a.port()).unwrap_or(port);
                    if port != self.port {
                        info!("port {} was busy, listening on {} instead", self.port, bound);
                    } else {
                        info!("peer server listening on port {}", bound);
                    }
                    self.spawn_accept_loop(listener);
                    return Ok(bound);
                }
                Err(e) => {
                    debug!("port {} unavailable: {}", port, e);
                    last_err = Some(e);
                }
            }
        }

        Err(SwarmError::transport_full(
            "no free port in probe range",
            format!("{}..={}", self.port, self.port + range),
            last_err.map(|e| e.to_string()).unwrap_or_default(),
        )
        .into())
    }

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let peer_id = self.peer_id.clone();
        let store = Arc::clone(&self.store);
        let bandwidth = self.bandwidth.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("inbound peer connection from {}", addr);
                        let session_peer_id = peer_id.clone();
                        let session_store = Arc::clone(&store);
                        let session_bandwidth = bandwidth.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_session(
                                stream,
                                &session_peer_id,
                                session_store,
                                session_bandwidth,
                            )
                            .await
                            {
                                debug!("session from {} ended: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        return;
                    }
                }
            }
        });
    }
}

/// Handle one inbound session until the peer disconnects
async fn serve_session(
    mut stream: TcpStream,
    our_peer_id: &str,
    store: Arc<LocalStore>,
    bandwidth: Option<Arc<BandwidthManager>>,
) -> Result<()> {
    let mut wire = JsonWire;

    loop {
        let msg = match wire.read_message(&mut stream).await {
            Ok(msg) => msg,
            // A failed read is how sessions normally end
            Err(e) => return Err(e),
        };

        match msg {
            Message::Handshake { peer_id, version } => {
                debug!("handshake from {} (version {})", peer_id, version);
                wire.write_message(&mut stream, &Message::handshake(our_peer_id))
                    .await?;
            }
            Message::RequestChunk {
                file_hash,
                chunk_index,
            } => {
                let reply = chunk_reply(&store, &file_hash, chunk_index).await;
                if let (Some(bandwidth), Message::ChunkData { data, .. }) = (&bandwidth, &reply) {
                    bandwidth.acquire_upload(data.len() as u64).await;
                }
                wire.write_message(&mut stream, &reply).await?;
            }
            Message::Bitfield { file_hash, .. } => {
                let reply = bitfield_reply(&store, &file_hash).await;
                wire.write_message(&mut stream, &reply).await?;
            }
            Message::Have {
                file_hash,
                chunk_index,
            } => {
                // Nothing to track yet; acknowledge by carrying on
                debug!("peer has chunk {} of {}", chunk_index, file_hash);
            }
            other => {
                wire.write_message(
                    &mut stream,
                    &Message::Error {
                        code: error_codes::INVALID_MESSAGE,
                        message: format!("unexpected message type {}", other.kind()),
                    },
                )
                .await?;
            }
        }
    }
}

/// Build the response to a chunk request
async fn chunk_reply(store: &LocalStore, file_hash: &str, chunk_index: usize) -> Message {
    let Some(shared) = store.shared_file(file_hash).await else {
        debug!("chunk request for unknown file {}", file_hash);
        return Message::Error {
            code: error_codes::FILE_NOT_FOUND,
            message: "file not found".to_string(),
        };
    };

    if chunk_index >= shared.metadata.chunks.len() {
        return Message::Error {
            code: error_codes::CHUNK_NOT_AVAILABLE,
            message: format!("chunk {} out of range", chunk_index),
        };
    }

    let chunker = Chunker::new(shared.metadata.chunk_size);
    match chunker.read_chunk(&shared.file_path, chunk_index).await {
        Ok(data) => {
            debug!(
                "serving chunk {} ({} bytes) of {}",
                chunk_index,
                data.len(),
                shared.metadata.name
            );
            Message::ChunkData {
                file_hash: file_hash.to_string(),
                chunk_index,
                chunk_hash: shared.metadata.chunks[chunk_index].hash.clone(),
                data,
            }
        }
        Err(e) => {
            warn!("failed to read chunk {}: {}", chunk_index, e);
            Message::Error {
                code: error_codes::CHUNK_NOT_AVAILABLE,
                message: "could not read chunk".to_string(),
            }
        }
    }
}

/// Build the response to a bitfield exchange
async fn bitfield_reply(store: &LocalStore, file_hash: &str) -> Message {
    let bitfield = match store.shared_file(file_hash).await {
        // We share only complete files, so every bit is set
        Some(shared) => vec![true; shared.metadata.chunks.len()],
        None => vec![],
    };
    Message::Bitfield {
        file_hash: file_hash.to_string(),
        bitfield,
    }
}
