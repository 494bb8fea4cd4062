//! Outbound peer connections
//!
//! One TCP session per remote peer: dial, exchange handshakes, then issue
//! sequential chunk requests. A connection serves multiple requests but
//! never concurrent ones; workers own their connection exclusively.

use crate::content::hash;
use crate::error::SwarmError;
use crate::peer::SessionState;
use crate::protocol::{JsonWire, Message, WireProtocol};
use anyhow::Result;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default TCP connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-request read timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Factory for outbound peer connections, carrying our identity
#[derive(Debug, Clone)]
pub struct P2pClient {
    peer_id: String,
    connect_timeout: Duration,
}

impl P2pClient {
    /// Create a client that dials with the given peer id
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Our peer id
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Dial a peer and complete the handshake
    pub async fn connect(&self, ip: &str, port: u16) -> Result<PeerConnection> {
        PeerConnection::connect(ip, port, &self.peer_id, self.connect_timeout).await
    }
}

/// An established session with one remote peer
pub struct PeerConnection {
    stream: TcpStream,
    wire: JsonWire,
    state: SessionState,
    remote_peer_id: Option<String>,
    addr: String,
}

impl PeerConnection {
    /// Dial `ip:port`, send our handshake, and wait for the peer's
    pub async fn connect(
        ip: &str,
        port: u16,
        our_peer_id: &str,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let addr = format!("{}:{}", ip, port);
        debug!("dialing peer at {}", addr);

        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                warn!("connect timeout dialing {}", addr);
                SwarmError::transport_with_address("connect timeout", addr.clone())
            })?
            .map_err(|e| {
                debug!("failed to dial {}: {}", addr, e);
                SwarmError::transport_full("failed to connect", addr.clone(), e.to_string())
            })?;

        let mut conn = Self {
            stream,
            wire: JsonWire,
            state: SessionState::Handshaking,
            remote_peer_id: None,
            addr,
        };
        conn.handshake(our_peer_id).await?;
        Ok(conn)
    }

    /// Exchange handshakes; captures the remote peer id
    async fn handshake(&mut self, our_peer_id: &str) -> Result<()> {
        self.wire
            .write_message(&mut self.stream, &Message::handshake(our_peer_id))
            .await
            .map_err(|e| self.fail(SwarmError::transport_full(
                "failed to send handshake",
                self.addr.clone(),
                e.to_string(),
            )))?;

        let reply = self
            .wire
            .read_message(&mut self.stream)
            .await
            .map_err(|e| self.fail(SwarmError::transport_full(
                "failed to read handshake",
                self.addr.clone(),
                e.to_string(),
            )))?;

        match reply {
            Message::Handshake { peer_id, version } => {
                debug!("handshake complete with {} (version {})", peer_id, version);
                self.remote_peer_id = Some(peer_id);
                self.state = SessionState::Ready;
                Ok(())
            }
            other => Err(self
                .fail(SwarmError::protocol_with_source(
                    "expected HANDSHAKE",
                    other.kind(),
                ))
                .into()),
        }
    }

    /// Request one chunk and wait for its data
    ///
    /// When `expected_hash` is non-empty the received bytes are verified
    /// against it and a mismatch is an integrity error.
    pub async fn request_chunk(
        &mut self,
        file_hash: &str,
        chunk_index: usize,
        expected_hash: &str,
    ) -> Result<Vec<u8>> {
        if !self.state.can_request() {
            return Err(SwarmError::protocol_with_source(
                "connection not ready for requests",
                self.state.to_string(),
            )
            .into());
        }

        self.state = SessionState::Requesting;
        self.wire
            .write_message(
                &mut self.stream,
                &Message::RequestChunk {
                    file_hash: file_hash.to_string(),
                    chunk_index,
                },
            )
            .await
            .map_err(|e| self.fail(SwarmError::transport_full(
                "failed to send chunk request",
                self.addr.clone(),
                e.to_string(),
            )))?;

        self.state = SessionState::Receiving;
        let reply = timeout(REQUEST_TIMEOUT, self.wire.read_message(&mut self.stream))
            .await
            .map_err(|_| self.fail(SwarmError::timeout("chunk response deadline elapsed")))?
            .map_err(|e| self.fail(SwarmError::transport_full(
                "failed to read chunk response",
                self.addr.clone(),
                e.to_string(),
            )))?;

        match reply {
            Message::ChunkData { data, .. } => {
                if !expected_hash.is_empty() && !hash::verify(&data, expected_hash) {
                    let actual = hash::digest_hex(&data);
                    return Err(self
                        .fail(SwarmError::integrity_mismatch(
                            format!("chunk {} hash mismatch", chunk_index),
                            expected_hash,
                            actual,
                        ))
                        .into());
                }
                self.state = SessionState::Ready;
                Ok(data)
            }
            Message::Error { code, message } => {
                self.state = SessionState::Ready;
                Err(SwarmError::peer_full(
                    message,
                    code,
                    self.remote_peer_id.clone().unwrap_or_default(),
                )
                .into())
            }
            other => Err(self
                .fail(SwarmError::protocol_with_source(
                    "expected CHUNK_DATA or ERROR",
                    other.kind(),
                ))
                .into()),
        }
    }

    /// Send our bitfield and read the peer's in response
    pub async fn exchange_bitfield(
        &mut self,
        file_hash: &str,
        bitfield: Vec<bool>,
    ) -> Result<Vec<bool>> {
        self.wire
            .write_message(
                &mut self.stream,
                &Message::Bitfield {
                    file_hash: file_hash.to_string(),
                    bitfield,
                },
            )
            .await?;

        match self.wire.read_message(&mut self.stream).await? {
            Message::Bitfield { bitfield, .. } => Ok(bitfield),
            other => Err(self
                .fail(SwarmError::protocol_with_source(
                    "expected BITFIELD",
                    other.kind(),
                ))
                .into()),
        }
    }

    /// Announce a newly acquired chunk; fire and forget
    pub async fn send_have(&mut self, file_hash: &str, chunk_index: usize) -> Result<()> {
        self.wire
            .write_message(
                &mut self.stream,
                &Message::Have {
                    file_hash: file_hash.to_string(),
                    chunk_index,
                },
            )
            .await
    }

    /// Mark the session closed; the TCP stream drops with self
    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            info!("closing connection to {}", self.addr);
            self.state = SessionState::Closed;
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The remote peer's id, known after handshake
    pub fn remote_peer_id(&self) -> Option<&str> {
        self.remote_peer_id.as_deref()
    }

    /// The remote address this session dialed
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Record a failure and transition to the error state
    fn fail(&mut self, err: SwarmError) -> SwarmError {
        self.state = SessionState::Error;
        err
    }
}
