//! WebSocket relay transport
//!
//! When two peers cannot reach each other over TCP, chunk traffic is
//! forwarded through the tracker's relay hub. This module holds the relay
//! message envelope shared with the hub and the peer-side client with its
//! request multiplexer and reconnect loop.

pub mod client;
pub mod protocol;

pub use client::{ChunkProvider, RelayClient, StoreChunkProvider};
pub use protocol::{
    msg_types, ChunkDataPayload, ChunkRequestPayload, ErrorPayload, RelayMessage,
};
