//! Wire protocol
//!
//! Message types shared between peers and with the tracker, plus the
//! length-delimited JSON framing used on peer-to-peer TCP streams.

pub mod messages;
pub mod wire;

pub use messages::{
    error_codes, AnnounceRequest, AnnounceResponse, ChunkInfo, FileListItem, FileMetadata,
    GetPeersResponse, HeartbeatRequest, HeartbeatResponse, ListFilesResponse, Message,
    PeerFileInfo, PeerInfo, RegisterRequest, RegisterResponse, PROTOCOL_VERSION,
};
pub use wire::{JsonWire, WireProtocol, MAX_FRAME_SIZE};
