//! fileswarm
//!
//! Core of a peer-to-peer file-sharing system: a parallel chunk-download
//! engine with per-peer scoring and relay fallback, a tracker service
//! that registers peers and answers swarm queries, and a content
//! integrity layer of fixed-size chunks, SHA-256 digests, and Merkle
//! proofs.

pub mod client;
pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod logging;
pub mod magnet;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod scorer;
pub mod storage;
pub mod throttle;
pub mod tracker;

pub use client::TrackerClient;
pub use config::{PeerConfig, TrackerConfig};
pub use content::{Chunker, MerkleTree};
pub use engine::Downloader;
pub use error::SwarmError;
pub use magnet::Magnet;
pub use peer::{P2pClient, PeerConnection, PeerNode, PeerServer};
pub use protocol::{ChunkInfo, FileMetadata, GetPeersResponse, Message};
pub use relay::{ChunkProvider, RelayClient};
pub use scorer::ScoreBoard;
pub use storage::{DownloadState, DownloadStatus, LocalStore};
pub use tracker::{MemoryRepository, Repository, TrackerServer};
