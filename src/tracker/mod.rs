//! Tracker service
//!
//! Registers peers, indexes announced files, answers swarm queries, and
//! hosts the WebSocket relay hub that forwards chunk traffic for
//! NAT-bound peers. Storage is reached only through the [`Repository`]
//! trait; the bundled implementation keeps everything in memory.

pub mod handlers;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod relay_hub;
pub mod repository;
pub mod server;
pub mod ws_hub;

pub use memory::MemoryRepository;
pub use metrics::Metrics;
pub use models::{File, FilePeer, Peer};
pub use relay_hub::RelayHub;
pub use repository::{CategoryStats, Repository, TrackerStats};
pub use server::TrackerServer;
pub use ws_hub::{events, WsEvent, WsHub};
