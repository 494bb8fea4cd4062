//! Peer-to-peer transport
//!
//! Direct TCP sessions between peers: the outbound connection used by
//! download workers and the inbound server that serves chunks out of the
//! local store.

pub mod connection;
pub mod node;
pub mod server;
pub mod state;

pub use connection::{P2pClient, PeerConnection};
pub use node::PeerNode;
pub use server::PeerServer;
pub use state::SessionState;
