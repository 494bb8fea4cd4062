//! Tracker-side entities
//!
//! Peers, files, and the relation between them. These are the rows the
//! repository stores; wire shapes live in the protocol module.

use crate::protocol::ChunkInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub hostname: String,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub files_shared: u32,
    /// Reputation score in `[0, 100]`
    pub reputation: f64,
}

impl Peer {
    /// Create a freshly registered, online peer
    pub fn new(id: impl Into<String>, ip: impl Into<String>, port: u16, hostname: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            ip: ip.into(),
            port,
            hostname: hostname.unwrap_or_default(),
            registered_at: now,
            last_seen: now,
            is_online: true,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
            files_shared: 0,
            reputation: 50.0,
        }
    }

    /// Upload/download ratio; zero while nothing has been downloaded
    pub fn ratio(&self) -> f64 {
        if self.bytes_downloaded == 0 {
            return 0.0;
        }
        self.bytes_uploaded as f64 / self.bytes_downloaded as f64
    }
}

/// An indexed file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub id: String,
    pub hash: String,
    pub name: String,
    pub size: u64,
    pub chunk_size: u64,
    pub chunks: Vec<ChunkInfo>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub added_at: DateTime<Utc>,
    /// Peer id of the first announcer
    pub added_by: String,
}

/// Relation between a file and a peer holding (some of) it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePeer {
    pub file_hash: String,
    pub peer_id: String,
    pub chunks_available: Vec<usize>,
    pub is_seeder: bool,
    pub added_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_peer_defaults() {
        let peer = Peer::new("p1", "10.0.0.1", 6881, None);
        assert!(peer.is_online);
        assert_eq!(peer.reputation, 50.0);
        assert_eq!(peer.hostname, "");
        assert_eq!(peer.registered_at, peer.last_seen);
    }

    #[test]
    fn test_ratio() {
        let mut peer = Peer::new("p1", "10.0.0.1", 6881, None);
        assert_eq!(peer.ratio(), 0.0);

        peer.bytes_uploaded = 300;
        peer.bytes_downloaded = 100;
        assert_eq!(peer.ratio(), 3.0);
    }

    #[test]
    fn test_peer_serde_roundtrip() {
        let peer = Peer::new("p1", "10.0.0.1", 6881, Some("workstation".to_string()));
        let json = serde_json::to_string(&peer).unwrap();
        let parsed: Peer = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, "p1");
        assert_eq!(parsed.hostname, "workstation");
    }
}
