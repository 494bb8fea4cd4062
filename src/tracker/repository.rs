//! Storage repository abstraction
//!
//! The tracker sees storage only through this trait, so a SQL-backed
//! implementation can replace the in-memory one without touching any
//! handler.

use crate::protocol::{FileListItem, PeerFileInfo};
use crate::tracker::models::{File, FilePeer, Peer};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Aggregate counters for dashboards and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub peers_online: usize,
    pub peers_total: usize,
    pub files_count: usize,
}

/// Per-category file statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub category: String,
    pub file_count: usize,
    pub total_size: u64,
}

/// Everything the tracker needs from its storage backend
#[async_trait]
pub trait Repository: Send + Sync {
    // === Peers ===

    /// Insert or replace a peer; stamps registration and marks it online
    async fn register_peer(&self, peer: Peer) -> Result<()>;

    /// Look up a peer by id
    async fn get_peer(&self, peer_id: &str) -> Option<Peer>;

    /// Advance a peer's `last_seen` and mark it online
    async fn update_heartbeat(&self, peer_id: &str) -> Result<()>;

    /// Remove a peer and cascade its file relations
    async fn remove_peer(&self, peer_id: &str) -> Result<()>;

    /// Every known peer
    async fn list_all_peers(&self) -> Vec<Peer>;

    /// Mark peers offline when `last_seen` is older than `timeout`
    async fn cleanup_offline_peers(&self, timeout: Duration);

    /// Delete peers unseen for longer than `timeout`; returns how many
    async fn delete_offline_peers(&self, timeout: Duration) -> usize;

    // === Files ===

    /// Insert or replace a file
    async fn add_file(&self, file: File) -> Result<()>;

    /// Look up a file by hash
    async fn get_file(&self, hash: &str) -> Option<File>;

    /// All files with live seeder/leecher counts
    async fn list_files(&self) -> Vec<FileListItem>;

    /// Case-insensitive substring search on file names
    async fn search_files(&self, query: &str) -> Vec<FileListItem>;

    /// Files in a category
    async fn list_files_by_category(&self, category: &str) -> Vec<FileListItem>;

    /// Category statistics
    async fn list_categories(&self) -> Vec<CategoryStats>;

    /// Remove a file and its peer relations
    async fn delete_file(&self, hash: &str) -> Result<()>;

    /// Delete files with no online peer; returns how many
    async fn delete_orphan_files(&self) -> usize;

    // === File-peer relations ===

    /// Associate a peer with a file
    async fn add_file_peer(&self, file_peer: FilePeer) -> Result<()>;

    /// Online peers holding a file
    async fn get_peers_for_file(&self, file_hash: &str) -> Vec<PeerFileInfo>;

    // === Stats and reputation ===

    /// Aggregate counters
    async fn get_stats(&self) -> TrackerStats;

    /// Accumulate transfer volume and recompute reputation
    async fn update_peer_stats(
        &self,
        peer_id: &str,
        bytes_uploaded: u64,
        bytes_downloaded: u64,
    ) -> Result<()>;

    /// Online peers ordered by reputation, best first
    async fn get_top_peers(&self, limit: usize) -> Vec<Peer>;
}
