//! In-memory repository
//!
//! One lock over the three maps keeps seeder/leecher counting consistent
//! with peer liveness: counts are always derived from the peers map at
//! read time, so only online peers count.

use crate::protocol::{FileListItem, PeerFileInfo, PeerInfo};
use crate::tracker::models::{File, FilePeer, Peer};
use crate::tracker::repository::{CategoryStats, Repository, TrackerStats};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    peers: HashMap<String, Peer>,
    files: HashMap<String, File>,
    file_peers: HashMap<String, Vec<FilePeer>>,
}

impl Inner {
    /// Count online seeders and leechers of a file
    fn count_peers(&self, file_hash: &str) -> (usize, usize) {
        let mut seeders = 0;
        let mut leechers = 0;
        for fp in self.file_peers.get(file_hash).map(Vec::as_slice).unwrap_or(&[]) {
            match self.peers.get(&fp.peer_id) {
                Some(peer) if peer.is_online => {
                    if fp.is_seeder {
                        seeders += 1;
                    } else {
                        leechers += 1;
                    }
                }
                _ => {}
            }
        }
        (seeders, leechers)
    }

    fn list_item(&self, file: &File) -> FileListItem {
        let (seeders, leechers) = self.count_peers(&file.hash);
        FileListItem {
            hash: file.hash.clone(),
            name: file.name.clone(),
            size: file.size,
            seeders,
            leechers,
            added_at: file.added_at,
        }
    }

    fn drop_peer_relations(&mut self, peer_id: &str) {
        for relations in self.file_peers.values_mut() {
            relations.retain(|fp| fp.peer_id != peer_id);
        }
    }
}

/// Repository backed by process memory
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: RwLock<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn register_peer(&self, mut peer: Peer) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        // Re-registration keeps accumulated stats and the original
        // registration time
        if let Some(existing) = inner.peers.get(&peer.id) {
            peer.registered_at = existing.registered_at;
            peer.bytes_uploaded = existing.bytes_uploaded;
            peer.bytes_downloaded = existing.bytes_downloaded;
            peer.files_shared = existing.files_shared;
            peer.reputation = existing.reputation;
        }
        peer.last_seen = now;
        peer.is_online = true;
        inner.peers.insert(peer.id.clone(), peer);
        Ok(())
    }

    async fn get_peer(&self, peer_id: &str) -> Option<Peer> {
        self.inner.read().await.peers.get(peer_id).cloned()
    }

    async fn update_heartbeat(&self, peer_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(peer) = inner.peers.get_mut(peer_id) {
            peer.last_seen = Utc::now();
            peer.is_online = true;
        }
        Ok(())
    }

    async fn remove_peer(&self, peer_id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.peers.remove(peer_id);
        inner.drop_peer_relations(peer_id);
        Ok(())
    }

    async fn list_all_peers(&self) -> Vec<Peer> {
        self.inner.read().await.peers.values().cloned().collect()
    }

    async fn cleanup_offline_peers(&self, timeout: Duration) {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        for peer in inner.peers.values_mut() {
            if now - peer.last_seen > timeout {
                peer.is_online = false;
            }
        }
    }

    async fn delete_offline_peers(&self, timeout: Duration) -> usize {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let stale: Vec<String> = inner
            .peers
            .values()
            .filter(|peer| now - peer.last_seen > timeout)
            .map(|peer| peer.id.clone())
            .collect();

        for id in &stale {
            inner.peers.remove(id);
            inner.drop_peer_relations(id);
        }
        if !stale.is_empty() {
            debug!("deleted {} stale peers", stale.len());
        }
        stale.len()
    }

    async fn add_file(&self, mut file: File) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.files.get(&file.hash) {
            file.added_at = existing.added_at;
            file.added_by = existing.added_by.clone();
        } else {
            file.added_at = Utc::now();
        }
        inner.files.insert(file.hash.clone(), file);
        Ok(())
    }

    async fn get_file(&self, hash: &str) -> Option<File> {
        self.inner.read().await.files.get(hash).cloned()
    }

    async fn list_files(&self) -> Vec<FileListItem> {
        let inner = self.inner.read().await;
        inner.files.values().map(|f| inner.list_item(f)).collect()
    }

    async fn search_files(&self, query: &str) -> Vec<FileListItem> {
        let query = query.to_lowercase();
        let inner = self.inner.read().await;
        inner
            .files
            .values()
            .filter(|f| f.name.to_lowercase().contains(&query))
            .map(|f| inner.list_item(f))
            .collect()
    }

    async fn list_files_by_category(&self, category: &str) -> Vec<FileListItem> {
        let category = category.to_lowercase();
        let inner = self.inner.read().await;
        inner
            .files
            .values()
            .filter(|f| f.category.to_lowercase() == category)
            .map(|f| inner.list_item(f))
            .collect()
    }

    async fn list_categories(&self) -> Vec<CategoryStats> {
        let inner = self.inner.read().await;
        let mut stats: HashMap<String, CategoryStats> = HashMap::new();
        for file in inner.files.values() {
            let category = if file.category.is_empty() {
                "other".to_string()
            } else {
                file.category.clone()
            };
            let entry = stats.entry(category.clone()).or_insert(CategoryStats {
                category,
                file_count: 0,
                total_size: 0,
            });
            entry.file_count += 1;
            entry.total_size += file.size;
        }
        stats.into_values().collect()
    }

    async fn delete_file(&self, hash: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.files.remove(hash);
        inner.file_peers.remove(hash);
        Ok(())
    }

    async fn delete_orphan_files(&self) -> usize {
        let mut inner = self.inner.write().await;
        let orphans: Vec<String> = inner
            .files
            .keys()
            .filter(|hash| {
                let (seeders, leechers) = inner.count_peers(hash);
                seeders + leechers == 0
            })
            .cloned()
            .collect();

        for hash in &orphans {
            inner.files.remove(hash);
            inner.file_peers.remove(hash);
        }
        if !orphans.is_empty() {
            debug!("collected {} orphan files", orphans.len());
        }
        orphans.len()
    }

    async fn add_file_peer(&self, mut file_peer: FilePeer) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        file_peer.last_updated = now;

        let relations = inner
            .file_peers
            .entry(file_peer.file_hash.clone())
            .or_default();
        if let Some(existing) = relations
            .iter_mut()
            .find(|fp| fp.peer_id == file_peer.peer_id)
        {
            file_peer.added_at = existing.added_at;
            *existing = file_peer;
        } else {
            file_peer.added_at = now;
            relations.push(file_peer);
        }
        Ok(())
    }

    async fn get_peers_for_file(&self, file_hash: &str) -> Vec<PeerFileInfo> {
        let inner = self.inner.read().await;
        inner
            .file_peers
            .get(file_hash)
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter_map(|fp| {
                let peer = inner.peers.get(&fp.peer_id)?;
                if !peer.is_online {
                    return None;
                }
                Some(PeerFileInfo {
                    peer: PeerInfo {
                        peer_id: peer.id.clone(),
                        ip: peer.ip.clone(),
                        port: peer.port,
                        hostname: (!peer.hostname.is_empty()).then(|| peer.hostname.clone()),
                    },
                    chunks_available: fp.chunks_available.clone(),
                    is_seeder: fp.is_seeder,
                })
            })
            .collect()
    }

    async fn get_stats(&self) -> TrackerStats {
        let inner = self.inner.read().await;
        TrackerStats {
            peers_online: inner.peers.values().filter(|p| p.is_online).count(),
            peers_total: inner.peers.len(),
            files_count: inner.files.len(),
        }
    }

    async fn update_peer_stats(
        &self,
        peer_id: &str,
        bytes_uploaded: u64,
        bytes_downloaded: u64,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(peer) = inner.peers.get_mut(peer_id) {
            peer.bytes_uploaded += bytes_uploaded;
            peer.bytes_downloaded += bytes_downloaded;
            peer.reputation = calculate_reputation(peer);
        }
        Ok(())
    }

    async fn get_top_peers(&self, limit: usize) -> Vec<Peer> {
        let inner = self.inner.read().await;
        let mut peers: Vec<Peer> = inner
            .peers
            .values()
            .filter(|p| p.is_online)
            .cloned()
            .collect();
        peers.sort_by(|a, b| {
            b.reputation
                .partial_cmp(&a.reputation)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        peers.truncate(limit);
        peers
    }
}

/// Reputation in `[0, 100]`: base 50, plus ratio, files-shared, and uptime
/// bonuses, minus a leech penalty.
pub fn calculate_reputation(peer: &Peer) -> f64 {
    let mut score = 50.0;

    if peer.bytes_downloaded > 0 {
        let ratio = peer.bytes_uploaded as f64 / peer.bytes_downloaded as f64;
        if ratio >= 1.0 {
            score += (ratio * 10.0).min(30.0);
        } else {
            score -= (1.0 - ratio) * 20.0;
        }
    } else if peer.bytes_uploaded > 0 {
        // Pure seeder
        score += 30.0;
    }

    score += (peer.files_shared as f64 * 2.0).min(10.0);

    let uptime_days = (peer.last_seen - peer.registered_at).num_seconds() as f64 / 86_400.0;
    score += (uptime_days * 0.5).min(10.0);

    score.clamp(0.0, 100.0)
}
