//! Parallel chunk downloader
//!
//! One coordinating task loads every missing chunk into a queue, spawns
//! up to `max_workers` workers, and drains their results. Each worker
//! owns at most one peer connection at a time, prefers high-scoring peers,
//! and falls back to the relay transport once direct TCP is exhausted.
//! Retries are expressed by each worker iterating across its assigned
//! peers, not by re-queueing tasks.

use crate::client::TrackerClient;
use crate::engine::DownloadStats;
use crate::error::SwarmError;
use crate::peer::{P2pClient, PeerConnection};
use crate::protocol::{FileMetadata, GetPeersResponse, PeerFileInfo};
use crate::relay::RelayClient;
use crate::storage::{DownloadState, LocalStore};
use crate::throttle::BandwidthManager;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Default worker pool size
const DEFAULT_MAX_WORKERS: usize = 8;

/// Default attempts per chunk before a worker gives up on a peer list
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default wall-clock bound per chunk request
const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// One unit of work: a chunk to fetch and verify
#[derive(Debug, Clone)]
pub struct ChunkTask {
    pub index: usize,
    /// Expected hex SHA-256 of the chunk
    pub hash: String,
    pub size: u64,
    pub retries: u32,
    pub max_retries: u32,
}

/// What a worker reports back per task
#[derive(Debug)]
struct ChunkResult {
    index: usize,
    size: u64,
    err: Option<String>,
}

/// Parallel chunk download engine
pub struct Downloader {
    store: Arc<LocalStore>,
    p2p: P2pClient,
    relay: Option<RelayClient>,
    tracker: Option<Arc<TrackerClient>>,
    bandwidth: Option<Arc<BandwidthManager>>,
    max_workers: usize,
    max_retries: u32,
    chunk_timeout: Duration,
}

impl Downloader {
    /// Create an engine using only the direct TCP transport
    pub fn new(store: Arc<LocalStore>, p2p: P2pClient) -> Self {
        Self {
            store,
            p2p,
            relay: None,
            tracker: None,
            bandwidth: None,
            max_workers: DEFAULT_MAX_WORKERS,
            max_retries: DEFAULT_MAX_RETRIES,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
        }
    }

    /// Attach a relay client for NAT-bound peers
    pub fn with_relay(mut self, relay: RelayClient) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Throttle received chunk data through `bandwidth`
    pub fn with_bandwidth(mut self, bandwidth: Arc<BandwidthManager>) -> Self {
        self.bandwidth = Some(bandwidth);
        self
    }

    /// Attach a tracker client; completed files are announced through it
    pub fn with_tracker(mut self, tracker: Arc<TrackerClient>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Override pool size, retry budget, and per-chunk timeout
    pub fn with_config(
        mut self,
        max_workers: usize,
        max_retries: u32,
        chunk_timeout: Duration,
    ) -> Self {
        self.max_workers = max_workers.max(1);
        self.max_retries = max_retries;
        self.chunk_timeout = chunk_timeout;
        self
    }

    /// Download every chunk of the file described by `swarm`, verify,
    /// assemble, and register the result as shared. Returns the run's
    /// statistics, including the final per-peer scores.
    pub async fn download_file(&self, swarm: &GetPeersResponse) -> Result<DownloadStats> {
        if swarm.peers.is_empty() {
            return Err(SwarmError::not_found_resource(
                "no peers available for this file",
                swarm.file_hash.clone(),
            )
            .into());
        }

        let metadata = Arc::new(swarm.metadata());
        let state = self.store.start_download(&metadata).await?;

        let tasks: Vec<ChunkTask> = metadata
            .chunks
            .iter()
            .filter(|chunk| !state.chunks_received.get(chunk.index).copied().unwrap_or(false))
            .map(|chunk| ChunkTask {
                index: chunk.index,
                hash: chunk.hash.clone(),
                size: chunk.size,
                retries: 0,
                max_retries: self.max_retries,
            })
            .collect();

        let peer_ids: Vec<&str> = swarm.peers.iter().map(|p| p.peer.peer_id.as_str()).collect();
        let stats = Arc::new(RwLock::new(DownloadStats::new(
            metadata.chunks.len(),
            peer_ids,
        )));

        if tasks.is_empty() {
            debug!("all chunks of {} already on disk", metadata.name);
        } else {
            let num_workers = self.max_workers.min(swarm.peers.len()).min(tasks.len());
            info!(
                "downloading {}: {} chunks across {} workers ({} peers)",
                metadata.name,
                tasks.len(),
                num_workers,
                swarm.peers.len()
            );

            let (task_tx, task_rx) = mpsc::channel(tasks.len());
            for task in tasks {
                // Queue is sized for the full task list, so this never blocks
                if task_tx.send(task).await.is_err() {
                    break;
                }
            }
            drop(task_tx);
            let task_rx = Arc::new(Mutex::new(task_rx));

            let (result_tx, mut result_rx) = mpsc::channel(metadata.chunks.len().max(1));

            for worker_id in 0..num_workers {
                let assigned = assign_peers(worker_id, num_workers, &swarm.peers);
                let worker = Worker {
                    id: worker_id,
                    peers: assigned,
                    metadata: Arc::clone(&metadata),
                    state: state.clone(),
                    store: Arc::clone(&self.store),
                    stats: Arc::clone(&stats),
                    p2p: self.p2p.clone(),
                    relay: self.relay.clone(),
                    bandwidth: self.bandwidth.clone(),
                    chunk_timeout: self.chunk_timeout,
                };
                let tasks = Arc::clone(&task_rx);
                let results = result_tx.clone();
                tokio::spawn(async move {
                    worker.run(tasks, results).await;
                });
            }
            drop(result_tx);

            let mut last_err: Option<String> = None;
            while let Some(result) = result_rx.recv().await {
                match result.err {
                    Some(err) => {
                        debug!("chunk {} failed: {}", result.index, err);
                        last_err = Some(err);
                    }
                    None => debug!("chunk {} done ({} bytes)", result.index, result.size),
                }
            }

            let mut report = stats.write().await;
            report.finish();
            report.log_report(&metadata.name);
            drop(report);

            if !self.store.is_download_complete(&metadata.hash).await {
                let message = last_err.unwrap_or_else(|| "download incomplete".to_string());
                self.store.set_download_error(&metadata.hash, &message).await?;
                return Err(SwarmError::transport(message))
                    .context(format!("failed to download {}", metadata.name));
            }
        }

        if let Err(e) = self.assemble_file(&state).await {
            // Temp chunks stay on disk so the next attempt can resume
            self.store
                .set_download_error(&metadata.hash, &e.to_string())
                .await?;
            return Err(e).context(format!("failed to assemble {}", metadata.name));
        }

        self.store
            .add_shared_file(&metadata, &state.output_path)
            .await?;
        self.store.complete_download(&metadata.hash).await?;

        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker.announce_file(&metadata).await {
                warn!("failed to announce {}: {}", metadata.name, e);
            }
        }

        info!("download complete: {}", metadata.name);
        let mut snapshot = stats.read().await.clone();
        if snapshot.finished_at.is_none() {
            snapshot.finish();
        }
        Ok(snapshot)
    }

    /// Concatenate `chunk_0 .. chunk_{N-1}` into the output file and
    /// remove the temp directory.
    async fn assemble_file(&self, state: &DownloadState) -> Result<()> {
        let mut output = tokio::fs::File::create(&state.output_path).await.map_err(|e| {
            SwarmError::storage_full(
                "failed to create output file",
                state.output_path.display().to_string(),
                e.to_string(),
            )
        })?;

        for index in 0..state.chunks_received.len() {
            let chunk_path = state.chunk_path(index);
            let data = tokio::fs::read(&chunk_path).await.map_err(|e| {
                SwarmError::storage_full(
                    "failed to read chunk file",
                    chunk_path.display().to_string(),
                    e.to_string(),
                )
            })?;
            output.write_all(&data).await.map_err(|e| {
                SwarmError::storage_full(
                    "failed to write output file",
                    state.output_path.display().to_string(),
                    e.to_string(),
                )
            })?;
        }
        output.flush().await?;

        tokio::fs::remove_dir_all(&state.temp_dir).await.ok();
        debug!("assembled {} chunks into {}", state.chunks_received.len(), state.output_path.display());
        Ok(())
    }
}

/// Round-robin peer partition: worker `w` gets peers at indices
/// `i mod num_workers == w`, with a fallback so nobody is left empty.
fn assign_peers(worker_id: usize, num_workers: usize, peers: &[PeerFileInfo]) -> Vec<PeerFileInfo> {
    let mut assigned: Vec<PeerFileInfo> = peers
        .iter()
        .enumerate()
        .filter(|(i, _)| i % num_workers == worker_id)
        .map(|(_, p)| p.clone())
        .collect();

    if assigned.is_empty() && !peers.is_empty() {
        assigned.push(peers[worker_id % peers.len()].clone());
    }
    assigned
}

/// Everything one worker needs for its task loop
struct Worker {
    id: usize,
    peers: Vec<PeerFileInfo>,
    metadata: Arc<FileMetadata>,
    state: DownloadState,
    store: Arc<LocalStore>,
    stats: Arc<RwLock<DownloadStats>>,
    p2p: P2pClient,
    relay: Option<RelayClient>,
    bandwidth: Option<Arc<BandwidthManager>>,
    chunk_timeout: Duration,
}

impl Worker {
    async fn run(
        self,
        tasks: Arc<Mutex<mpsc::Receiver<ChunkTask>>>,
        results: mpsc::Sender<ChunkResult>,
    ) {
        if self.peers.is_empty() {
            debug!("worker {} has no peers assigned, exiting", self.id);
            return;
        }

        let sorted_peers = {
            let stats = self.stats.read().await;
            stats.scores.sorted_by_score(&self.peers)
        };

        let mut conn: Option<PeerConnection> = None;
        let mut current_idx = 0usize;
        let mut relay_only = false;

        // Probe direct TCP once so NAT-bound workers go straight to the
        // relay instead of timing out on every task.
        if self.relay_ready() {
            let probe = &sorted_peers[0];
            match self.p2p.connect(&probe.peer.ip, probe.peer.port).await {
                Ok(c) => {
                    debug!(
                        "worker {} direct TCP to {}:{} established",
                        self.id, probe.peer.ip, probe.peer.port
                    );
                    conn = Some(c);
                }
                Err(e) => {
                    info!(
                        "worker {} direct TCP to {}:{} failed ({}), using relay only",
                        self.id, probe.peer.ip, probe.peer.port, e
                    );
                    relay_only = true;
                }
            }
        }

        loop {
            let task = {
                let mut rx = tasks.lock().await;
                rx.recv().await
            };
            let Some(task) = task else { break };

            if self
                .state_chunk_received(task.index)
                .await
            {
                let _ = results
                    .send(ChunkResult {
                        index: task.index,
                        size: 0,
                        err: None,
                    })
                    .await;
                continue;
            }

            let started = Instant::now();
            let mut data: Option<Vec<u8>> = None;
            let mut source: Option<String> = None;
            let mut last_err: Option<String> = None;

            // Direct phase: walk assigned peers from the current index
            if !relay_only {
                for attempt in 0..sorted_peers.len() {
                    let idx = (current_idx + attempt) % sorted_peers.len();
                    let peer = &sorted_peers[idx];

                    if conn.is_none() || idx != current_idx {
                        if let Some(mut old) = conn.take() {
                            old.close();
                        }
                        match self.p2p.connect(&peer.peer.ip, peer.peer.port).await {
                            Ok(c) => {
                                conn = Some(c);
                                current_idx = idx;
                            }
                            Err(e) => {
                                debug!(
                                    "worker {} connect to {}:{} failed: {}",
                                    self.id, peer.peer.ip, peer.peer.port, e
                                );
                                self.record_failure(&peer.peer.peer_id).await;
                                last_err = Some(e.to_string());
                                continue;
                            }
                        }
                    }

                    let Some(active) = conn.as_mut() else { continue };
                    let request = active
                        .request_chunk(&self.metadata.hash, task.index, &task.hash)
                        .await;
                    match request {
                        Ok(bytes) => {
                            source = Some(peer.peer.peer_id.clone());
                            data = Some(bytes);
                            break;
                        }
                        Err(e) => {
                            debug!(
                                "worker {} chunk {} from {} failed: {}",
                                self.id, task.index, peer.peer.peer_id, e
                            );
                            self.record_failure(&peer.peer.peer_id).await;
                            last_err = Some(e.to_string());
                            if let Some(mut old) = conn.take() {
                                old.close();
                            }
                        }
                    }
                }

                if data.is_none() && self.relay_ready() {
                    info!(
                        "worker {} exhausted direct peers, switching to relay only",
                        self.id
                    );
                    relay_only = true;
                }
            }

            // Relay phase: ask each peer through the hub
            if data.is_none() {
                if let Some(relay) = self.relay.clone().filter(|r| r.is_connected()) {
                    for peer in &sorted_peers {
                        let request = tokio::time::timeout(
                            self.chunk_timeout,
                            relay.request_chunk(&peer.peer.peer_id, &self.metadata.hash, task.index),
                        )
                        .await;
                        match request {
                            Ok(Ok(bytes)) => {
                                if crate::content::hash::verify(&bytes, &task.hash) {
                                    source = Some(peer.peer.peer_id.clone());
                                    data = Some(bytes);
                                    break;
                                }
                                self.record_failure(&peer.peer.peer_id).await;
                                last_err =
                                    Some(format!("chunk {} hash mismatch via relay", task.index));
                            }
                            Ok(Err(e)) => {
                                debug!(
                                    "worker {} relay to {} failed: {}",
                                    self.id, peer.peer.peer_id, e
                                );
                                self.record_failure(&peer.peer.peer_id).await;
                                last_err = Some(e.to_string());
                            }
                            Err(_) => {
                                self.record_failure(&peer.peer.peer_id).await;
                                last_err = Some(format!(
                                    "relay request for chunk {} timed out",
                                    task.index
                                ));
                            }
                        }
                    }
                }
            }

            let latency = started.elapsed();

            let (Some(bytes), Some(source)) = (data, source) else {
                let message =
                    last_err.unwrap_or_else(|| format!("chunk {} unavailable", task.index));
                warn!("worker {} gave up on chunk {}: {}", self.id, task.index, message);
                let mut stats = self.stats.write().await;
                stats.failed_chunks += 1;
                drop(stats);
                let _ = results
                    .send(ChunkResult {
                        index: task.index,
                        size: 0,
                        err: Some(message),
                    })
                    .await;
                continue;
            };

            if let Some(bandwidth) = &self.bandwidth {
                bandwidth.acquire_download(bytes.len() as u64).await;
            }

            let chunk_path = self.state.chunk_path(task.index);
            if let Err(e) = tokio::fs::write(&chunk_path, &bytes).await {
                let message = format!("failed to persist chunk {}: {}", task.index, e);
                let _ = results
                    .send(ChunkResult {
                        index: task.index,
                        size: 0,
                        err: Some(message),
                    })
                    .await;
                continue;
            }

            if let Err(e) = self.store.mark_chunk_received(&self.metadata.hash, task.index).await {
                warn!("worker {} failed to record chunk {}: {}", self.id, task.index, e);
            }

            let mut stats = self.stats.write().await;
            stats.scores.record_success(&source, bytes.len() as u64, latency);
            stats.downloaded_chunks += 1;
            stats.bytes_downloaded += bytes.len() as u64;
            let progress = stats.progress();
            drop(stats);

            debug!(
                "worker {} chunk {}/{} ({:.1}%) from {} in {:?}",
                self.id,
                task.index + 1,
                self.metadata.chunks.len(),
                progress,
                source,
                latency
            );

            let _ = results
                .send(ChunkResult {
                    index: task.index,
                    size: bytes.len() as u64,
                    err: None,
                })
                .await;
        }

        if let Some(mut conn) = conn {
            conn.close();
        }
        debug!("worker {} finished", self.id);
    }

    /// Whether the relay transport is attached and live
    fn relay_ready(&self) -> bool {
        self.relay.as_ref().map(|r| r.is_connected()).unwrap_or(false)
    }

    async fn state_chunk_received(&self, index: usize) -> bool {
        self.store
            .download(&self.metadata.hash)
            .await
            .map(|state| state.chunks_received.get(index).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    async fn record_failure(&self, peer_id: &str) {
        let mut stats = self.stats.write().await;
        stats.scores.record_failure(peer_id);
    }
}
