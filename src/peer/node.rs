//! Peer node
//!
//! Ties one peer's components together: the local store, the serving
//! side, the tracker client with its heartbeat loop, the optional relay
//! session, and the download engine. The embedding driver constructs a
//! [`PeerNode`], starts it, and calls `share_file` / `download` as the
//! user asks.

use crate::client::TrackerClient;
use crate::config::PeerConfig;
use crate::content::Chunker;
use crate::engine::Downloader;
use crate::error::SwarmError;
use crate::peer::{P2pClient, PeerServer};
use crate::relay::{RelayClient, StoreChunkProvider};
use crate::storage::LocalStore;
use crate::throttle::BandwidthManager;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// One running peer
pub struct PeerNode {
    config: PeerConfig,
    store: Arc<LocalStore>,
    tracker: Arc<TrackerClient>,
    relay: Option<RelayClient>,
    bandwidth: Arc<BandwidthManager>,
    chunker: Chunker,
    /// Port actually bound by the serving side, once started
    listen_port: Option<u16>,
    shutdown_tx: watch::Sender<bool>,
}

impl PeerNode {
    /// Build a node from its configuration; nothing starts yet
    pub async fn new(config: PeerConfig) -> Result<Self> {
        config.validate().context("invalid peer configuration")?;

        let store = Arc::new(LocalStore::open(&config.base_dir).await?);
        let tracker = Arc::new(TrackerClient::new(&config.tracker_url, &config.peer_id));
        let bandwidth = Arc::new(BandwidthManager::new(
            config.upload_limit,
            config.download_limit,
        ));

        let relay = if config.use_relay {
            let relay = RelayClient::new(&config.peer_id, &config.tracker_url);
            relay.set_chunk_provider(Arc::new(StoreChunkProvider::new(Arc::clone(&store))));
            Some(relay)
        } else {
            None
        };

        let chunker = Chunker::new(config.chunk_size);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            tracker,
            relay,
            bandwidth,
            chunker,
            listen_port: None,
            shutdown_tx,
        })
    }

    /// Start serving, register with the tracker, connect the relay, and
    /// spawn the heartbeat loop.
    pub async fn start(&mut self, advertised_ip: &str) -> Result<u16> {
        let server = PeerServer::new(
            &self.config.peer_id,
            Arc::clone(&self.store),
            self.config.listen_port,
        )
        .with_bandwidth(Arc::clone(&self.bandwidth));
        let port = server.start().await?;
        self.listen_port = Some(port);

        let reply = self
            .tracker
            .register(advertised_ip, port)
            .await
            .context("failed to register with tracker")?;
        if !reply.success {
            return Err(SwarmError::transport_with_address(
                format!("tracker rejected registration: {}", reply.message),
                self.config.tracker_url.clone(),
            )
            .into());
        }
        info!(
            "peer {} registered with {} (listening on {})",
            self.config.peer_id, self.config.tracker_url, port
        );

        if let Some(relay) = &self.relay {
            if let Err(e) = relay.connect().await {
                // A peer without relay can still serve and fetch directly
                warn!("relay connection failed: {}", e);
            }
        }

        self.spawn_heartbeat();

        // Re-announce whatever we already share, so a restarted peer
        // reappears in its swarms
        for hash in self.store.shared_hashes().await {
            if let Some(shared) = self.store.shared_file(&hash).await {
                if let Err(e) = self.tracker.announce_file(&shared.metadata).await {
                    warn!("failed to re-announce {}: {}", shared.metadata.name, e);
                }
            }
        }

        Ok(port)
    }

    /// Heartbeat on the tracker's cadence until shutdown
    fn spawn_heartbeat(&self) {
        let tracker = Arc::clone(&self.tracker);
        let store = Arc::clone(&self.store);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = Duration::from_secs(30);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let hashes = store.shared_hashes().await;
                        match tracker.heartbeat(hashes).await {
                            Ok(reply) if reply.next_heartbeat_in > 0 => {
                                interval = Duration::from_secs(reply.next_heartbeat_in);
                            }
                            Ok(_) => {}
                            Err(e) => debug!("heartbeat failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("heartbeat loop stopping");
                        return;
                    }
                }
            }
        });
    }

    /// Chunk a file, register it as shared, and announce it
    ///
    /// Sharing the same path twice re-announces the same hash; the store
    /// entry is idempotent.
    pub async fn share_file(&self, path: impl AsRef<Path>) -> Result<crate::protocol::FileMetadata> {
        let path = path.as_ref();
        if self.store.is_path_shared(path).await {
            debug!("{} is already shared, re-announcing", path.display());
        }

        let metadata = self.chunker.chunk_file(path).await?;
        self.store.add_shared_file(&metadata, path).await?;

        let reply = self.tracker.announce_file(&metadata).await?;
        info!(
            "sharing {} ({} chunks, file id {})",
            metadata.name,
            metadata.chunks.len(),
            reply.file_id.as_deref().unwrap_or("-")
        );
        Ok(metadata)
    }

    /// Fetch the swarm for `file_hash` and download it
    pub async fn download(&self, file_hash: &str) -> Result<()> {
        let swarm = self.tracker.get_peers(file_hash).await?;
        if swarm.peers.is_empty() {
            return Err(SwarmError::not_found_resource(
                "no peers available for this file",
                file_hash,
            )
            .into());
        }

        let mut engine = Downloader::new(
            Arc::clone(&self.store),
            P2pClient::new(&self.config.peer_id),
        )
        .with_tracker(Arc::clone(&self.tracker))
        .with_bandwidth(Arc::clone(&self.bandwidth))
        .with_config(
            self.config.max_workers,
            3,
            Duration::from_secs(30),
        );
        if let Some(relay) = &self.relay {
            engine = engine.with_relay(relay.clone());
        }

        engine.download_file(&swarm).await?;
        Ok(())
    }

    /// Tell the tracker goodbye and stop background work
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(relay) = &self.relay {
            relay.close();
        }
        if let Err(e) = self.tracker.leave().await {
            debug!("leave failed during shutdown: {}", e);
        }
        info!("peer {} shut down", self.config.peer_id);
    }

    /// The local store backing this node
    pub fn store(&self) -> Arc<LocalStore> {
        Arc::clone(&self.store)
    }

    /// The tracker client bound to this node's identity
    pub fn tracker(&self) -> Arc<TrackerClient> {
        Arc::clone(&self.tracker)
    }

    /// Lifetime transfer totals
    pub fn bandwidth_totals(&self) -> crate::throttle::BandwidthTotals {
        self.bandwidth.totals()
    }

    /// The bound listen port, once started
    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }
}
