//! Tracker server
//!
//! Wires the repository, hubs, metrics, and routes together; runs the
//! periodic sweep that marks peers offline, deletes long-gone peers,
//! collects orphan files, and pushes stats to dashboard clients.

use crate::config::TrackerConfig;
use crate::tracker::handlers::{self, AppState};
use crate::tracker::repository::Repository;
use crate::tracker::ws_hub::{events, WsEvent};
use crate::tracker::{MemoryRepository, Metrics, RelayHub, WsHub};
use anyhow::Result;
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

/// The tracker service
pub struct TrackerServer {
    state: Arc<AppState>,
    shutdown_tx: watch::Sender<bool>,
}

impl TrackerServer {
    /// Create a tracker with the bundled in-memory repository
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_repository(config, Arc::new(MemoryRepository::new()))
    }

    /// Create a tracker over any repository implementation
    pub fn with_repository(config: TrackerConfig, repo: Arc<dyn Repository>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let state = Arc::new(AppState {
            repo,
            ws_hub: Arc::new(WsHub::new()),
            relay_hub: Arc::new(RelayHub::new()),
            metrics: Arc::new(Metrics::new()),
            config,
        });
        Self { state, shutdown_tx }
    }

    /// Shared handler state, for embedding and tests
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Signal the sweep and stats tasks to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Build the full route table
    pub fn router(state: Arc<AppState>) -> Router {
        Router::new()
            // Peer endpoints
            .route("/api/peers/register", post(handlers::register_peer))
            .route("/api/peers/heartbeat", post(handlers::heartbeat))
            .route("/api/peers/top", get(handlers::top_peers))
            .route("/api/peers/stats", post(handlers::report_stats))
            .route("/api/peers/:peer_id", delete(handlers::leave_peer))
            // File endpoints
            .route("/api/files/announce", post(handlers::announce_file))
            .route("/api/files", get(handlers::list_files))
            .route("/api/files/search", get(handlers::search_files))
            .route("/api/files/:hash/peers", get(handlers::get_file_peers))
            .route("/api/files/:hash/magnet", get(handlers::get_magnet))
            // Category endpoints
            .route("/api/categories", get(handlers::list_categories))
            .route(
                "/api/categories/:category/files",
                get(handlers::list_files_by_category),
            )
            // Admin endpoints
            .route("/api/admin/peers", get(handlers::admin_list_peers))
            .route("/api/admin/peers/:peer_id", delete(handlers::admin_kick_peer))
            .route("/api/admin/files/:hash", delete(handlers::admin_delete_file))
            // Relay status
            .route("/api/relay/peers", get(handlers::relay_peers))
            // Health and metrics
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics))
            // WebSockets
            .route("/ws", get(handlers::dashboard_ws))
            .route("/relay", get(handlers::relay_ws))
            .with_state(state)
    }

    /// Bind `config.addr` and serve until the process ends
    pub async fn run(self) -> Result<()> {
        let addr = self.state.config.addr.clone();
        let listener = TcpListener::bind(&addr).await?;
        info!("tracker listening on {}", addr);
        self.serve(listener).await
    }

    /// Serve on an already-bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.start_background_tasks();

        let router = Self::router(Arc::clone(&self.state));
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }

    /// Start the relay hub loop, the sweep, and the stats broadcast
    pub fn start_background_tasks(&self) {
        let hub_state = Arc::clone(&self.state);
        tokio::spawn(async move {
            hub_state.relay_hub.run().await;
        });

        let sweep_state = Arc::clone(&self.state);
        let mut sweep_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(sweep_state.config.sweep_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.reset();
            loop {
                tokio::select! {
                    _ = tick.tick() => sweep(&sweep_state).await,
                    _ = sweep_shutdown.changed() => {
                        debug!("sweep task stopping");
                        return;
                    }
                }
            }
        });

        let stats_state = Arc::clone(&self.state);
        let mut stats_shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(stats_state.config.stats_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.reset();
            loop {
                tokio::select! {
                    _ = tick.tick() => broadcast_stats(&stats_state).await,
                    _ = stats_shutdown.changed() => {
                        debug!("stats broadcast stopping");
                        return;
                    }
                }
            }
        });
    }
}

/// One sweep pass: offline marking, stale deletion, orphan collection,
/// then a stats push.
async fn sweep(state: &AppState) {
    let offline_after = chrono::Duration::from_std(state.config.peer_timeout)
        .unwrap_or_else(|_| chrono::Duration::seconds(90));
    let delete_after = chrono::Duration::from_std(state.config.peer_delete_timeout)
        .unwrap_or_else(|_| chrono::Duration::seconds(300));

    state.repo.cleanup_offline_peers(offline_after).await;

    let deleted_peers = state.repo.delete_offline_peers(delete_after).await;
    if deleted_peers > 0 {
        info!("sweep deleted {} long-offline peers", deleted_peers);
    }

    let deleted_files = state.repo.delete_orphan_files().await;
    if deleted_files > 0 {
        info!("sweep deleted {} files with no online peers", deleted_files);
    }

    broadcast_stats(state).await;
}

/// Push a stats snapshot to every dashboard client
async fn broadcast_stats(state: &AppState) {
    let stats = state.repo.get_stats().await;
    let relay_peers = state.relay_hub.connected_peers().await.len();

    state.ws_hub.broadcast(WsEvent::new(
        events::STATS_UPDATE,
        json!({
            "peers_online": stats.peers_online,
            "peers_total": stats.peers_total,
            "files_count": stats.files_count,
            "relay_peers": relay_peers,
            "ws_clients": state.ws_hub.client_count(),
        }),
    ));
}
