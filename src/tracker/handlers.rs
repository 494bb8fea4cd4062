//! Tracker HTTP handlers
//!
//! Thin translation between the HTTP surface and the repository. Errors
//! become `{error: message}` JSON with the matching status code. Peers
//! registering from localhost get their address substituted with the
//! HTTP source, trusting the `X-Forwarded-For` chain.

use crate::config::TrackerConfig;
use crate::error::SwarmError;
use crate::magnet::Magnet;
use crate::protocol::{
    AnnounceRequest, AnnounceResponse, GetPeersResponse, HeartbeatRequest, HeartbeatResponse,
    ListFilesResponse, RegisterRequest, RegisterResponse,
};
use crate::tracker::models::{File, FilePeer, Peer};
use crate::tracker::repository::Repository;
use crate::tracker::ws_hub::{events, WsEvent};
use crate::tracker::{Metrics, RelayHub, WsHub};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Maximum message accepted on a relay session
const RELAY_MAX_MESSAGE: usize = 1024 * 1024;

/// Shared state behind every handler
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub ws_hub: Arc<WsHub>,
    pub relay_hub: Arc<RelayHub>,
    pub metrics: Arc<Metrics>,
    pub config: TrackerConfig,
}

/// Handler-level error carrying an HTTP status
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<SwarmError>() {
            Some(e) if e.is_not_found() => ApiError::not_found(e.to_string()),
            _ => ApiError::internal(err.to_string()),
        }
    }
}

/// Pick the client IP: `X-Forwarded-For` first element, then `X-Real-IP`,
/// then the socket address.
fn real_ip(headers: &HeaderMap, remote: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !real.is_empty() {
            return real.to_string();
        }
    }
    remote.ip().to_string()
}

fn is_local_ip(ip: &str) -> bool {
    ip.is_empty() || ip == "127.0.0.1" || ip == "::1" || ip == "localhost"
}

// === Peer endpoints ===

/// `POST /api/peers/register`
pub async fn register_peer(
    State(state): State<Arc<AppState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    state.metrics.record_request();
    state.metrics.record_register();

    let ip = if is_local_ip(&req.ip) {
        real_ip(&headers, remote)
    } else {
        req.ip.clone()
    };

    let peer = Peer::new(&req.peer_id, ip.clone(), req.port, req.hostname.clone());
    state
        .repo
        .register_peer(peer)
        .await
        .map_err(|_| ApiError::internal("failed to register peer"))?;

    info!("registered peer {} at {}:{}", req.peer_id, ip, req.port);
    state.ws_hub.broadcast(WsEvent::new(
        events::PEER_JOINED,
        json!({
            "peer_id": req.peer_id,
            "hostname": req.hostname,
            "ip": ip,
        }),
    ));

    Ok(Json(RegisterResponse {
        success: true,
        message: "registered successfully".to_string(),
        session_token: None,
    }))
}

/// `POST /api/peers/heartbeat`
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    state.metrics.record_request();
    state.metrics.record_heartbeat();

    state
        .repo
        .update_heartbeat(&req.peer_id)
        .await
        .map_err(|_| ApiError::internal("failed to update heartbeat"))?;

    Ok(Json(HeartbeatResponse {
        success: true,
        next_heartbeat_in: state.config.heartbeat_secs,
    }))
}

/// `DELETE /api/peers/:peer_id`
pub async fn leave_peer(
    State(state): State<Arc<AppState>>,
    Path(peer_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.record_request();
    if peer_id.is_empty() {
        return Err(ApiError::bad_request("peer id required"));
    }

    state
        .repo
        .remove_peer(&peer_id)
        .await
        .map_err(|_| ApiError::internal("failed to remove peer"))?;

    state.ws_hub.broadcast(WsEvent::new(
        events::PEER_LEFT,
        json!({ "peer_id": peer_id }),
    ));
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct TopPeersQuery {
    pub limit: Option<usize>,
}

/// `GET /api/peers/top?limit=`
pub async fn top_peers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TopPeersQuery>,
) -> Json<serde_json::Value> {
    state.metrics.record_request();
    let limit = query.limit.filter(|l| *l > 0 && *l <= 100).unwrap_or(10);
    let peers = state.repo.get_top_peers(limit).await;

    let rows: Vec<serde_json::Value> = peers
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "hostname": p.hostname,
                "reputation": p.reputation,
                "bytes_uploaded": p.bytes_uploaded,
                "bytes_downloaded": p.bytes_downloaded,
                "files_shared": p.files_shared,
                "ratio": p.ratio(),
            })
        })
        .collect();

    Json(json!({ "count": rows.len(), "peers": rows }))
}

#[derive(Debug, Deserialize)]
pub struct ReportStatsRequest {
    pub peer_id: String,
    #[serde(default)]
    pub bytes_uploaded: u64,
    #[serde(default)]
    pub bytes_downloaded: u64,
}

/// `POST /api/peers/stats`
pub async fn report_stats(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReportStatsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.record_request();
    if req.peer_id.is_empty() {
        return Err(ApiError::bad_request("peer_id is required"));
    }

    state
        .repo
        .update_peer_stats(&req.peer_id, req.bytes_uploaded, req.bytes_downloaded)
        .await
        .map_err(|_| ApiError::internal("failed to update stats"))?;
    Ok(Json(json!({ "success": true })))
}

// === File endpoints ===

/// `POST /api/files/announce`
pub async fn announce_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnnounceRequest>,
) -> Result<Json<AnnounceResponse>, ApiError> {
    state.metrics.record_request();
    state.metrics.record_announce();

    if req.file.hash.is_empty() {
        return Err(ApiError::bad_request("file hash required"));
    }

    let file = File {
        id: req.file.hash.clone(),
        hash: req.file.hash.clone(),
        name: req.file.name.clone(),
        size: req.file.size,
        chunk_size: req.file.chunk_size,
        chunks: req.file.chunks.clone(),
        category: String::new(),
        tags: vec![],
        added_at: Utc::now(),
        added_by: req.peer_id.clone(),
    };
    state
        .repo
        .add_file(file)
        .await
        .map_err(|_| ApiError::internal("failed to add file"))?;

    // The announcer holds every chunk
    let file_peer = FilePeer {
        file_hash: req.file.hash.clone(),
        peer_id: req.peer_id.clone(),
        chunks_available: (0..req.file.chunks.len()).collect(),
        is_seeder: true,
        added_at: Utc::now(),
        last_updated: Utc::now(),
    };
    state
        .repo
        .add_file_peer(file_peer)
        .await
        .map_err(|_| ApiError::internal("failed to link peer to file"))?;

    info!("{} announced {} ({} chunks)", req.peer_id, req.file.name, req.file.chunks.len());
    state.ws_hub.broadcast(WsEvent::new(
        events::FILE_ADDED,
        json!({
            "hash": req.file.hash.clone(),
            "name": req.file.name.clone(),
            "size": req.file.size,
            "added_by": req.peer_id.clone(),
        }),
    ));

    Ok(Json(AnnounceResponse {
        success: true,
        file_id: Some(req.file.hash),
        message: None,
    }))
}

/// `GET /api/files`
pub async fn list_files(State(state): State<Arc<AppState>>) -> Json<ListFilesResponse> {
    state.metrics.record_request();
    Json(ListFilesResponse {
        files: state.repo.list_files().await,
    })
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// `GET /api/files/search?q=`
pub async fn search_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.record_request();
    let q = query
        .q
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::bad_request("query parameter 'q' is required"))?;

    let files = state.repo.search_files(&q).await;
    Ok(Json(json!({
        "query": q,
        "count": files.len(),
        "files": files,
    })))
}

/// `GET /api/files/:hash/peers`
pub async fn get_file_peers(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<GetPeersResponse>, ApiError> {
    state.metrics.record_request();
    state.metrics.record_peer_query();

    let file = state
        .repo
        .get_file(&hash)
        .await
        .ok_or_else(|| ApiError::not_found("file not found"))?;
    let peers = state.repo.get_peers_for_file(&hash).await;

    debug!("swarm query for {}: {} online peers", hash, peers.len());
    Ok(Json(GetPeersResponse {
        file_hash: file.hash,
        file_name: file.name,
        file_size: file.size,
        chunk_count: file.chunks.len(),
        chunk_size: file.chunk_size,
        chunks: file.chunks,
        peers,
    }))
}

/// `GET /api/files/:hash/magnet`
pub async fn get_magnet(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.record_request();

    let file = state
        .repo
        .get_file(&hash)
        .await
        .ok_or_else(|| ApiError::not_found("file not found"))?;
    let peers = state.repo.get_peers_for_file(&hash).await;
    let seeder_count = peers.iter().filter(|p| p.is_seeder).count();

    let magnet = Magnet::new(&file.hash, &file.name, file.size)
        .with_tracker(&state.config.public_url)
        .with_chunk_info(file.chunk_size, file.chunks.len());

    Ok(Json(json!({
        "magnet": magnet.to_uri(),
        "file": {
            "hash": file.hash,
            "name": file.name,
            "size": file.size,
        },
        "seeder_count": seeder_count,
    })))
}

/// `GET /api/categories`
pub async fn list_categories(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.metrics.record_request();
    let categories = state.repo.list_categories().await;
    Json(json!({ "count": categories.len(), "categories": categories }))
}

/// `GET /api/categories/:category/files`
pub async fn list_files_by_category(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.record_request();
    if category.is_empty() {
        return Err(ApiError::bad_request("category is required"));
    }

    let files = state.repo.list_files_by_category(&category).await;
    Ok(Json(json!({
        "category": category,
        "count": files.len(),
        "files": files,
    })))
}

// === Admin endpoints ===

/// `GET /api/admin/peers`
pub async fn admin_list_peers(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.metrics.record_request();
    let peers = state.repo.list_all_peers().await;

    let rows: Vec<serde_json::Value> = peers
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "ip": p.ip,
                "port": p.port,
                "hostname": p.hostname,
                "is_online": p.is_online,
                "registered_at": p.registered_at,
                "last_seen": p.last_seen,
            })
        })
        .collect();
    Json(json!({ "count": rows.len(), "peers": rows }))
}

/// `DELETE /api/admin/peers/:peer_id`
pub async fn admin_kick_peer(
    State(state): State<Arc<AppState>>,
    Path(peer_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.record_request();

    if state.repo.get_peer(&peer_id).await.is_none() {
        return Err(ApiError::not_found("peer not found"));
    }
    state
        .repo
        .remove_peer(&peer_id)
        .await
        .map_err(|_| ApiError::internal("failed to kick peer"))?;

    Ok(Json(json!({
        "message": "peer kicked successfully",
        "peer_id": peer_id,
    })))
}

/// `DELETE /api/admin/files/:hash`
pub async fn admin_delete_file(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.metrics.record_request();

    if state.repo.get_file(&hash).await.is_none() {
        return Err(ApiError::not_found("file not found"));
    }
    state
        .repo
        .delete_file(&hash)
        .await
        .map_err(|_| ApiError::internal("failed to delete file"))?;

    Ok(Json(json!({
        "message": "file deleted successfully",
        "hash": hash,
    })))
}

// === Health, metrics, websockets ===

/// `GET /health`
pub async fn health() -> &'static str {
    "OK"
}

/// `GET /metrics`
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let stats = state.repo.get_stats().await;
    let relay_peers = state.relay_hub.connected_peers().await.len();
    let snapshot = state.metrics.snapshot(stats, relay_peers);
    Json(serde_json::to_value(snapshot).unwrap_or_else(|_| json!({})))
}

/// `GET /api/relay/peers`
pub async fn relay_peers(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.metrics.record_request();
    let peers = state.relay_hub.connected_peers().await;
    Json(json!({ "count": peers.len(), "peers": peers }))
}

/// `GET /ws` — dashboard event stream
pub async fn dashboard_ws(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        state.ws_hub.serve_client(socket).await;
    })
}

#[derive(Debug, Deserialize)]
pub struct RelayQuery {
    pub peer_id: Option<String>,
}

/// `GET /relay?peer_id=` — relay session
pub async fn relay_ws(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RelayQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let peer_id = query
        .peer_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::bad_request("peer_id required"))?;

    Ok(ws
        .max_message_size(RELAY_MAX_MESSAGE)
        .on_upgrade(move |socket| async move {
            state.relay_hub.serve_session(socket, peer_id).await;
        }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "203.0.113.7:51000".parse().unwrap()
    }

    #[test]
    fn test_real_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "198.51.100.4, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "198.51.100.9".parse().unwrap());
        assert_eq!(real_ip(&headers, addr()), "198.51.100.4");
    }

    #[test]
    fn test_real_ip_falls_back_to_real_ip_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.9".parse().unwrap());
        assert_eq!(real_ip(&headers, addr()), "198.51.100.9");
    }

    #[test]
    fn test_real_ip_falls_back_to_socket() {
        let headers = HeaderMap::new();
        assert_eq!(real_ip(&headers, addr()), "203.0.113.7");
    }

    #[test]
    fn test_is_local_ip() {
        assert!(is_local_ip(""));
        assert!(is_local_ip("127.0.0.1"));
        assert!(is_local_ip("localhost"));
        assert!(is_local_ip("::1"));
        assert!(!is_local_ip("203.0.113.7"));
    }
}
