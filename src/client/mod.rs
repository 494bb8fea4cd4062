//! Tracker client
//!
//! Peer-side HTTP client for the tracker API: registration, heartbeats,
//! announces, and swarm queries.

use crate::error::SwarmError;
use crate::protocol::{
    AnnounceRequest, AnnounceResponse, FileMetadata, GetPeersResponse, HeartbeatRequest,
    HeartbeatResponse, ListFilesResponse, RegisterRequest, RegisterResponse,
};
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Default HTTP timeout for tracker calls
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client bound to one tracker and one peer identity
#[derive(Debug, Clone)]
pub struct TrackerClient {
    base_url: String,
    peer_id: String,
    http: reqwest::Client,
}

impl TrackerClient {
    /// Create a client for `peer_id` against `tracker_url`
    pub fn new(tracker_url: impl Into<String>, peer_id: impl Into<String>) -> Self {
        let base_url = tracker_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url,
            peer_id: peer_id.into(),
            http,
        }
    }

    /// Our peer id
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// The tracker base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register this peer with the tracker
    pub async fn register(&self, ip: &str, port: u16) -> Result<RegisterResponse> {
        let req = RegisterRequest {
            peer_id: self.peer_id.clone(),
            ip: ip.to_string(),
            port,
            hostname: None,
        };
        self.post("/api/peers/register", &req).await
    }

    /// Refresh our liveness; `file_hashes` lists what we currently share
    pub async fn heartbeat(&self, file_hashes: Vec<String>) -> Result<HeartbeatResponse> {
        let req = HeartbeatRequest {
            peer_id: self.peer_id.clone(),
            files_hashes: file_hashes,
        };
        self.post("/api/peers/heartbeat", &req).await
    }

    /// Tell the tracker we are leaving
    pub async fn leave(&self) -> Result<()> {
        let url = format!("{}/api/peers/{}", self.base_url, self.peer_id);
        let resp = self.http.delete(&url).send().await.map_err(SwarmError::from)?;
        if !resp.status().is_success() {
            return Err(SwarmError::transport_with_address(
                format!("leave failed with status {}", resp.status()),
                url,
            )
            .into());
        }
        Ok(())
    }

    /// Announce a file we are sharing
    pub async fn announce_file(&self, file: &FileMetadata) -> Result<AnnounceResponse> {
        let req = AnnounceRequest {
            peer_id: self.peer_id.clone(),
            file: file.clone(),
        };
        debug!("announcing {} to {}", file.name, self.base_url);
        self.post("/api/files/announce", &req).await
    }

    /// All files the tracker knows about
    pub async fn list_files(&self) -> Result<ListFilesResponse> {
        self.get("/api/files").await
    }

    /// Metadata and online peers for a file
    pub async fn get_peers(&self, file_hash: &str) -> Result<GetPeersResponse> {
        self.get(&format!("/api/files/{}/peers", file_hash)).await
    }

    /// Case-insensitive name search
    pub async fn search_files(&self, query: &str) -> Result<serde_json::Value> {
        let url = format!("{}/api/files/search", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(SwarmError::from)?;
        Self::decode(url, resp).await
    }

    /// Report transfer volume for reputation
    pub async fn report_stats(&self, bytes_uploaded: u64, bytes_downloaded: u64) -> Result<()> {
        let body = serde_json::json!({
            "peer_id": self.peer_id,
            "bytes_uploaded": bytes_uploaded,
            "bytes_downloaded": bytes_downloaded,
        });
        let _: serde_json::Value = self.post("/api/peers/stats", &body).await?;
        Ok(())
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(SwarmError::from)?;
        Self::decode(url, resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.http.get(&url).send().await.map_err(SwarmError::from)?;
        Self::decode(url, resp).await
    }

    async fn decode<T: DeserializeOwned>(url: String, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SwarmError::not_found_resource("tracker returned 404", url).into());
        }
        if !status.is_success() {
            return Err(SwarmError::transport_with_address(
                format!("request failed with status {}", status),
                url,
            )
            .into());
        }
        let value = resp.json::<T>().await.map_err(|e| {
            SwarmError::protocol_with_source("malformed tracker response", e.to_string())
        })?;
        Ok(value)
    }
}
