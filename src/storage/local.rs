//! Local store
//!
//! Two maps keyed by file hash — shared files and downloads — persisted
//! as one JSON snapshot on every state-changing operation. The snapshot
//! is written to a temp file and renamed so a crash never leaves a torn
//! `state.json`.

use crate::error::SwarmError;
use crate::protocol::FileMetadata;
use crate::storage::{DownloadState, DownloadStatus};
use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A file this peer serves to the swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedFile {
    pub metadata: FileMetadata,
    pub file_path: PathBuf,
}

/// The persisted shape of the store
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    shared_files: HashMap<String, SharedFile>,
    downloads: HashMap<String, DownloadState>,
}

/// Thread-safe local storage for one peer
pub struct LocalStore {
    base_dir: PathBuf,
    state_file: PathBuf,
    inner: RwLock<PersistedState>,
}

impl LocalStore {
    /// Open (or initialize) a store rooted at `base_dir`
    ///
    /// Creates the `shared/`, `downloads/`, and `temp/` directories and
    /// loads any previous `state.json`. Downloads that were `active` when
    /// the process died come back as `paused` so the next run resumes them.
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        for sub in ["shared", "downloads", "temp"] {
            tokio::fs::create_dir_all(base_dir.join(sub)).await.map_err(|e| {
                SwarmError::storage_full(
                    "failed to create storage directory",
                    base_dir.join(sub).display().to_string(),
                    e.to_string(),
                )
            })?;
        }

        let state_file = base_dir.join("state.json");
        let state = match tokio::fs::read(&state_file).await {
            Ok(bytes) => {
                let mut state: PersistedState = serde_json::from_slice(&bytes).map_err(|e| {
                    SwarmError::storage_full(
                        "corrupt state file",
                        state_file.display().to_string(),
                        e.to_string(),
                    )
                })?;
                let mut demoted = 0;
                for download in state.downloads.values_mut() {
                    if download.status == DownloadStatus::Active {
                        download.status = DownloadStatus::Paused;
                        download.paused_at = Some(Utc::now());
                        demoted += 1;
                    }
                }
                if demoted > 0 {
                    info!("paused {} downloads left active by a previous run", demoted);
                }
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => {
                return Err(SwarmError::storage_full(
                    "failed to read state file",
                    state_file.display().to_string(),
                    e.to_string(),
                )
                .into())
            }
        };

        Ok(Self {
            base_dir,
            state_file,
            inner: RwLock::new(state),
        })
    }

    /// The store's base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    // === Shared files ===

    /// Register a file as shared; idempotent by `metadata.hash`
    pub async fn add_shared_file(
        &self,
        metadata: &FileMetadata,
        file_path: impl Into<PathBuf>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.shared_files.insert(
            metadata.hash.clone(),
            SharedFile {
                metadata: metadata.clone(),
                file_path: file_path.into(),
            },
        );
        self.persist(&inner).await
    }

    /// Look up a shared file by hash
    pub async fn shared_file(&self, hash: &str) -> Option<SharedFile> {
        self.inner.read().await.shared_files.get(hash).cloned()
    }

    /// Hashes of every shared file
    pub async fn shared_hashes(&self) -> Vec<String> {
        self.inner.read().await.shared_files.keys().cloned().collect()
    }

    /// Whether a path is already registered as shared
    pub async fn is_path_shared(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.inner
            .read()
            .await
            .shared_files
            .values()
            .any(|shared| shared.file_path == path)
    }

    // === Downloads ===

    /// Create a new download or resume an existing one
    ///
    /// A `paused` or `failed` download flips back to `active` keeping its
    /// bitmap; an already-`active` download is returned as is.
    pub async fn start_download(&self, metadata: &FileMetadata) -> Result<DownloadState> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.downloads.get_mut(&metadata.hash) {
            match existing.status {
                DownloadStatus::Paused | DownloadStatus::Failed => {
                    existing.status = DownloadStatus::Active;
                    existing.paused_at = None;
                    debug!(
                        "resuming download of {} ({}/{} chunks)",
                        metadata.name,
                        existing.received_count(),
                        existing.chunks_received.len()
                    );
                    let state = existing.clone();
                    self.persist(&inner).await?;
                    return Ok(state);
                }
                DownloadStatus::Active => return Ok(existing.clone()),
                _ => {}
            }
        }

        let temp_dir = self.base_dir.join("temp").join(&metadata.hash);
        let output_path = self.base_dir.join("downloads").join(&metadata.name);
        tokio::fs::create_dir_all(&temp_dir).await.map_err(|e| {
            SwarmError::storage_full(
                "failed to create temp directory",
                temp_dir.display().to_string(),
                e.to_string(),
            )
        })?;

        let state = DownloadState::new(metadata.clone(), temp_dir, output_path);
        inner.downloads.insert(metadata.hash.clone(), state.clone());
        self.persist(&inner).await?;
        Ok(state)
    }

    /// Look up a download by file hash
    pub async fn download(&self, hash: &str) -> Option<DownloadState> {
        self.inner.read().await.downloads.get(hash).cloned()
    }

    /// Mark a chunk received; set-once, out-of-range indices are ignored
    pub async fn mark_chunk_received(&self, hash: &str, index: usize) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.downloads.get_mut(hash) {
            if index < state.chunks_received.len() && !state.chunks_received[index] {
                state.chunks_received[index] = true;
                self.persist(&inner).await?;
            }
        }
        Ok(())
    }

    /// Whether every chunk of a download has been received
    pub async fn is_download_complete(&self, hash: &str) -> bool {
        self.inner
            .read()
            .await
            .downloads
            .get(hash)
            .map(|state| state.is_complete())
            .unwrap_or(false)
    }

    /// Indices of chunks still missing; empty when unknown
    pub async fn missing_chunks(&self, hash: &str) -> Vec<usize> {
        self.inner
            .read()
            .await
            .downloads
            .get(hash)
            .map(|state| state.missing_chunks())
            .unwrap_or_default()
    }

    /// Completion percentage for a download
    pub async fn download_progress(&self, hash: &str) -> Result<f64> {
        self.inner
            .read()
            .await
            .downloads
            .get(hash)
            .map(|state| state.progress())
            .ok_or_else(|| SwarmError::DownloadNotFound.into())
    }

    /// Record bytes downloaded so far
    pub async fn update_download_progress(&self, hash: &str, bytes_downloaded: u64) {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.downloads.get_mut(hash) {
            state.bytes_downloaded = bytes_downloaded;
        }
    }

    /// All downloads, in no particular order
    pub async fn list_downloads(&self) -> Vec<DownloadState> {
        self.inner.read().await.downloads.values().cloned().collect()
    }

    /// Downloads currently paused
    pub async fn paused_downloads(&self) -> Vec<DownloadState> {
        self.inner
            .read()
            .await
            .downloads
            .values()
            .filter(|state| state.status == DownloadStatus::Paused)
            .cloned()
            .collect()
    }

    // === Status transitions ===

    /// Pause an active download
    pub async fn pause_download(&self, hash: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let state = inner
            .downloads
            .get_mut(hash)
            .ok_or(SwarmError::DownloadNotFound)?;

        if state.status != DownloadStatus::Active {
            return Err(SwarmError::DownloadNotActive.into());
        }

        state.status = DownloadStatus::Paused;
        state.paused_at = Some(Utc::now());
        self.persist(&inner).await
    }

    /// Resume a paused or failed download
    pub async fn resume_download(&self, hash: &str) -> Result<DownloadState> {
        let mut inner = self.inner.write().await;
        let state = inner
            .downloads
            .get_mut(hash)
            .ok_or(SwarmError::DownloadNotFound)?;

        if state.status != DownloadStatus::Paused && state.status != DownloadStatus::Failed {
            return Err(SwarmError::DownloadNotPaused.into());
        }

        state.status = DownloadStatus::Active;
        state.paused_at = None;
        let resumed = state.clone();
        self.persist(&inner).await?;
        Ok(resumed)
    }

    /// Cancel a download, removing its temp directory and record
    pub async fn cancel_download(&self, hash: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let state = inner
            .downloads
            .get_mut(hash)
            .ok_or(SwarmError::DownloadNotFound)?;

        state.status = DownloadStatus::Cancelled;
        let temp_dir = state.temp_dir.clone();
        if let Err(e) = tokio::fs::remove_dir_all(&temp_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove temp dir {}: {}", temp_dir.display(), e);
            }
        }

        inner.downloads.remove(hash);
        self.persist(&inner).await
    }

    /// Mark a download completed
    pub async fn complete_download(&self, hash: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let state = inner
            .downloads
            .get_mut(hash)
            .ok_or(SwarmError::DownloadNotFound)?;

        state.status = DownloadStatus::Completed;
        state.completed_at = Some(Utc::now());
        self.persist(&inner).await
    }

    /// Record a failure; bumps the retry counter and keeps the temp dir
    pub async fn set_download_error(&self, hash: &str, error: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(state) = inner.downloads.get_mut(hash) {
            state.status = DownloadStatus::Failed;
            state.last_error = Some(error.to_string());
            state.retry_count += 1;
            self.persist(&inner).await?;
        }
        Ok(())
    }

    /// Write the snapshot atomically: temp file then rename
    async fn persist(&self, state: &PersistedState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        let tmp_path = self.state_file.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json).await.map_err(|e| {
            SwarmError::storage_full(
                "failed to write state file",
                tmp_path.display().to_string(),
                e.to_string(),
            )
        })?;
        tokio::fs::rename(&tmp_path, &self.state_file).await.map_err(|e| {
            SwarmError::storage_full(
                "failed to replace state file",
                self.state_file.display().to_string(),
                e.to_string(),
            )
        })?;
        Ok(())
    }
}
