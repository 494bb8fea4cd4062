//! Download state
//!
//! Per-download mutable record: the chunk bitmap, temp and output paths,
//! counters, and the status lifecycle. The store owns these; workers
//! mutate them only through the store's thread-safe operations.

use crate::protocol::FileMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle status of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Active => "active",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Progress record for one active download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadState {
    pub metadata: FileMetadata,
    /// Set-once bitmap indexed by chunk index
    pub chunks_received: Vec<bool>,
    /// Directory holding `chunk_<i>` files until assembly
    pub temp_dir: PathBuf,
    /// Where the assembled file lands
    pub output_path: PathBuf,
    pub status: DownloadStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub bytes_downloaded: u64,
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub retry_count: u32,
}

impl DownloadState {
    /// Create a fresh record for `metadata`
    pub fn new(metadata: FileMetadata, temp_dir: PathBuf, output_path: PathBuf) -> Self {
        let chunk_count = metadata.chunks.len();
        let total_bytes = metadata.size;
        Self {
            metadata,
            chunks_received: vec![false; chunk_count],
            temp_dir,
            output_path,
            status: DownloadStatus::Active,
            started_at: Utc::now(),
            paused_at: None,
            completed_at: None,
            bytes_downloaded: 0,
            total_bytes,
            last_error: None,
            retry_count: 0,
        }
    }

    /// Number of chunks already received
    pub fn received_count(&self) -> usize {
        self.chunks_received.iter().filter(|&&b| b).count()
    }

    /// Whether every chunk has been received
    pub fn is_complete(&self) -> bool {
        self.chunks_received.iter().all(|&b| b)
    }

    /// Indices of chunks still missing
    pub fn missing_chunks(&self) -> Vec<usize> {
        self.chunks_received
            .iter()
            .enumerate()
            .filter(|(_, &received)| !received)
            .map(|(i, _)| i)
            .collect()
    }

    /// Completion as a percentage in `[0, 100]`
    pub fn progress(&self) -> f64 {
        if self.chunks_received.is_empty() {
            return 0.0;
        }
        self.received_count() as f64 / self.chunks_received.len() as f64 * 100.0
    }

    /// Path of the temp file for chunk `index`
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.temp_dir.join(format!("chunk_{}", index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ChunkInfo;

    fn metadata(chunks: usize) -> FileMetadata {
        FileMetadata {
            name: "file.bin".to_string(),
            size: chunks as u64 * 256,
            hash: "filehash".to_string(),
            chunk_size: 256,
            chunks: (0..chunks)
                .map(|i| ChunkInfo {
                    index: i,
                    hash: format!("hash{}", i),
                    size: 256,
                })
                .collect(),
            merkle_root: None,
        }
    }

    fn state(chunks: usize) -> DownloadState {
        DownloadState::new(
            metadata(chunks),
            PathBuf::from("/tmp/t"),
            PathBuf::from("/tmp/out"),
        )
    }

    #[test]
    fn test_new_state() {
        let state = state(4);
        assert_eq!(state.chunks_received, vec![false; 4]);
        assert_eq!(state.status, DownloadStatus::Active);
        assert_eq!(state.total_bytes, 1024);
        assert_eq!(state.retry_count, 0);
    }

    #[test]
    fn test_progress_and_completion() {
        let mut state = state(4);
        assert_eq!(state.progress(), 0.0);
        assert!(!state.is_complete());

        state.chunks_received[0] = true;
        state.chunks_received[2] = true;
        assert_eq!(state.progress(), 50.0);
        assert_eq!(state.missing_chunks(), vec![1, 3]);

        state.chunks_received[1] = true;
        state.chunks_received[3] = true;
        assert!(state.is_complete());
        assert_eq!(state.progress(), 100.0);
    }

    #[test]
    fn test_empty_metadata_progress() {
        let state = state(0);
        assert_eq!(state.progress(), 0.0);
        assert!(state.is_complete());
    }

    #[test]
    fn test_chunk_path() {
        let state = state(2);
        assert_eq!(state.chunk_path(1), PathBuf::from("/tmp/t/chunk_1"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&DownloadStatus::Paused).unwrap();
        assert_eq!(json, "\"paused\"");
        let parsed: DownloadStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(parsed, DownloadStatus::Cancelled);
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let mut state = state(3);
        state.chunks_received[1] = true;
        state.bytes_downloaded = 256;

        let json = serde_json::to_string(&state).unwrap();
        let parsed: DownloadState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.chunks_received, state.chunks_received);
        assert_eq!(parsed.bytes_downloaded, 256);
        assert_eq!(parsed.status, DownloadStatus::Active);
    }
}
