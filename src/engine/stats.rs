//! Download statistics
//!
//! Shared counters for one download run plus the per-peer score board.
//! Workers update these under the stats lock; the engine reads them for
//! the final report.

use crate::scorer::ScoreBoard;
use std::time::{Duration, Instant};
use tracing::info;

/// Counters for one download run
#[derive(Debug, Clone)]
pub struct DownloadStats {
    pub total_chunks: usize,
    pub downloaded_chunks: u64,
    pub failed_chunks: u64,
    pub bytes_downloaded: u64,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
    /// Per-peer outcomes and preference scores
    pub scores: ScoreBoard,
}

impl DownloadStats {
    /// Create stats for `total_chunks` chunks, seeding the score board
    pub fn new<'a>(total_chunks: usize, peer_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut scores = ScoreBoard::new();
        scores.track_peers(peer_ids);
        Self {
            total_chunks,
            downloaded_chunks: 0,
            failed_chunks: 0,
            bytes_downloaded: 0,
            started_at: Instant::now(),
            finished_at: None,
            scores,
        }
    }

    /// Mark the run finished
    pub fn finish(&mut self) {
        self.finished_at = Some(Instant::now());
    }

    /// Wall-clock duration of the run so far
    pub fn elapsed(&self) -> Duration {
        self.finished_at
            .unwrap_or_else(Instant::now)
            .duration_since(self.started_at)
    }

    /// Average throughput in MiB/s
    pub fn speed_mibps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes_downloaded as f64 / 1024.0 / 1024.0 / secs
    }

    /// Completion fraction in `[0, 100]`
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        self.downloaded_chunks as f64 / self.total_chunks as f64 * 100.0
    }

    /// Log the end-of-run report
    pub fn log_report(&self, file_name: &str) {
        info!(
            "{}: {}/{} chunks downloaded, {} failed, {} bytes in {:?} ({:.2} MiB/s)",
            file_name,
            self.downloaded_chunks,
            self.total_chunks,
            self.failed_chunks,
            self.bytes_downloaded,
            self.elapsed(),
            self.speed_mibps(),
        );
        for peer in self.scores.all_stats() {
            if peer.chunks_downloaded > 0 {
                info!(
                    "  peer {}: {} chunks, avg latency {:?}, score {:.1}",
                    peer.peer_id, peer.chunks_downloaded, peer.avg_latency, peer.score,
                );
            }
        }
    }
}
