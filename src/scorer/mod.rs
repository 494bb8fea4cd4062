//! Engine-local peer scoring
//!
//! Tracks per-peer outcomes during a download and turns them into an
//! ordering key in `[0, 200]`. Fast, reliable peers float to the front of
//! each worker's candidate list; failing peers sink toward zero and stop
//! receiving retries. Distinct from tracker reputation, which is computed
//! from byte ratios and uptime on the tracker side.

use crate::protocol::PeerFileInfo;
use std::collections::HashMap;
use std::time::Duration;

/// Score every peer starts with
pub const INITIAL_SCORE: f64 = 100.0;

/// Upper score bound
pub const MAX_SCORE: f64 = 200.0;

/// Deducted per failure
const FAILURE_PENALTY: f64 = 25.0;

/// Per-peer download statistics
#[derive(Debug, Clone)]
pub struct PeerDownloadStats {
    pub peer_id: String,
    pub chunks_downloaded: u64,
    pub bytes_downloaded: u64,
    pub failures: u64,
    /// None until the first successful chunk
    pub avg_latency: Option<Duration>,
    pub last_latency: Option<Duration>,
    pub score: f64,
}

impl PeerDownloadStats {
    fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            chunks_downloaded: 0,
            bytes_downloaded: 0,
            failures: 0,
            avg_latency: None,
            last_latency: None,
            score: INITIAL_SCORE,
        }
    }
}

/// Score board for the peers of one download
#[derive(Debug, Clone, Default)]
pub struct ScoreBoard {
    peers: HashMap<String, PeerDownloadStats>,
}

impl ScoreBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed entries for a peer set so unseen peers rank at the initial score
    pub fn track_peers<'a>(&mut self, peer_ids: impl IntoIterator<Item = &'a str>) {
        for id in peer_ids {
            self.peers
                .entry(id.to_string())
                .or_insert_with(|| PeerDownloadStats::new(id));
        }
    }

    /// Record a successful chunk download with its measured latency
    pub fn record_success(&mut self, peer_id: &str, bytes: u64, latency: Duration) {
        let stats = self
            .peers
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerDownloadStats::new(peer_id));

        stats.chunks_downloaded += 1;
        stats.bytes_downloaded += bytes;
        stats.last_latency = Some(latency);
        stats.avg_latency = Some(match stats.avg_latency {
            Some(avg) => (avg + latency) / 2,
            None => latency,
        });

        let bonus = if latency < Duration::from_millis(100) {
            20.0
        } else if latency <= Duration::from_secs(1) {
            10.0
        } else {
            5.0
        };
        stats.score = (stats.score + bonus).min(MAX_SCORE);
    }

    /// Record a failed connection, request, or hash mismatch
    pub fn record_failure(&mut self, peer_id: &str) {
        let stats = self
            .peers
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerDownloadStats::new(peer_id));
        stats.failures += 1;
        stats.score = (stats.score - FAILURE_PENALTY).max(0.0);
    }

    /// Current score for a peer; unseen peers rank at the initial score
    pub fn score(&self, peer_id: &str) -> f64 {
        self.peers
            .get(peer_id)
            .map(|s| s.score)
            .unwrap_or(INITIAL_SCORE)
    }

    /// Stats for a peer, if any outcome has been recorded
    pub fn stats(&self, peer_id: &str) -> Option<&PeerDownloadStats> {
        self.peers.get(peer_id)
    }

    /// All tracked stats, for the end-of-download report
    pub fn all_stats(&self) -> impl Iterator<Item = &PeerDownloadStats> {
        self.peers.values()
    }

    /// Return `peers` reordered by current score, best first
    pub fn sorted_by_score(&self, peers: &[PeerFileInfo]) -> Vec<PeerFileInfo> {
        let mut sorted = peers.to_vec();
        sorted.sort_by(|a, b| {
            let sa = self.score(&a.peer.peer_id);
            let sb = self.score(&b.peer.peer_id);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PeerInfo;

    fn peer(id: &str) -> PeerFileInfo {
        PeerFileInfo {
            peer: PeerInfo {
                peer_id: id.to_string(),
                ip: "127.0.0.1".to_string(),
                port: 6881,
                hostname: None,
            },
            chunks_available: vec![],
            is_seeder: true,
        }
    }

    #[test]
    fn test_initial_score() {
        let board = ScoreBoard::new();
        assert_eq!(board.score("unknown"), INITIAL_SCORE);
    }

    #[test]
    fn test_success_bonus_tiers() {
        let mut board = ScoreBoard::new();

        board.record_success("fast", 256, Duration::from_millis(50));
        assert_eq!(board.score("fast"), 120.0);

        board.record_success("mid", 256, Duration::from_millis(500));
        assert_eq!(board.score("mid"), 110.0);

        board.record_success("slow", 256, Duration::from_secs(2));
        assert_eq!(board.score("slow"), 105.0);
    }

    #[test]
    fn test_boundary_latencies() {
        let mut board = ScoreBoard::new();
        // Exactly 100ms falls in the middle tier, exactly 1s as well
        board.record_success("a", 1, Duration::from_millis(100));
        assert_eq!(board.score("a"), 110.0);
        board.record_success("b", 1, Duration::from_secs(1));
        assert_eq!(board.score("b"), 110.0);
    }

    #[test]
    fn test_score_clamped_at_max() {
        let mut board = ScoreBoard::new();
        for _ in 0..10 {
            board.record_success("p", 1, Duration::from_millis(10));
        }
        assert_eq!(board.score("p"), MAX_SCORE);
    }

    #[test]
    fn test_failures_drive_score_to_zero() {
        let mut board = ScoreBoard::new();
        // ceil(100 / 25) = 4 failures empty the initial score
        for _ in 0..4 {
            board.record_failure("p");
        }
        assert_eq!(board.score("p"), 0.0);

        board.record_failure("p");
        assert_eq!(board.score("p"), 0.0);
        assert_eq!(board.stats("p").unwrap().failures, 5);
    }

    #[test]
    fn test_successes_never_decrease_score() {
        let mut board = ScoreBoard::new();
        let mut previous = board.score("p");
        for i in 0..20u64 {
            board.record_success("p", 1, Duration::from_millis(50 * (i % 30)));
            let current = board.score("p");
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn test_avg_latency_running_average() {
        let mut board = ScoreBoard::new();
        board.record_success("p", 1, Duration::from_millis(100));
        assert_eq!(
            board.stats("p").unwrap().avg_latency,
            Some(Duration::from_millis(100))
        );

        board.record_success("p", 1, Duration::from_millis(300));
        assert_eq!(
            board.stats("p").unwrap().avg_latency,
            Some(Duration::from_millis(200))
        );
        assert_eq!(
            board.stats("p").unwrap().last_latency,
            Some(Duration::from_millis(300))
        );
    }

    #[test]
    fn test_bytes_accumulate() {
        let mut board = ScoreBoard::new();
        board.record_success("p", 256, Duration::from_millis(10));
        board.record_success("p", 512, Duration::from_millis(10));
        let stats = board.stats("p").unwrap();
        assert_eq!(stats.bytes_downloaded, 768);
        assert_eq!(stats.chunks_downloaded, 2);
    }

    #[test]
    fn test_sorted_by_score() {
        let mut board = ScoreBoard::new();
        board.track_peers(["a", "b", "c"]);
        board.record_failure("a");
        board.record_success("c", 1, Duration::from_millis(10));

        let sorted = board.sorted_by_score(&[peer("a"), peer("b"), peer("c")]);
        let order: Vec<&str> = sorted.iter().map(|p| p.peer.peer_id.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_track_peers_does_not_reset() {
        let mut board = ScoreBoard::new();
        board.record_failure("a");
        board.track_peers(["a"]);
        assert_eq!(board.score("a"), 75.0);
    }
}
