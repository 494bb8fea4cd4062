//! Tracker metrics
//!
//! Cheap atomic counters bumped by the handlers, flattened into a JSON
//! snapshot for the `/metrics` endpoint and the dashboard stats events.

use crate::tracker::repository::TrackerStats;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared across all handlers
#[derive(Debug)]
pub struct Metrics {
    started_at: Instant,
    requests_total: AtomicU64,
    registers_total: AtomicU64,
    heartbeats_total: AtomicU64,
    announces_total: AtomicU64,
    peer_queries_total: AtomicU64,
}

/// Point-in-time view served by `/metrics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub requests_total: u64,
    pub registers_total: u64,
    pub heartbeats_total: u64,
    pub announces_total: u64,
    pub peer_queries_total: u64,
    pub peers_online: usize,
    pub peers_total: usize,
    pub files_count: usize,
    pub relay_peers: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            requests_total: AtomicU64::new(0),
            registers_total: AtomicU64::new(0),
            heartbeats_total: AtomicU64::new(0),
            announces_total: AtomicU64::new(0),
            peer_queries_total: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_register(&self) {
        self.registers_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_announce(&self) {
        self.announces_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_peer_query(&self) {
        self.peer_queries_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Combine counters with current repository and relay figures
    pub fn snapshot(&self, stats: TrackerStats, relay_peers: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            registers_total: self.registers_total.load(Ordering::Relaxed),
            heartbeats_total: self.heartbeats_total.load(Ordering::Relaxed),
            announces_total: self.announces_total.load(Ordering::Relaxed),
            peer_queries_total: self.peer_queries_total.load(Ordering::Relaxed),
            peers_online: stats.peers_online,
            peers_total: stats.peers_total,
            files_count: stats.files_count,
            relay_peers,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_register();
        metrics.record_announce();

        let snapshot = metrics.snapshot(
            TrackerStats {
                peers_online: 2,
                peers_total: 3,
                files_count: 1,
            },
            4,
        );
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.registers_total, 1);
        assert_eq!(snapshot.announces_total, 1);
        assert_eq!(snapshot.heartbeats_total, 0);
        assert_eq!(snapshot.peers_online, 2);
        assert_eq!(snapshot.relay_peers, 4);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot(
            TrackerStats {
                peers_online: 0,
                peers_total: 0,
                files_count: 0,
            },
            0,
        );
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"requests_total\":0"));
    }
}
