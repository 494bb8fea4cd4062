//! Configuration
//!
//! Settings for the peer side (storage, listen port, tracker endpoint)
//! and the tracker service (bind address, sweep cadence, timeouts).
//! Values come from whatever driver embeds the crate; validation happens
//! here so every component can trust its inputs.

use crate::content::chunker::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use crate::error::SwarmError;
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Default peer-to-peer listen port; the server probes upward when busy
pub const DEFAULT_LISTEN_PORT: u16 = 6881;

/// How many consecutive ports the peer server tries
pub const PORT_PROBE_RANGE: u16 = 10;

/// Settings for a peer process
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Root of the local store (`shared/`, `downloads/`, `temp/`)
    pub base_dir: PathBuf,
    /// Stable peer identity
    pub peer_id: String,
    /// First choice for the TCP listen port
    pub listen_port: u16,
    /// Tracker base URL, e.g. `http://tracker.example:8080`
    pub tracker_url: String,
    /// Worker pool size for downloads
    pub max_workers: usize,
    /// Chunk size used when sharing new files
    pub chunk_size: u64,
    /// Whether to hold a relay connection for NAT fallback
    pub use_relay: bool,
    /// Upload throttle in bytes per second; zero means unlimited
    pub upload_limit: u64,
    /// Download throttle in bytes per second; zero means unlimited
    pub download_limit: u64,
}

impl PeerConfig {
    /// Reasonable defaults rooted at `base_dir` with the given identity
    pub fn new(base_dir: impl Into<PathBuf>, peer_id: impl Into<String>, tracker_url: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            peer_id: peer_id.into(),
            listen_port: DEFAULT_LISTEN_PORT,
            tracker_url: tracker_url.into(),
            max_workers: 8,
            chunk_size: DEFAULT_CHUNK_SIZE,
            use_relay: true,
            upload_limit: 0,
            download_limit: 0,
        }
    }

    /// Check invariants before any component starts
    pub fn validate(&self) -> Result<()> {
        if self.peer_id.is_empty() {
            return Err(SwarmError::config_with_field("peer_id cannot be empty", "peer_id").into());
        }
        if self.listen_port == 0 {
            return Err(SwarmError::config_with_field("listen_port cannot be 0", "listen_port").into());
        }
        if self.max_workers == 0 {
            return Err(
                SwarmError::config_with_field("max_workers must be at least 1", "max_workers").into(),
            );
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(SwarmError::config_with_field(
                format!("chunk_size must be in 1..={}", MAX_CHUNK_SIZE),
                "chunk_size",
            )
            .into());
        }
        if self.tracker_url.is_empty() {
            return Err(
                SwarmError::config_with_field("tracker_url cannot be empty", "tracker_url").into(),
            );
        }
        url::Url::parse(&self.tracker_url).map_err(SwarmError::from)?;
        if self.base_dir.as_os_str().is_empty() {
            return Err(SwarmError::config_with_field("base_dir cannot be empty", "base_dir").into());
        }
        Ok(())
    }
}

/// Settings for the tracker service
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Bind address, e.g. `0.0.0.0:8080`
    pub addr: String,
    /// URL peers should use to reach this tracker (magnet `tr` field)
    pub public_url: String,
    /// Cadence of the offline/orphan sweep
    pub sweep_interval: Duration,
    /// A peer is offline after this long without a heartbeat
    pub peer_timeout: Duration,
    /// An offline peer is deleted after this long
    pub peer_delete_timeout: Duration,
    /// Cadence of dashboard stats broadcasts
    pub stats_interval: Duration,
    /// Heartbeat interval told to peers
    pub heartbeat_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
            sweep_interval: Duration::from_secs(60),
            peer_timeout: Duration::from_secs(90),
            peer_delete_timeout: Duration::from_secs(300),
            stats_interval: Duration::from_secs(5),
            heartbeat_secs: 30,
        }
    }
}

impl TrackerConfig {
    /// Check invariants before the server starts
    pub fn validate(&self) -> Result<()> {
        if self.addr.is_empty() {
            return Err(SwarmError::config_with_field("addr cannot be empty", "addr").into());
        }
        if self.sweep_interval.is_zero() {
            return Err(SwarmError::config_with_field(
                "sweep_interval cannot be zero",
                "sweep_interval",
            )
            .into());
        }
        if self.peer_timeout >= self.peer_delete_timeout {
            return Err(SwarmError::config_with_field(
                "peer_delete_timeout must exceed peer_timeout",
                "peer_delete_timeout",
            )
            .into());
        }
        if self.heartbeat_secs == 0 {
            return Err(SwarmError::config_with_field(
                "heartbeat_secs cannot be zero",
                "heartbeat_secs",
            )
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_config_defaults_validate() {
        let config = PeerConfig::new("/tmp/peer", "peer-1", "http://localhost:8080");
        assert!(config.validate().is_ok());
        assert_eq!(config.listen_port, DEFAULT_LISTEN_PORT);
    }

    #[test]
    fn test_peer_config_rejects_bad_values() {
        let base = PeerConfig::new("/tmp/peer", "peer-1", "http://localhost:8080");

        let mut config = base.clone();
        config.peer_id = String::new();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.listen_port = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(config.validate().is_err());

        let mut config = base;
        config.tracker_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tracker_config_defaults_validate() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.peer_timeout, Duration::from_secs(90));
        assert_eq!(config.peer_delete_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_tracker_config_timeout_ordering() {
        let mut config = TrackerConfig::default();
        config.peer_delete_timeout = Duration::from_secs(30);
        assert!(config.validate().is_err());
    }
}
