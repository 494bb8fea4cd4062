//! Error types for the file-sharing core
//!
//! One enum covers every failure class the crate surfaces: transport,
//! protocol, integrity, not-found, download state, local I/O, and timeouts.

use std::fmt;

/// Crate-wide error type
#[derive(Debug, Clone)]
pub enum SwarmError {
    /// Dial failures, broken TCP/WebSocket streams, relay not connected
    Transport {
        message: String,
        address: Option<String>,
        source: Option<String>,
    },

    /// Unexpected message type, malformed frame, oversized frame
    Protocol {
        message: String,
        source: Option<String>,
    },

    /// A remote peer answered with an ERROR message
    Peer {
        message: String,
        code: Option<i32>,
        peer: Option<String>,
    },

    /// Chunk hash mismatch or Merkle proof mismatch
    Integrity {
        message: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// Peer, file, or chunk absent; relay target offline
    NotFound {
        message: String,
        resource: Option<String>,
    },

    /// Local filesystem read/write failures
    Storage {
        message: String,
        path: Option<String>,
        source: Option<String>,
    },

    /// Request slot expiry or socket read deadline
    Timeout { message: String },

    /// Invalid configuration value
    Config {
        message: String,
        field: Option<String>,
    },

    /// No download registered under the requested file hash
    DownloadNotFound,

    /// Pause requested while the download is not active
    DownloadNotActive,

    /// Resume requested while the download is not paused or failed
    DownloadNotPaused,
}

impl SwarmError {
    /// Create a new Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        SwarmError::Transport {
            message: message.into(),
            address: None,
            source: None,
        }
    }

    /// Create a new Transport error with the remote address
    pub fn transport_with_address(message: impl Into<String>, address: impl Into<String>) -> Self {
        SwarmError::Transport {
            message: message.into(),
            address: Some(address.into()),
            source: None,
        }
    }

    /// Create a new Transport error with address and source
    pub fn transport_full(
        message: impl Into<String>,
        address: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        SwarmError::Transport {
            message: message.into(),
            address: Some(address.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        SwarmError::Protocol {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new Protocol error with source
    pub fn protocol_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        SwarmError::Protocol {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new Peer error
    pub fn peer(message: impl Into<String>) -> Self {
        SwarmError::Peer {
            message: message.into(),
            code: None,
            peer: None,
        }
    }

    /// Create a new Peer error carrying the remote error code
    pub fn peer_with_code(message: impl Into<String>, code: i32) -> Self {
        SwarmError::Peer {
            message: message.into(),
            code: Some(code),
            peer: None,
        }
    }

    /// Create a new Peer error with code and peer id
    pub fn peer_full(message: impl Into<String>, code: i32, peer: impl Into<String>) -> Self {
        SwarmError::Peer {
            message: message.into(),
            code: Some(code),
            peer: Some(peer.into()),
        }
    }

    /// Create a new Integrity error
    pub fn integrity(message: impl Into<String>) -> Self {
        SwarmError::Integrity {
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    /// Create a new Integrity error carrying both digests
    pub fn integrity_mismatch(
        message: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        SwarmError::Integrity {
            message: message.into(),
            expected: Some(expected.into()),
            actual: Some(actual.into()),
        }
    }

    /// Create a new NotFound error
    pub fn not_found(message: impl Into<String>) -> Self {
        SwarmError::NotFound {
            message: message.into(),
            resource: None,
        }
    }

    /// Create a new NotFound error naming the missing resource
    pub fn not_found_resource(message: impl Into<String>, resource: impl Into<String>) -> Self {
        SwarmError::NotFound {
            message: message.into(),
            resource: Some(resource.into()),
        }
    }

    /// Create a new Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        SwarmError::Storage {
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Create a new Storage error with path
    pub fn storage_with_path(message: impl Into<String>, path: impl Into<String>) -> Self {
        SwarmError::Storage {
            message: message.into(),
            path: Some(path.into()),
            source: None,
        }
    }

    /// Create a new Storage error with path and source
    pub fn storage_full(
        message: impl Into<String>,
        path: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        SwarmError::Storage {
            message: message.into(),
            path: Some(path.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new Timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        SwarmError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        SwarmError::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new Config error naming the offending field
    pub fn config_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        SwarmError::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Whether this error indicates a missing peer/file/chunk/target
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SwarmError::NotFound { .. } | SwarmError::DownloadNotFound
        )
    }

    /// Whether retrying against another peer could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwarmError::Transport { .. }
                | SwarmError::Peer { .. }
                | SwarmError::Integrity { .. }
                | SwarmError::Timeout { .. }
        )
    }
}

impl fmt::Display for SwarmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwarmError::Transport {
                message,
                address,
                source,
            } => match (address, source) {
                (Some(a), Some(s)) => {
                    write!(f, "transport error: {} (address: {}, source: {})", message, a, s)
                }
                (Some(a), None) => write!(f, "transport error: {} (address: {})", message, a),
                (None, Some(s)) => write!(f, "transport error: {} (source: {})", message, s),
                (None, None) => write!(f, "transport error: {}", message),
            },
            SwarmError::Protocol { message, source } => {
                if let Some(src) = source {
                    write!(f, "protocol error: {} (source: {})", message, src)
                } else {
                    write!(f, "protocol error: {}", message)
                }
            }
            SwarmError::Peer {
                message,
                code,
                peer,
            } => match (code, peer) {
                (Some(c), Some(p)) => write!(f, "peer error {}: {} (peer: {})", c, message, p),
                (Some(c), None) => write!(f, "peer error {}: {}", c, message),
                (None, Some(p)) => write!(f, "peer error: {} (peer: {})", message, p),
                (None, None) => write!(f, "peer error: {}", message),
            },
            SwarmError::Integrity {
                message,
                expected,
                actual,
            } => match (expected, actual) {
                (Some(e), Some(a)) => {
                    write!(f, "integrity error: {} (expected: {}, actual: {})", message, e, a)
                }
                _ => write!(f, "integrity error: {}", message),
            },
            SwarmError::NotFound { message, resource } => {
                if let Some(r) = resource {
                    write!(f, "not found: {} ({})", message, r)
                } else {
                    write!(f, "not found: {}", message)
                }
            }
            SwarmError::Storage {
                message,
                path,
                source,
            } => match (path, source) {
                (Some(p), Some(s)) => {
                    write!(f, "storage error: {} (path: {}, source: {})", message, p, s)
                }
                (Some(p), None) => write!(f, "storage error: {} (path: {})", message, p),
                (None, Some(s)) => write!(f, "storage error: {} (source: {})", message, s),
                (None, None) => write!(f, "storage error: {}", message),
            },
            SwarmError::Timeout { message } => write!(f, "timeout: {}", message),
            SwarmError::Config { message, field } => {
                if let Some(field) = field {
                    write!(f, "config error: {} (field: {})", message, field)
                } else {
                    write!(f, "config error: {}", message)
                }
            }
            SwarmError::DownloadNotFound => write!(f, "download not found"),
            SwarmError::DownloadNotActive => write!(f, "download is not active"),
            SwarmError::DownloadNotPaused => write!(f, "download is not paused"),
        }
    }
}

impl std::error::Error for SwarmError {}

impl From<std::io::Error> for SwarmError {
    fn from(err: std::io::Error) -> Self {
        SwarmError::Storage {
            message: err.to_string(),
            path: None,
            source: Some(err.kind().to_string()),
        }
    }
}

impl From<serde_json::Error> for SwarmError {
    fn from(err: serde_json::Error) -> Self {
        SwarmError::protocol_with_source("failed to encode or decode JSON", err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for SwarmError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SwarmError::timeout("operation deadline elapsed")
    }
}

impl From<url::ParseError> for SwarmError {
    fn from(err: url::ParseError) -> Self {
        SwarmError::config_with_field(err.to_string(), "url")
    }
}

impl From<reqwest::Error> for SwarmError {
    fn from(err: reqwest::Error) -> Self {
        SwarmError::Transport {
            message: "tracker request failed".to_string(),
            address: err.url().map(|u| u.to_string()),
            source: Some(err.to_string()),
        }
    }
}
