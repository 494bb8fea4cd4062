//! Magnet URI codec
//!
//! Handles parsing and generation of magnet URIs carrying a SHA-256
//! content hash plus the chunk-layout extensions (`x.cs`, `x.tc`) the
//! download engine needs to pre-size a transfer.

use crate::error::SwarmError;
use anyhow::Result;
use tracing::{debug, warn};
use url::form_urlencoded;

/// Accepted URN prefixes for the `xt` parameter
const URN_PREFIXES: [&str; 3] = ["urn:sha256:", "urn:sha-256:", "urn:btih:"];

/// A parsed magnet link
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Magnet {
    /// Hex content hash (xt=urn:sha256:...)
    pub info_hash: String,
    /// File name (dn=...)
    pub display_name: String,
    /// File size in bytes (xl=...)
    pub size: u64,
    /// Tracker URLs (tr=...)
    pub trackers: Vec<String>,
    /// Web seed URLs (ws=...)
    pub web_seeds: Vec<String>,
    /// Search keywords (kt=k1+k2+...)
    pub keywords: Vec<String>,
    /// Chunk size in bytes (x.cs=...)
    pub chunk_size: u64,
    /// Total chunk count (x.tc=...)
    pub total_chunks: usize,
}

impl Magnet {
    /// Create a magnet with the required fields
    pub fn new(info_hash: impl Into<String>, display_name: impl Into<String>, size: u64) -> Self {
        Self {
            info_hash: info_hash.into(),
            display_name: display_name.into(),
            size,
            ..Default::default()
        }
    }

    /// Append a tracker URL
    pub fn with_tracker(mut self, tracker_url: impl Into<String>) -> Self {
        self.trackers.push(tracker_url.into());
        self
    }

    /// Set the chunk layout extensions
    pub fn with_chunk_info(mut self, chunk_size: u64, total_chunks: usize) -> Self {
        self.chunk_size = chunk_size;
        self.total_chunks = total_chunks;
        self
    }

    /// Parse a magnet URI string
    pub fn parse(uri: &str) -> Result<Self> {
        let query = uri
            .strip_prefix("magnet:?")
            .ok_or_else(|| SwarmError::protocol("not a magnet URI"))?;

        let mut magnet = Magnet::default();

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "xt" => {
                    magnet.info_hash = parse_info_hash(&value)?;
                    debug!("magnet info hash: {}", magnet.info_hash);
                }
                "dn" => magnet.display_name = value.into_owned(),
                "xl" => {
                    if let Ok(size) = value.parse::<u64>() {
                        magnet.size = size;
                    } else {
                        warn!("ignoring invalid xl parameter: {}", value);
                    }
                }
                "tr" => magnet.trackers.push(value.into_owned()),
                "ws" => magnet.web_seeds.push(value.into_owned()),
                "kt" => {
                    magnet.keywords = value.split('+').map(str::to_string).collect();
                }
                "x.cs" => {
                    if let Ok(cs) = value.parse::<u64>() {
                        magnet.chunk_size = cs;
                    }
                }
                "x.tc" => {
                    if let Ok(tc) = value.parse::<usize>() {
                        magnet.total_chunks = tc;
                    }
                }
                other => debug!("ignoring unknown magnet parameter: {}", other),
            }
        }

        if magnet.info_hash.is_empty() {
            return Err(SwarmError::protocol("magnet URI missing info hash (xt parameter)").into());
        }

        Ok(magnet)
    }

    /// Render the magnet as a URI string
    pub fn to_uri(&self) -> String {
        let mut parts = vec![format!("xt=urn:sha256:{}", self.info_hash)];

        if !self.display_name.is_empty() {
            parts.push(format!("dn={}", escape(&self.display_name)));
        }
        if self.size > 0 {
            parts.push(format!("xl={}", self.size));
        }
        for tracker in &self.trackers {
            parts.push(format!("tr={}", escape(tracker)));
        }
        for seed in &self.web_seeds {
            parts.push(format!("ws={}", escape(seed)));
        }
        if !self.keywords.is_empty() {
            parts.push(format!("kt={}", self.keywords.join("+")));
        }
        if self.chunk_size > 0 {
            parts.push(format!("x.cs={}", self.chunk_size));
        }
        if self.total_chunks > 0 {
            parts.push(format!("x.tc={}", self.total_chunks));
        }

        format!("magnet:?{}", parts.join("&"))
    }

    /// Whether a string looks like a magnet URI
    pub fn is_magnet_uri(input: &str) -> bool {
        input.trim().starts_with("magnet:?")
    }
}

impl std::fmt::Display for Magnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_uri())
    }
}

/// Extract and validate the hex hash from an `xt` value
fn parse_info_hash(xt: &str) -> Result<String> {
    for prefix in URN_PREFIXES {
        if let Some(hash) = xt.strip_prefix(prefix) {
            if hex::decode(hash).is_err() {
                return Err(SwarmError::protocol_with_source(
                    "info hash is not valid hex",
                    hash.to_string(),
                )
                .into());
            }
            return Ok(hash.to_string());
        }
    }
    Err(SwarmError::protocol_with_source("unsupported info hash format", xt.to_string()).into())
}

fn escape(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_full() {
        let magnet = Magnet {
            info_hash: "abc123def456".to_string(),
            display_name: "test.txt".to_string(),
            size: 1024,
            trackers: vec!["https://t.example".to_string()],
            web_seeds: vec![],
            keywords: vec![],
            chunk_size: 262144,
            total_chunks: 4,
        };

        let uri = magnet.to_uri();
        assert_eq!(
            uri,
            "magnet:?xt=urn:sha256:abc123def456&dn=test.txt&xl=1024&tr=https%3A%2F%2Ft.example&x.cs=262144&x.tc=4"
        );

        let parsed = Magnet::parse(&uri).unwrap();
        assert_eq!(parsed, magnet);
    }

    #[test]
    fn test_parse_minimal() {
        let parsed = Magnet::parse("magnet:?xt=urn:sha256:deadbeef").unwrap();
        assert_eq!(parsed.info_hash, "deadbeef");
        assert!(parsed.display_name.is_empty());
        assert!(parsed.trackers.is_empty());
        assert_eq!(parsed.size, 0);
    }

    #[test]
    fn test_parse_accepts_alternate_prefixes() {
        for uri in [
            "magnet:?xt=urn:sha256:cafe",
            "magnet:?xt=urn:sha-256:cafe",
            "magnet:?xt=urn:btih:cafe",
        ] {
            let parsed = Magnet::parse(uri).unwrap();
            assert_eq!(parsed.info_hash, "cafe");
        }
    }

    #[test]
    fn test_parse_rejects_non_hex_hash() {
        assert!(Magnet::parse("magnet:?xt=urn:sha256:not-hex-at-all!").is_err());
    }

    #[test]
    fn test_parse_requires_xt() {
        assert!(Magnet::parse("magnet:?dn=file.txt&tr=https://t.example").is_err());
    }

    #[test]
    fn test_parse_rejects_non_magnet() {
        assert!(Magnet::parse("https://example.com/?xt=urn:sha256:ab").is_err());
    }

    #[test]
    fn test_parse_multiple_trackers() {
        let uri =
            "magnet:?xt=urn:sha256:ab12&tr=https%3A%2F%2Ft1.example&tr=https%3A%2F%2Ft2.example";
        let parsed = Magnet::parse(uri).unwrap();
        assert_eq!(
            parsed.trackers,
            vec!["https://t1.example", "https://t2.example"]
        );
    }

    #[test]
    fn test_keywords_roundtrip() {
        let magnet = Magnet {
            info_hash: "ab12".to_string(),
            keywords: vec!["rust".to_string(), "networking".to_string()],
            ..Default::default()
        };
        let uri = magnet.to_uri();
        assert!(uri.contains("kt=rust+networking"));

        let parsed = Magnet::parse(&uri).unwrap();
        assert_eq!(parsed.keywords, vec!["rust", "networking"]);
    }

    #[test]
    fn test_display_name_escaping() {
        let magnet = Magnet::new("ab12", "my file & more.txt", 10);
        let uri = magnet.to_uri();
        assert!(!uri.contains(' '));
        let parsed = Magnet::parse(&uri).unwrap();
        assert_eq!(parsed.display_name, "my file & more.txt");
    }

    #[test]
    fn test_invalid_xl_ignored() {
        let parsed = Magnet::parse("magnet:?xt=urn:sha256:ab&xl=notanumber").unwrap();
        assert_eq!(parsed.size, 0);
    }

    #[test]
    fn test_builder_helpers() {
        let magnet = Magnet::new("ab12", "file.bin", 2048)
            .with_tracker("https://t.example")
            .with_chunk_info(512, 4);
        assert_eq!(magnet.trackers.len(), 1);
        assert_eq!(magnet.chunk_size, 512);
        assert_eq!(magnet.total_chunks, 4);
    }

    #[test]
    fn test_is_magnet_uri() {
        assert!(Magnet::is_magnet_uri("magnet:?xt=urn:sha256:ab"));
        assert!(Magnet::is_magnet_uri("  magnet:?xt=urn:sha256:ab  "));
        assert!(!Magnet::is_magnet_uri("https://example.com"));
    }
}
