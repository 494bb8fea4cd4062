//! Protocol messages
//!
//! Peer-to-peer session messages and the tracker API request/response
//! bodies. Every message is a JSON object with a `type` discriminator;
//! chunk payloads travel base64-encoded inside the JSON text.

use serde::{Deserialize, Serialize};

/// Protocol version exchanged in handshakes
pub const PROTOCOL_VERSION: &str = "1.0";

/// Error codes carried by `ERROR` messages
pub mod error_codes {
    pub const PEER_NOT_FOUND: i32 = 1001;
    pub const FILE_NOT_FOUND: i32 = 1002;
    pub const CHUNK_NOT_AVAILABLE: i32 = 1003;
    pub const HASH_MISMATCH: i32 = 1004;
    pub const CONNECTION_REFUSED: i32 = 1005;
    pub const INVALID_MESSAGE: i32 = 1006;
}

/// Base64 (de)serialization for binary payloads inside JSON messages
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A peer-to-peer session message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// First message in both directions after connect/accept
    #[serde(rename = "HANDSHAKE")]
    Handshake { peer_id: String, version: String },

    /// Which chunks of a file the sender holds
    #[serde(rename = "BITFIELD")]
    Bitfield {
        file_hash: String,
        bitfield: Vec<bool>,
    },

    /// Announce a newly acquired chunk
    #[serde(rename = "HAVE")]
    Have {
        file_hash: String,
        chunk_index: usize,
    },

    /// Ask for one chunk of a file
    #[serde(rename = "REQUEST_CHUNK")]
    RequestChunk {
        file_hash: String,
        chunk_index: usize,
    },

    /// Chunk payload, base64-encoded in transit
    #[serde(rename = "CHUNK_DATA")]
    ChunkData {
        file_hash: String,
        chunk_index: usize,
        chunk_hash: String,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },

    /// Request failed; `code` is one of [`error_codes`]
    #[serde(rename = "ERROR")]
    Error { code: i32, message: String },
}

impl Message {
    /// Build a handshake message carrying our peer id
    pub fn handshake(peer_id: impl Into<String>) -> Self {
        Message::Handshake {
            peer_id: peer_id.into(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Short name of the message variant, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Handshake { .. } => "HANDSHAKE",
            Message::Bitfield { .. } => "BITFIELD",
            Message::Have { .. } => "HAVE",
            Message::RequestChunk { .. } => "REQUEST_CHUNK",
            Message::ChunkData { .. } => "CHUNK_DATA",
            Message::Error { .. } => "ERROR",
        }
    }
}

/// Metadata for one chunk of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub index: usize,
    /// Hex SHA-256 of the chunk bytes
    pub hash: String,
    pub size: u64,
}

/// The authoritative descriptor of a shareable file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    /// Hex SHA-256 of the whole file
    pub hash: String,
    pub chunk_size: u64,
    pub chunks: Vec<ChunkInfo>,
    /// Hex Merkle root over the raw chunk digests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
}

impl FileMetadata {
    /// Number of chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Network identity of a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub ip: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// A peer plus what it holds of a particular file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerFileInfo {
    #[serde(flatten)]
    pub peer: PeerInfo,
    pub chunks_available: Vec<usize>,
    pub is_seeder: bool,
}

// === Tracker API bodies ===

/// `POST /api/peers/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub peer_id: String,
    pub ip: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
}

/// `POST /api/peers/heartbeat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub peer_id: String,
    pub files_hashes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub success: bool,
    pub next_heartbeat_in: u64,
}

/// `POST /api/files/announce`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceRequest {
    pub peer_id: String,
    pub file: FileMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One row of `GET /api/files`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListItem {
    pub hash: String,
    pub name: String,
    pub size: u64,
    pub seeders: usize,
    pub leechers: usize,
    pub added_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileListItem>,
}

/// `GET /api/files/{hash}/peers` — everything the engine needs to start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPeersResponse {
    pub file_hash: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunk_count: usize,
    pub chunk_size: u64,
    pub chunks: Vec<ChunkInfo>,
    pub peers: Vec<PeerFileInfo>,
}

impl GetPeersResponse {
    /// Reconstruct the file metadata the swarm agreed on
    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            name: self.file_name.clone(),
            size: self.file_size,
            hash: self.file_hash.clone(),
            chunk_size: self.chunk_size,
            chunks: self.chunks.clone(),
            merkle_root: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_discriminator() {
        let msg = Message::handshake("peer-1");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"HANDSHAKE\""));
        assert!(json.contains("\"version\":\"1.0\""));
    }

    #[test]
    fn test_handshake_roundtrip() {
        let msg = Message::handshake("peer-abc");
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_chunk_data_is_base64() {
        let msg = Message::ChunkData {
            file_hash: "abc".to_string(),
            chunk_index: 2,
            chunk_hash: "def".to_string(),
            data: vec![0x00, 0xff, 0x10, 0x20],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"data\":\"AP8QIA==\""));

        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_chunk_data_binary_roundtrip() {
        let data: Vec<u8> = (0..=255).collect();
        let msg = Message::ChunkData {
            file_hash: "h".to_string(),
            chunk_index: 0,
            chunk_hash: "c".to_string(),
            data: data.clone(),
        };
        let json = serde_json::to_vec(&msg).unwrap();
        match serde_json::from_slice(&json).unwrap() {
            Message::ChunkData { data: decoded, .. } => assert_eq!(decoded, data),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_error_message_roundtrip() {
        let msg = Message::Error {
            code: error_codes::FILE_NOT_FOUND,
            message: "file not found".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"code\":1002"));
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = r#"{"type":"NONSENSE","peer_id":"x"}"#;
        assert!(serde_json::from_str::<Message>(json).is_err());
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(Message::handshake("p").kind(), "HANDSHAKE");
        assert_eq!(
            Message::Have {
                file_hash: "h".to_string(),
                chunk_index: 1
            }
            .kind(),
            "HAVE"
        );
    }

    #[test]
    fn test_peer_file_info_flattens_peer() {
        let info = PeerFileInfo {
            peer: PeerInfo {
                peer_id: "seeder-1".to_string(),
                ip: "192.168.1.10".to_string(),
                port: 6881,
                hostname: None,
            },
            chunks_available: vec![0, 1, 2, 3],
            is_seeder: true,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"peer_id\":\"seeder-1\""));
        assert!(json.contains("\"is_seeder\":true"));
        assert!(!json.contains("\"peer\":"));

        let parsed: PeerFileInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn test_get_peers_response_metadata() {
        let resp = GetPeersResponse {
            file_hash: "abc".to_string(),
            file_name: "movie.mkv".to_string(),
            file_size: 512,
            chunk_count: 2,
            chunk_size: 256,
            chunks: vec![
                ChunkInfo {
                    index: 0,
                    hash: "h0".to_string(),
                    size: 256,
                },
                ChunkInfo {
                    index: 1,
                    hash: "h1".to_string(),
                    size: 256,
                },
            ],
            peers: vec![],
        };
        let metadata = resp.metadata();
        assert_eq!(metadata.hash, "abc");
        assert_eq!(metadata.chunk_count(), 2);
        assert_eq!(metadata.size, 512);
    }
}
