//! Relay message envelope
//!
//! Messages routed through the hub carry an opaque payload: the hub
//! forwards raw JSON by `to` and `request_id` and never deserializes the
//! payload itself. Only the two endpoints understand the payload types
//! defined here.

use crate::protocol::messages::base64_bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Relay message type strings
pub mod msg_types {
    pub const CHUNK_REQUEST: &str = "relay_chunk_request";
    pub const CHUNK_DATA: &str = "relay_chunk_data";
    pub const ERROR: &str = "relay_error";
    pub const PING: &str = "relay_ping";
    pub const PONG: &str = "relay_pong";
}

/// Envelope for everything that crosses the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Stamped by the hub from the sending session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Opaque to the hub; decoded only at the endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    pub timestamp: DateTime<Utc>,
}

impl RelayMessage {
    /// Build a message with an encoded payload
    pub fn with_payload<T: Serialize>(
        msg_type: &str,
        to: Option<String>,
        request_id: Option<String>,
        payload: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            msg_type: msg_type.to_string(),
            from: None,
            to,
            request_id,
            payload: Some(serde_json::value::to_raw_value(payload)?),
            timestamp: Utc::now(),
        })
    }

    /// Build a payload-less message (ping/pong)
    pub fn bare(msg_type: &str, request_id: Option<String>) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            from: None,
            to: None,
            request_id,
            payload: None,
            timestamp: Utc::now(),
        }
    }

    /// Decode the payload as `T`
    pub fn decode_payload<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        let raw = self.payload.as_deref().map(RawValue::get).unwrap_or("null");
        serde_json::from_str(raw)
    }
}

/// Payload of `relay_chunk_request`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRequestPayload {
    pub file_hash: String,
    pub chunk_index: usize,
}

/// Payload of `relay_chunk_data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDataPayload {
    pub file_hash: String,
    pub chunk_index: usize,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Hex SHA-256 of `data`
    pub hash: String,
}

/// Payload of `relay_error`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_request_roundtrip() {
        let msg = RelayMessage::with_payload(
            msg_types::CHUNK_REQUEST,
            Some("target-peer".to_string()),
            Some("req-1".to_string()),
            &ChunkRequestPayload {
                file_hash: "abc".to_string(),
                chunk_index: 3,
            },
        )
        .unwrap();

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"relay_chunk_request\""));

        let parsed: RelayMessage = serde_json::from_str(&json).unwrap();
        let payload: ChunkRequestPayload = parsed.decode_payload().unwrap();
        assert_eq!(payload.file_hash, "abc");
        assert_eq!(payload.chunk_index, 3);
    }

    #[test]
    fn test_chunk_data_base64_payload() {
        let payload = ChunkDataPayload {
            file_hash: "abc".to_string(),
            chunk_index: 0,
            data: vec![1, 2, 3, 255],
            hash: "deadbeef".to_string(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"data\":\"AQID/w==\""));

        let parsed: ChunkDataPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_payload_preserved_verbatim_through_envelope() {
        // The hub re-serializes envelopes; the payload bytes must survive
        // untouched even for types it has never heard of.
        let original = r#"{"type":"relay_chunk_data","request_id":"r","payload":{"custom":"zzz","n":[1,2]},"timestamp":"2025-01-01T00:00:00Z"}"#;
        let parsed: RelayMessage = serde_json::from_str(original).unwrap();
        let reencoded = serde_json::to_string(&parsed).unwrap();
        assert!(reencoded.contains(r#"{"custom":"zzz","n":[1,2]}"#));
    }

    #[test]
    fn test_bare_message_has_no_payload() {
        let msg = RelayMessage::bare(msg_types::PING, Some("p-1".to_string()));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("payload"));
        assert!(!json.contains("\"to\""));
    }

    #[test]
    fn test_decode_missing_payload_fails_for_struct() {
        let msg = RelayMessage::bare(msg_types::ERROR, None);
        assert!(msg.decode_payload::<ErrorPayload>().is_err());
    }

    #[test]
    fn test_error_payload_roundtrip() {
        let msg = RelayMessage::with_payload(
            msg_types::ERROR,
            Some("origin".to_string()),
            Some("req-9".to_string()),
            &ErrorPayload {
                code: 404,
                message: "target peer not connected".to_string(),
            },
        )
        .unwrap();

        let parsed: RelayMessage =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        let payload: ErrorPayload = parsed.decode_payload().unwrap();
        assert_eq!(payload.code, 404);
    }
}
