//! Wire framing
//!
//! One message per frame on a TCP stream: a 4-byte big-endian length
//! prefix followed by the JSON-encoded message. The frame cap leaves
//! room for a maximum-size chunk after base64 expansion.

use crate::error::SwarmError;
use crate::protocol::Message;
use anyhow::Result;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Upper bound on a single frame: 1 MiB chunk, base64-inflated, plus headroom
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Reads and writes framed messages on an async stream
pub trait WireProtocol {
    /// Read one complete message from the stream
    async fn read_message<R: AsyncReadExt + Unpin + Send>(
        &mut self,
        reader: &mut R,
    ) -> Result<Message>;

    /// Write one message to the stream
    async fn write_message<W: AsyncWriteExt + Unpin + Send>(
        &mut self,
        writer: &mut W,
        message: &Message,
    ) -> Result<()>;
}

/// Length-prefixed JSON framing
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonWire;

impl WireProtocol for JsonWire {
    async fn read_message<R: AsyncReadExt + Unpin + Send>(
        &mut self,
        reader: &mut R,
    ) -> Result<Message> {
        let mut length_buf = [0u8; 4];
        reader.read_exact(&mut length_buf).await.map_err(|e| {
            SwarmError::transport_full("failed to read frame length", "stream", e.to_string())
        })?;
        let length = u32::from_be_bytes(length_buf) as usize;

        if length == 0 {
            return Err(SwarmError::protocol("zero-length frame").into());
        }
        if length > MAX_FRAME_SIZE {
            return Err(SwarmError::protocol_with_source(
                "frame exceeds size limit",
                format!("{} > {}", length, MAX_FRAME_SIZE),
            )
            .into());
        }

        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload).await.map_err(|e| {
            SwarmError::transport_full("failed to read frame payload", "stream", e.to_string())
        })?;

        let message = serde_json::from_slice(&payload).map_err(|e| {
            SwarmError::protocol_with_source("malformed message frame", e.to_string())
        })?;
        Ok(message)
    }

    async fn write_message<W: AsyncWriteExt + Unpin + Send>(
        &mut self,
        writer: &mut W,
        message: &Message,
    ) -> Result<()> {
        let payload = serde_json::to_vec(message)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(SwarmError::protocol_with_source(
                "outgoing frame exceeds size limit",
                format!("{} > {}", payload.len(), MAX_FRAME_SIZE),
            )
            .into());
        }

        writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
        writer.write_all(&payload).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Append a length-prefixed frame to a buffer
pub fn encode_frame(buf: &mut BytesMut, payload: &[u8]) {
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}

/// Pop one complete frame from a buffer, if fully buffered
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Vec<u8>>> {
    if buf.len() < 4 {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(SwarmError::protocol_with_source(
            "frame exceeds size limit",
            format!("{} > {}", length, MAX_FRAME_SIZE),
        )
        .into());
    }

    if buf.len() < 4 + length {
        return Ok(None);
    }

    let payload = buf[4..4 + length].to_vec();
    buf.advance(4 + length);
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_write_read_roundtrip() {
        let mut wire = JsonWire;
        let msg = Message::RequestChunk {
            file_hash: "abc123".to_string(),
            chunk_index: 7,
        };

        let mut buf = Vec::new();
        wire.write_message(&mut buf, &msg).await.unwrap();

        let mut reader = Cursor::new(buf);
        let read = wire.read_message(&mut reader).await.unwrap();
        assert_eq!(read, msg);
    }

    #[tokio::test]
    async fn test_sequential_messages_on_one_stream() {
        let mut wire = JsonWire;
        let first = Message::handshake("peer-1");
        let second = Message::Have {
            file_hash: "abc".to_string(),
            chunk_index: 3,
        };

        let mut buf = Vec::new();
        wire.write_message(&mut buf, &first).await.unwrap();
        wire.write_message(&mut buf, &second).await.unwrap();

        let mut reader = Cursor::new(buf);
        assert_eq!(wire.read_message(&mut reader).await.unwrap(), first);
        assert_eq!(wire.read_message(&mut reader).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_chunk_data_survives_framing() {
        let mut wire = JsonWire;
        let data: Vec<u8> = (0..1024u32).map(|i| (i % 256) as u8).collect();
        let msg = Message::ChunkData {
            file_hash: "f".to_string(),
            chunk_index: 0,
            chunk_hash: "c".to_string(),
            data: data.clone(),
        };

        let mut buf = Vec::new();
        wire.write_message(&mut buf, &msg).await.unwrap();
        let mut reader = Cursor::new(buf);
        match wire.read_message(&mut reader).await.unwrap() {
            Message::ChunkData { data: read, .. } => assert_eq!(read, data),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let mut wire = JsonWire;
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes());
        buf.extend_from_slice(b"junk");

        let mut reader = Cursor::new(buf);
        let err = wire.read_message(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("size limit"));
    }

    #[tokio::test]
    async fn test_zero_length_frame_rejected() {
        let mut wire = JsonWire;
        let mut reader = Cursor::new(0u32.to_be_bytes().to_vec());
        assert!(wire.read_message(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_json_rejected() {
        let mut wire = JsonWire;
        let payload = b"{not json";
        let mut buf = Vec::new();
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);

        let mut reader = Cursor::new(buf);
        let err = wire.read_message(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn test_encode_decode_frame() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, b"hello");

        let payload = decode_frame(&mut buf).unwrap().unwrap();
        assert_eq!(payload, b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_incomplete_frame() {
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.put_slice(b"hello");

        assert!(decode_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 9);
    }

    #[test]
    fn test_decode_empty_buffer() {
        let mut buf = BytesMut::new();
        assert!(decode_frame(&mut buf).unwrap().is_none());
    }
}
