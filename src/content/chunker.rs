//! File chunking
//!
//! Splits files into fixed-size chunks, hashing each chunk and the whole
//! file, and producing the [`FileMetadata`] that the tracker indexes and
//! the download engine verifies against. Chunk reads and writes are
//! positioned so the peer server can serve any chunk without loading the
//! whole file.

use crate::content::hash;
use crate::content::merkle::MerkleTree;
use crate::error::SwarmError;
use crate::protocol::{ChunkInfo, FileMetadata};
use anyhow::Result;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

/// Default chunk size: 256 KiB
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024;

/// Hard cap on chunk size: 1 MiB
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024;

/// Splits files into chunks and reassembles them
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: u64,
}

impl Chunker {
    /// Create a chunker with the given chunk size, clamped to the valid range
    pub fn new(chunk_size: u64) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size.min(MAX_CHUNK_SIZE)
        };
        Self { chunk_size }
    }

    /// The configured chunk size in bytes
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Split a file into chunks and return its metadata
    ///
    /// Streams the file twice: once for the whole-file digest, once for
    /// per-chunk digests. A zero-byte file yields an empty chunk list and
    /// no Merkle root.
    pub async fn chunk_file(&self, path: impl AsRef<Path>) -> Result<FileMetadata> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file_hash = hash::digest_file(path).await.map_err(|e| {
            SwarmError::storage_full("failed to hash file", path.display().to_string(), e.to_string())
        })?;

        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            SwarmError::storage_full("failed to open file", path.display().to_string(), e.to_string())
        })?;
        let size = file.metadata().await?.len();

        let mut chunks = Vec::new();
        let mut leaf_hashes: Vec<[u8; 32]> = Vec::new();
        let mut buf = vec![0u8; self.chunk_size as usize];
        let mut index = 0usize;

        loop {
            let n = read_up_to(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }

            let chunk = &buf[..n];
            leaf_hashes.push(hash::digest_raw(chunk));
            chunks.push(ChunkInfo {
                index,
                hash: hash::digest_hex(chunk),
                size: n as u64,
            });
            index += 1;
        }

        let merkle_root = if leaf_hashes.is_empty() {
            None
        } else {
            Some(MerkleTree::from_leaf_hashes(&leaf_hashes)?.root_hex())
        };

        info!(
            "chunked {} into {} chunks ({} bytes, chunk size {})",
            name,
            chunks.len(),
            size,
            self.chunk_size
        );

        Ok(FileMetadata {
            name,
            size,
            hash: file_hash,
            chunk_size: self.chunk_size,
            chunks,
            merkle_root,
        })
    }

    /// Read chunk `index` from a file at its computed offset
    pub async fn read_chunk(&self, path: impl AsRef<Path>, index: usize) -> Result<Vec<u8>> {
        let path = path.as_ref();
        let mut file = tokio::fs::File::open(path).await.map_err(|e| {
            SwarmError::storage_full("failed to open file", path.display().to_string(), e.to_string())
        })?;

        let offset = index as u64 * self.chunk_size;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = vec![0u8; self.chunk_size as usize];
        let n = read_up_to(&mut file, &mut buf).await?;
        buf.truncate(n);

        debug!("read chunk {} ({} bytes) from {}", index, n, path.display());
        Ok(buf)
    }

    /// Write chunk `index` into a file at its computed offset
    pub async fn write_chunk(
        &self,
        path: impl AsRef<Path>,
        index: usize,
        data: &[u8],
    ) -> Result<()> {
        let path = path.as_ref();
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)
            .await
            .map_err(|e| {
                SwarmError::storage_full(
                    "failed to open file for chunk write",
                    path.display().to_string(),
                    e.to_string(),
                )
            })?;

        let offset = index as u64 * self.chunk_size;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// How many chunks a file of `file_size` bytes splits into
    pub fn chunk_count(&self, file_size: u64) -> usize {
        if file_size == 0 {
            return 0;
        }
        ((file_size + self.chunk_size - 1) / self.chunk_size) as usize
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

/// Fill `buf` as far as possible, stopping early only at EOF
async fn read_up_to(file: &mut tokio::fs::File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
