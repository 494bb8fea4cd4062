//! SHA-256 helpers
//!
//! All hashes in the protocol travel as lowercase hex strings; raw
//! 32-byte digests only appear inside the Merkle tree.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Compute the SHA-256 digest of a byte slice as a lowercase hex string
pub fn digest_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the raw 32-byte SHA-256 digest of a byte slice
pub fn digest_raw(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the SHA-256 digest of a file, streaming in 64 KiB reads
pub async fn digest_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = tokio::fs::File::open(path.as_ref()).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Check whether `data` hashes to `expected_hex`
pub fn verify(data: &[u8], expected_hex: &str) -> bool {
    digest_hex(data) == expected_hex
}
