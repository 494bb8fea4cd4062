//! Content integrity layer
//!
//! Fixed-size chunking, per-chunk SHA-256 digests, and a binary Merkle
//! tree with inclusion proofs. Every byte that moves through the swarm
//! is verified against metadata produced here.

pub mod chunker;
pub mod hash;
pub mod merkle;

pub use chunker::{Chunker, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
pub use merkle::{ChunkVerifier, MerkleTree, ProofStep};
