//! Binary Merkle tree over chunk hashes
//!
//! Nodes live in an index-based arena; parent links are indices, which
//! keeps proof construction a simple walk without reference cycles.
//! Levels with an odd node count duplicate their last node. Parent hash
//! is `SHA-256(left || right)` over the raw 32-byte child digests.

use crate::content::hash;
use crate::error::SwarmError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One step of an inclusion proof: a sibling digest and which side it sits on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Raw sibling digest
    #[serde(with = "hex::serde")]
    pub hash: [u8; 32],
    /// True when the sibling is the left operand of the parent hash
    pub is_left: bool,
}

/// A node in the arena
#[derive(Debug, Clone)]
struct MerkleNode {
    hash: [u8; 32],
    left: Option<usize>,
    right: Option<usize>,
    parent: Option<usize>,
}

/// Merkle tree over a fixed set of leaf hashes
#[derive(Debug, Clone)]
pub struct MerkleTree {
    nodes: Vec<MerkleNode>,
    leaves: Vec<usize>,
    root: usize,
}

impl MerkleTree {
    /// Build a tree from pre-computed raw leaf digests
    pub fn from_leaf_hashes(leaf_hashes: &[[u8; 32]]) -> Result<Self> {
        if leaf_hashes.is_empty() {
            return Err(SwarmError::config("no leaf hashes provided").into());
        }

        let mut nodes: Vec<MerkleNode> = leaf_hashes
            .iter()
            .map(|h| MerkleNode {
                hash: *h,
                left: None,
                right: None,
                parent: None,
            })
            .collect();
        let leaves: Vec<usize> = (0..nodes.len()).collect();

        let mut level: Vec<usize> = leaves.clone();
        while level.len() > 1 {
            // Duplicate the trailing node so every parent has two children
            if level.len() % 2 != 0 {
                let last = level[level.len() - 1];
                let dup = nodes.len();
                nodes.push(MerkleNode {
                    hash: nodes[last].hash,
                    left: None,
                    right: None,
                    parent: None,
                });
                level.push(dup);
            }

            let mut next = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                let (left, right) = (pair[0], pair[1]);
                let parent_hash = combine(&nodes[left].hash, &nodes[right].hash);
                let parent = nodes.len();
                nodes.push(MerkleNode {
                    hash: parent_hash,
                    left: Some(left),
                    right: Some(right),
                    parent: None,
                });
                nodes[left].parent = Some(parent);
                nodes[right].parent = Some(parent);
                next.push(parent);
            }
            level = next;
        }

        let root = level[0];
        Ok(Self { nodes, leaves, root })
    }

    /// Build a tree by hashing raw data blocks into leaves first
    pub fn from_blocks(blocks: &[&[u8]]) -> Result<Self> {
        let leaf_hashes: Vec<[u8; 32]> = blocks.iter().map(|b| hash::digest_raw(b)).collect();
        Self::from_leaf_hashes(&leaf_hashes)
    }

    /// Number of leaves (before any duplication)
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// The raw root digest
    pub fn root(&self) -> [u8; 32] {
        self.nodes[self.root].hash
    }

    /// The root digest as a lowercase hex string
    pub fn root_hex(&self) -> String {
        hex::encode(self.root())
    }

    /// The raw digest of leaf `index`
    pub fn leaf_hash(&self, index: usize) -> Result<[u8; 32]> {
        let node = self
            .leaves
            .get(index)
            .ok_or_else(|| SwarmError::not_found_resource("leaf index out of range", index.to_string()))?;
        Ok(self.nodes[*node].hash)
    }

    /// Inclusion proof for leaf `index`: sibling steps ordered leaf to root
    pub fn proof(&self, index: usize) -> Result<Vec<ProofStep>> {
        let mut node = *self
            .leaves
            .get(index)
            .ok_or_else(|| SwarmError::not_found_resource("leaf index out of range", index.to_string()))?;

        let mut proof = Vec::new();
        while let Some(parent) = self.nodes[node].parent {
            let (left, right) = (
                self.nodes[parent].left.expect("parent has left child"),
                self.nodes[parent].right.expect("parent has right child"),
            );
            if left == node {
                proof.push(ProofStep {
                    hash: self.nodes[right].hash,
                    is_left: false,
                });
            } else {
                proof.push(ProofStep {
                    hash: self.nodes[left].hash,
                    is_left: true,
                });
            }
            node = parent;
        }

        Ok(proof)
    }

    /// Check that `data` matches leaf `index` directly
    pub fn verify_leaf(&self, index: usize, data: &[u8]) -> bool {
        match self.leaves.get(index) {
            Some(node) => self.nodes[*node].hash == hash::digest_raw(data),
            None => false,
        }
    }
}

/// Hash two child digests into their parent digest
fn combine(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Re-walk an inclusion proof from raw data; true when it reconstructs `root`
pub fn verify_proof(data: &[u8], proof: &[ProofStep], root: &[u8; 32]) -> bool {
    verify_proof_with_hash(&hash::digest_raw(data), proof, root)
}

/// Re-walk an inclusion proof from a pre-computed leaf digest
pub fn verify_proof_with_hash(leaf_hash: &[u8; 32], proof: &[ProofStep], root: &[u8; 32]) -> bool {
    let mut current = *leaf_hash;
    for step in proof {
        current = if step.is_left {
            combine(&step.hash, &current)
        } else {
            combine(&current, &step.hash)
        };
    }
    &current == root
}

/// Verifier for a fixed chunk set with all proofs precomputed
#[derive(Debug, Clone)]
pub struct ChunkVerifier {
    root: [u8; 32],
    proofs: Vec<Vec<ProofStep>>,
}

impl ChunkVerifier {
    /// Build a verifier from the chunk leaf digests
    pub fn new(chunk_hashes: &[[u8; 32]]) -> Result<Self> {
        let tree = MerkleTree::from_leaf_hashes(chunk_hashes)?;
        let proofs = (0..tree.leaf_count())
            .map(|i| tree.proof(i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            root: tree.root(),
            proofs,
        })
    }

    /// The raw Merkle root
    pub fn root(&self) -> [u8; 32] {
        self.root
    }

    /// The Merkle root as hex
    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }

    /// Verify a chunk's bytes against the tree
    pub fn verify_chunk(&self, index: usize, data: &[u8]) -> bool {
        match self.proofs.get(index) {
            Some(proof) => verify_proof(data, proof, &self.root),
            None => false,
        }
    }

    /// Verify a chunk by its pre-computed digest
    pub fn verify_chunk_hash(&self, index: usize, chunk_hash: &[u8; 32]) -> bool {
        match self.proofs.get(index) {
            Some(proof) => verify_proof_with_hash(chunk_hash, proof, &self.root),
            None => false,
        }
    }

    /// The proof for chunk `index`, if in range
    pub fn proof(&self, index: usize) -> Option<&[ProofStep]> {
        self.proofs.get(index).map(|p| p.as_slice())
    }
}
