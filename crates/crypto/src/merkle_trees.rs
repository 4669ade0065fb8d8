//! Merkle tree over a round's member challenges.
//!
//! The root of this tree is the round statement. Leaves and interior nodes
//! are hashed with distinct prefixes so a member can never be confused with
//! an interior node.

use poet_types::Label;
use serde::{Deserialize, Serialize};

use crate::hash_functions::{HashFunction, HashKind};

const LEAF_PREFIX: &[u8] = &[0x00];
const NODE_PREFIX: &[u8] = &[0x01];

/// Merkle tree error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Cannot operate on empty tree")]
    EmptyTree,
    #[error("Invalid leaf index {index} (tree has {leaves} leaves)")]
    InvalidIndex { index: usize, leaves: usize },
}

/// Merkle tree implementation
pub struct MerkleTree {
    hash: HashKind,
    leaf_count: usize,
    /// All levels, leaf hashes first and the root level last.
    levels: Vec<Vec<Label>>,
}

impl MerkleTree {
    /// Create a new Merkle tree from leaves
    pub fn new<I, T>(hash: HashKind, leaves: I) -> Result<Self, MerkleError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let leaf_hashes: Vec<Label> = leaves
            .into_iter()
            .map(|leaf| hash.hash_parts(&[LEAF_PREFIX, leaf.as_ref()]))
            .collect();
        if leaf_hashes.is_empty() {
            return Err(MerkleError::EmptyTree);
        }

        let leaf_count = leaf_hashes.len();
        let mut levels = vec![leaf_hashes];
        while levels.last().map_or(0, Vec::len) > 1 {
            let current = levels.last().map(Vec::as_slice).unwrap_or_default();
            let next: Vec<Label> = current
                .chunks(2)
                .map(|pair| {
                    let left = &pair[0];
                    // Duplicate last element if odd number
                    let right = pair.get(1).unwrap_or(left);
                    hash.hash_parts(&[NODE_PREFIX, left, right])
                })
                .collect();
            levels.push(next);
        }

        Ok(Self {
            hash,
            leaf_count,
            levels,
        })
    }

    /// Convenience helper returning only the root.
    pub fn root_of<I, T>(hash: HashKind, leaves: I) -> Result<Label, MerkleError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        Ok(Self::new(hash, leaves)?.root())
    }

    /// Get the Merkle root
    pub fn root(&self) -> Label {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    /// Get the number of leaves
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Get the height of the tree
    pub fn height(&self) -> usize {
        self.levels.len() - 1
    }

    /// Generate a Merkle proof for a leaf
    pub fn generate_proof(&self, leaf_index: usize) -> Result<MerkleProof, MerkleError> {
        if leaf_index >= self.leaf_count {
            return Err(MerkleError::InvalidIndex {
                index: leaf_index,
                leaves: self.leaf_count,
            });
        }

        let mut path = Vec::with_capacity(self.height());
        let mut index = leaf_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            path.push(*level.get(sibling).unwrap_or(&level[index]));
            index /= 2;
        }

        Ok(MerkleProof {
            leaf_index,
            path,
            leaf_hash: self.levels[0][leaf_index],
        })
    }

    /// Verify a Merkle proof against `root` without holding the tree.
    pub fn verify_proof(hash: HashKind, root: &Label, leaf: &[u8], proof: &MerkleProof) -> bool {
        let mut current = hash.hash_parts(&[LEAF_PREFIX, leaf]);
        if current != proof.leaf_hash {
            return false;
        }

        let mut index = proof.leaf_index;
        for sibling in &proof.path {
            current = if index % 2 == 0 {
                hash.hash_parts(&[NODE_PREFIX, &current, sibling])
            } else {
                hash.hash_parts(&[NODE_PREFIX, sibling, &current])
            };
            index /= 2;
        }

        current == *root
    }

    pub fn hash_kind(&self) -> HashKind {
        self.hash
    }
}

/// Merkle proof structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub path: Vec<Label>,
    pub leaf_hash: Label,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn leaves(count: usize) -> Vec<Vec<u8>> {
        (0..count).map(|i| format!("leaf{i}").into_bytes()).collect()
    }

    #[test]
    fn test_merkle_tree_creation() {
        let tree = MerkleTree::new(HashKind::Sha256, leaves(4)).unwrap();
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.height(), 2);
        assert_ne!(tree.root(), [0u8; 32]);
    }

    #[test]
    fn test_empty_tree_is_rejected() {
        let empty: Vec<Vec<u8>> = Vec::new();
        assert_eq!(
            MerkleTree::new(HashKind::Sha256, empty).err(),
            Some(MerkleError::EmptyTree)
        );
    }

    #[test]
    fn test_single_leaf_root_is_leaf_hash() {
        let tree = MerkleTree::new(HashKind::Blake3, [b"only".to_vec()]).unwrap();
        let expected = HashKind::Blake3.hash_parts(&[LEAF_PREFIX, b"only"]);
        assert_eq!(tree.root(), expected);
        assert_eq!(tree.height(), 0);
    }

    #[test]
    fn test_root_depends_on_order_and_content() {
        let a = MerkleTree::root_of(HashKind::Sha256, leaves(3)).unwrap();
        let mut reversed = leaves(3);
        reversed.reverse();
        let b = MerkleTree::root_of(HashKind::Sha256, reversed).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, MerkleTree::root_of(HashKind::Sha256, leaves(3)).unwrap());
    }

    #[test]
    fn test_merkle_proof_rejects_wrong_leaf() {
        let data = leaves(5);
        let tree = MerkleTree::new(HashKind::Sha256, &data).unwrap();
        let proof = tree.generate_proof(2).unwrap();
        assert!(MerkleTree::verify_proof(HashKind::Sha256, &tree.root(), &data[2], &proof));
        assert!(!MerkleTree::verify_proof(HashKind::Sha256, &tree.root(), &data[3], &proof));
        assert!(tree.generate_proof(5).is_err());
    }

    proptest! {
        #[test]
        fn every_leaf_proves_membership(count in 1usize..40, pick in 0usize..40) {
            let data = leaves(count);
            let tree = MerkleTree::new(HashKind::Blake3, &data).unwrap();
            let index = pick % count;
            let proof = tree.generate_proof(index).unwrap();
            prop_assert!(MerkleTree::verify_proof(HashKind::Blake3, &tree.root(), &data[index], &proof));
        }
    }
}
