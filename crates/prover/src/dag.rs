//! Dependency schedule of the sequential-work DAG.
//!
//! The graph is a complete binary tree of depth `n` whose nodes are numbered
//! in post-order; that number is also the node's position in the round's
//! [`LabelStore`](poet_storage::LabelStore). An internal node depends on its
//! two children. A leaf additionally depends on every left sibling of the
//! nodes on its path to the root, i.e. on every subtree completed before it.
//! Labels therefore have to be produced strictly in position order, while
//! the live working set never exceeds `n + 1` labels.

use poet_crypto::HashKind;
use poet_types::Label;

use crate::error::{ProverError, Result};

/// Largest supported security parameter.
pub const MAX_N: u32 = 40;

/// Shape of the DAG for one security parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DagShape {
    n: u32,
}

/// One level of a leaf's authentication path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PathStep {
    /// Position of the sibling node.
    pub sibling: u64,
    /// Whether the sibling is the left child (and therefore a leaf parent).
    pub sibling_is_left: bool,
    /// Position of the common parent of the node and its sibling.
    pub parent: u64,
}

/// Number of nodes in a complete subtree of the given height.
pub fn subtree_size(height: u32) -> u64 {
    (1u64 << (height + 1)) - 1
}

impl DagShape {
    pub fn new(n: u32) -> Result<Self> {
        if n == 0 || n > MAX_N {
            return Err(ProverError::InvalidParameter(format!(
                "security parameter n must be in 1..={MAX_N}, got {n}"
            )));
        }
        Ok(Self { n })
    }

    pub fn n(&self) -> u32 {
        self.n
    }

    pub fn leaf_count(&self) -> u64 {
        1u64 << self.n
    }

    pub fn node_count(&self) -> u64 {
        subtree_size(self.n)
    }

    /// Position of phi, the last node computed.
    pub fn root_position(&self) -> u64 {
        self.node_count() - 1
    }

    pub fn leaf_position(&self, leaf: u64) -> u64 {
        2 * leaf - u64::from(leaf.count_ones())
    }

    /// Roots of the complete subtrees covering the first `len` positions,
    /// as `(height, position)` from the root side down.
    ///
    /// This is exactly the engine's stack after `len` labels were produced.
    pub fn frontier(&self, len: u64) -> Vec<(u32, u64)> {
        let mut roots = Vec::new();
        let mut remaining = len.min(self.node_count());
        let mut height = self.n;
        let mut offset = 0u64;

        while remaining > 0 {
            if remaining >= subtree_size(height) {
                roots.push((height, offset + subtree_size(height) - 1));
                break;
            }
            let child = subtree_size(height - 1);
            if remaining >= child {
                roots.push((height - 1, offset + child - 1));
                offset += child;
                remaining -= child;
            }
            height -= 1;
        }
        roots
    }

    /// Authentication path of `leaf`, ordered from the leaf level upwards.
    pub fn leaf_path(&self, leaf: u64) -> Vec<PathStep> {
        let mut steps = Vec::with_capacity(self.n as usize);
        let mut position = self.root_position();
        let mut offset = 0u64;

        for height in (1..=self.n).rev() {
            let child = subtree_size(height - 1);
            let left = offset + child - 1;
            let right = position - 1;
            if (leaf >> (height - 1)) & 1 == 0 {
                steps.push(PathStep {
                    sibling: right,
                    sibling_is_left: false,
                    parent: position,
                });
                position = left;
            } else {
                steps.push(PathStep {
                    sibling: left,
                    sibling_is_left: true,
                    parent: position,
                });
                offset += child;
                position = right;
            }
        }
        debug_assert_eq!(position, self.leaf_position(leaf));

        steps.reverse();
        steps
    }
}

/// `H(statement || position || parents...)`, parents root side first.
pub fn node_label(hash: HashKind, statement: &Label, position: u64, parents: &[Label]) -> Label {
    let mut hasher = hash.hasher();
    hasher.update(statement).update(&position.to_be_bytes());
    for parent in parents {
        hasher.update(parent);
    }
    hasher.finalize()
}
