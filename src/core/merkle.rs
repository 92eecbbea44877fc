//! Compact Merkle tree for coinbase-first root recomputation
//!
//! The pool knows every transaction of a block template except the coinbase,
//! whose hash changes with each extranonce. [`MerkleTree`] keeps only the
//! hashes sitting next to the coinbase path ("steps"), one per tree level, so
//! the root can be refolded from any coinbase hash in `O(log n)`.
//!
//! All hashes are in internal byte order. Presenting the root in display order
//! is a byte reversal, done by [`MerkleTree::merkle_root`].

use super::hash::{reversed, sha256d_pair, Hash256};

/// Steps needed to fold a coinbase hash up to the Merkle root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    steps: Vec<Hash256>,
}

impl MerkleTree {
    /// Build the tree from transaction hashes, coinbase excluded
    pub fn new(hashes: &[Hash256]) -> Self {
        // Slot 0 stands for the coinbase, which is unknown at this point.
        let mut level: Vec<Option<Hash256>> = std::iter::once(None)
            .chain(hashes.iter().copied().map(Some))
            .collect();
        let mut steps = Vec::new();

        while level.len() > 1 {
            if let Some(step) = level[1] {
                steps.push(step);
            }
            if level.len() % 2 == 1 {
                let last = level[level.len() - 1];
                level.push(last);
            }

            let mut next = Vec::with_capacity(level.len() / 2);
            next.push(None);
            for pair in level[2..].chunks_exact(2) {
                if let (Some(left), Some(right)) = (pair[0], pair[1]) {
                    next.push(Some(sha256d_pair(&left, &right)));
                }
            }
            level = next;
        }

        Self { steps }
    }

    /// Steps in folding order
    pub fn steps(&self) -> &[Hash256] {
        &self.steps
    }

    /// Steps hex-encoded, as sent in `mining.notify`
    pub fn branches(&self) -> Vec<String> {
        self.steps.iter().map(hex::encode).collect()
    }

    /// Number of tree levels above the leaves
    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    /// Fold `first` through every step; the result is in internal byte order
    pub fn with_first(&self, first: &Hash256) -> Hash256 {
        self.steps
            .iter()
            .fold(*first, |acc, step| sha256d_pair(&acc, step))
    }

    /// Folded root in display byte order
    pub fn merkle_root(&self, first: &Hash256) -> Hash256 {
        reversed(&self.with_first(first))
    }
}
