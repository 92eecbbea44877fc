//! Chain primitives used by share validation
//!
//! Hashing, the compact Merkle tree, targets, block headers and the
//! Cuckoo Cycle verifier.

pub mod cuckoo;
mod hash;
mod header;
mod merkle;
mod target;

pub use hash::{hash_from_hex, reversed, sha256d, sha256d_pair, Hash256};
pub use header::{BlockHeader, HEADER_SIZE};
pub use merkle::MerkleTree;
pub use target::Target;

/// Proof-of-work scheme a job is mined under
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PowAlgorithm {
    /// Double SHA-256 of the 80-byte header
    Sha256d,
    /// Cuckoo Cycle proof keyed from the header, hashed with double SHA-256
    CuckooCycle {
        /// Edge space is `2^edge_bits`
        edge_bits: u8,
        /// Number of edges in a proof
        proof_size: usize,
    },
}

impl Default for PowAlgorithm {
    fn default() -> Self {
        Self::Sha256d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pow_algorithm_serde() {
        let pow: PowAlgorithm =
            serde_json::from_str(r#"{"type":"cuckoo_cycle","edge_bits":24,"proof_size":42}"#)
                .unwrap();
        assert_eq!(
            pow,
            PowAlgorithm::CuckooCycle {
                edge_bits: 24,
                proof_size: 42
            }
        );

        let pow: PowAlgorithm = serde_json::from_str(r#"{"type":"sha256d"}"#).unwrap();
        assert_eq!(pow, PowAlgorithm::Sha256d);
    }
}
