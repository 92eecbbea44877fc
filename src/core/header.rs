//! Block header assembly

use super::hash::{sha256d, Hash256};

/// Serialized size of a block header
pub const HEADER_SIZE: usize = 80;

/// Candidate block header rebuilt from a submitted share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,
    /// Previous block hash, internal byte order
    pub prev_hash: Hash256,
    /// Transaction Merkle root, internal byte order
    pub merkle_root: Hash256,
    /// Block timestamp
    pub time: u32,
    /// Compact network target
    pub bits: u32,
    /// Header nonce
    pub nonce: u32,
}

impl BlockHeader {
    /// Fixed on-wire layout, all integers little-endian
    pub fn serialize(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(&self.prev_hash);
        out[36..68].copy_from_slice(&self.merkle_root);
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Block hash, internal byte order
    pub fn hash(&self) -> Hash256 {
        sha256d(&self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::{hash_from_hex, reversed};

    #[test]
    fn test_genesis_block_hash() {
        let header = BlockHeader {
            version: 1,
            prev_hash: [0u8; 32],
            merkle_root: reversed(
                &hash_from_hex("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b")
                    .unwrap(),
            ),
            time: 1231006505,
            bits: 0x1d00ffff,
            nonce: 2083236893,
        };

        assert_eq!(
            hex::encode(reversed(&header.hash())),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn test_layout_offsets() {
        let header = BlockHeader {
            version: 0x20000000,
            prev_hash: [0x11; 32],
            merkle_root: [0x22; 32],
            time: 0x5a1b2c3d,
            bits: 0x1a2b3c4d,
            nonce: 0xdeadbeef,
        };
        let bytes = header.serialize();
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x00, 0x20]);
        assert_eq!(bytes[4], 0x11);
        assert_eq!(bytes[36], 0x22);
        assert_eq!(&bytes[68..72], &[0x3d, 0x2c, 0x1b, 0x5a]);
        assert_eq!(&bytes[76..80], &[0xef, 0xbe, 0xad, 0xde]);
    }
}
