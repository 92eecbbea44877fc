//! Hash primitives shared by the Merkle engine and header validation

use sha2::{Digest, Sha256};

/// A 32-byte hash in internal (little-endian) byte order
pub type Hash256 = [u8; 32];

/// SHA-256 applied twice
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Double hash of two concatenated 32-byte values
pub fn sha256d_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left);
    buf[32..].copy_from_slice(right);
    sha256d(&buf)
}

/// Return a copy of `hash` with its byte order reversed
pub fn reversed(hash: &Hash256) -> Hash256 {
    let mut out = *hash;
    out.reverse();
    out
}

/// Parse a 32-byte hash from hex without changing byte order
pub fn hash_from_hex(hex_str: &str) -> Option<Hash256> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256d_empty() {
        // sha256d("") is a well known constant
        assert_eq!(
            hex::encode(sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
    }

    #[test]
    fn test_pair_matches_concat() {
        let a = [0x11u8; 32];
        let b = [0x22u8; 32];
        let mut joined = a.to_vec();
        joined.extend_from_slice(&b);
        assert_eq!(sha256d_pair(&a, &b), sha256d(&joined));
    }

    #[test]
    fn test_reversed() {
        let mut h = [0u8; 32];
        h[0] = 1;
        let r = reversed(&h);
        assert_eq!(r[31], 1);
        assert_eq!(reversed(&r), h);
    }

    #[test]
    fn test_hash_from_hex_length() {
        assert!(hash_from_hex(&"00".repeat(32)).is_some());
        assert!(hash_from_hex(&"00".repeat(31)).is_none());
        assert!(hash_from_hex("zz").is_none());
    }
}
