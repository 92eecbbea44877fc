//! Hex decoding for Stratum submit fields

use crate::error::{Error, Result};

/// Decode a hex string to bytes
pub fn decode_hex(hex_str: &str) -> Result<Vec<u8>> {
    hex::decode(hex_str).map_err(|e| Error::stratum(format!("Invalid hex string: {}", e)))
}

/// Decode a hex string that must be exactly `len` bytes
pub fn decode_hex_exact(hex_str: &str, len: usize) -> Result<Vec<u8>> {
    if hex_str.len() != len * 2 {
        return Err(Error::stratum(format!(
            "Expected {} hex characters, got {}",
            len * 2,
            hex_str.len()
        )));
    }
    decode_hex(hex_str)
}

/// Parse a fixed-width big-endian hex encoding of a 32-bit integer
pub fn parse_u32_be(hex_str: &str) -> Result<u32> {
    let bytes = decode_hex_exact(hex_str, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("5a1b2c3d", 0x5a1b2c3d ; "plain")]
    #[test_case("DEADBEEF", 0xdeadbeef ; "uppercase")]
    #[test_case("00000000", 0 ; "zero")]
    fn test_parse_u32_be(input: &str, expected: u32) {
        assert_eq!(parse_u32_be(input).unwrap(), expected);
    }

    #[test_case("5a1b2c" ; "too short")]
    #[test_case("5a1b2c3d00" ; "too long")]
    #[test_case("5a1b2c3g" ; "bad digit")]
    #[test_case("0x5a1b2c" ; "prefixed")]
    fn test_parse_u32_be_rejects(input: &str) {
        assert!(parse_u32_be(input).is_err());
    }

    #[test]
    fn test_decode_hex_exact() {
        assert_eq!(decode_hex_exact("abcd", 2).unwrap(), vec![0xab, 0xcd]);
        assert!(decode_hex_exact("abcd", 4).is_err());
        assert!(decode_hex_exact("abc", 2).is_err());
    }
}
