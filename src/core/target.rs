//! 256-bit proof-of-work targets and pool difficulty

use crate::error::{Error, Result};
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use std::fmt;

use super::hash::Hash256;

/// Difficulty-1 target (`0x00000000ffff` followed by zeros), big-endian
const DIFF1_TARGET: [u8; 32] = {
    let mut bytes = [0u8; 32];
    bytes[4] = 0xff;
    bytes[5] = 0xff;
    bytes
};

/// Fixed-point scale used when dividing by a fractional difficulty
const DIFFICULTY_SCALE: f64 = 4_294_967_296.0;

/// A 256-bit target stored big-endian; a hash meets it when `hash <= target`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Target([u8; 32]);

impl Target {
    /// Easiest possible target
    pub const MAX: Target = Target([0xff; 32]);

    /// Target of a difficulty-1 share
    pub const DIFF1: Target = Target(DIFF1_TARGET);

    /// Create a target from big-endian bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Big-endian bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a big-endian hex target (as `getblocktemplate` reports it)
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| Error::invalid_target(format!("Invalid hex: {}", e)))?;
        let array: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::invalid_target(format!("Expected 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(array))
    }

    /// Big-endian hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Expand compact `nBits` into a full target
    pub fn from_compact(bits: u32) -> Result<Self> {
        let exponent = (bits >> 24) as usize;
        let mantissa = bits & 0x007f_ffff;
        if bits & 0x0080_0000 != 0 && mantissa != 0 {
            return Err(Error::invalid_target(format!(
                "Negative compact target: {:08x}",
                bits
            )));
        }

        let value = if exponent <= 3 {
            BigUint::from(mantissa >> (8 * (3 - exponent)))
        } else {
            BigUint::from(mantissa) << (8 * (exponent - 3))
        };
        Self::from_biguint(&value)
            .ok_or_else(|| Error::invalid_target(format!("Compact target overflows: {:08x}", bits)))
    }

    /// Share target for a pool difficulty, clamped to [`Target::MAX`]
    pub fn from_difficulty(difficulty: f64) -> Result<Self> {
        if !difficulty.is_finite() || difficulty <= 0.0 {
            return Err(Error::invalid_target(format!(
                "Difficulty must be positive, got {}",
                difficulty
            )));
        }

        let diff1 = BigUint::from_bytes_be(&DIFF1_TARGET);
        if diff1.to_f64().unwrap_or(0.0) / difficulty >= 2f64.powi(256) {
            return Ok(Self::MAX);
        }

        let scaled = (difficulty * DIFFICULTY_SCALE).round().max(1.0);
        let divisor = BigUint::from(scaled as u128);
        let numerator = diff1 << 32u32;
        let value = numerator / divisor;
        Ok(Self::from_biguint(&value).unwrap_or(Self::MAX))
    }

    /// Approximate difficulty represented by this target
    pub fn to_difficulty(&self) -> f64 {
        let value = BigUint::from_bytes_be(&self.0);
        if value.is_zero() {
            return f64::INFINITY;
        }
        let diff1 = BigUint::from_bytes_be(&DIFF1_TARGET).to_f64().unwrap_or(0.0);
        diff1 / value.to_f64().unwrap_or(f64::INFINITY)
    }

    /// Check a hash in internal byte order against this target
    pub fn is_met_by(&self, hash: &Hash256) -> bool {
        // Internal order is little-endian; compare from the most significant byte.
        for (hash_byte, target_byte) in hash.iter().rev().zip(self.0.iter()) {
            match hash_byte.cmp(target_byte) {
                std::cmp::Ordering::Less => return true,
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Equal => continue,
            }
        }
        true
    }

    fn from_biguint(value: &BigUint) -> Option<Self> {
        let bytes = value.to_bytes_be();
        if bytes.len() > 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        Some(Self(out))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
