//! Cuckoo Cycle proof verification
//!
//! A proof is a strictly ascending list of `proof_size` edge indices. Each
//! edge maps to one node on the U side and one on the V side of a bipartite
//! graph via siphash-2-4 keyed from the header. The proof is valid when those
//! edges form a single cycle visiting every edge exactly once.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::fmt;

type Blake2b256 = Blake2b<U32>;

/// Largest supported edge space
pub const MAX_EDGE_BITS: u8 = 32;

/// Reasons a cycle proof is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleError {
    /// Proof has the wrong number of edges
    WrongLength {
        /// Edges required
        expected: usize,
        /// Edges supplied
        actual: usize,
    },
    /// Edge index outside the edge space
    TooBig,
    /// Edges not strictly ascending
    TooSmall,
    /// Endpoints do not pair up
    NonMatching,
    /// A node has more than two incident proof edges
    Branch,
    /// The walk reached a node with no continuation
    DeadEnd,
    /// The walk closed before visiting every edge
    ShortCycle,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongLength { expected, actual } => {
                write!(f, "expected {} edges, got {}", expected, actual)
            }
            Self::TooBig => write!(f, "edge too big"),
            Self::TooSmall => write!(f, "edges not ascending"),
            Self::NonMatching => write!(f, "endpoints don't match up"),
            Self::Branch => write!(f, "branch in cycle"),
            Self::DeadEnd => write!(f, "cycle dead ends"),
            Self::ShortCycle => write!(f, "cycle too short"),
        }
    }
}

impl std::error::Error for CycleError {}

/// Siphash-2-4 keys derived from a header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SipKeys([u64; 4]);

impl SipKeys {
    /// Derive keys from blake2b-256 of the header bytes
    pub fn from_header(header: &[u8]) -> Self {
        let digest = Blake2b256::digest(header);
        let mut keys = [0u64; 4];
        for (key, chunk) in keys.iter_mut().zip(digest.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *key = u64::from_le_bytes(word);
        }
        Self(keys)
    }

    /// Siphash-2-4 of a single 64-bit word
    pub fn siphash24(&self, nonce: u64) -> u64 {
        let [mut v0, mut v1, mut v2, mut v3] = self.0;
        v3 ^= nonce;
        for _ in 0..2 {
            sip_round(&mut v0, &mut v1, &mut v2, &mut v3);
        }
        v0 ^= nonce;
        v2 ^= 0xff;
        for _ in 0..4 {
            sip_round(&mut v0, &mut v1, &mut v2, &mut v3);
        }
        v0 ^ v1 ^ v2 ^ v3
    }

    /// Endpoint of `edge` on side `uorv` (0 = U, 1 = V)
    pub fn sipnode(&self, edge: u64, uorv: u64, edge_mask: u64) -> u64 {
        self.siphash24(2 * edge + uorv) & edge_mask
    }
}

#[inline]
fn sip_round(v0: &mut u64, v1: &mut u64, v2: &mut u64, v3: &mut u64) {
    *v0 = v0.wrapping_add(*v1);
    *v2 = v2.wrapping_add(*v3);
    *v1 = v1.rotate_left(13);
    *v3 = v3.rotate_left(16);
    *v1 ^= *v0;
    *v3 ^= *v2;
    *v0 = v0.rotate_left(32);
    *v2 = v2.wrapping_add(*v1);
    *v0 = v0.wrapping_add(*v3);
    *v1 = v1.rotate_left(17);
    *v3 = v3.rotate_left(21);
    *v1 ^= *v2;
    *v3 ^= *v0;
    *v2 = v2.rotate_left(32);
}

/// Mask selecting valid edge indices and node ids
pub fn edge_mask(edge_bits: u8) -> u64 {
    if edge_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << edge_bits) - 1
    }
}

/// Verify that `edges` form a `proof_size`-cycle in the graph keyed by `keys`
pub fn verify(
    edges: &[u32],
    keys: &SipKeys,
    edge_bits: u8,
    proof_size: usize,
) -> Result<(), CycleError> {
    if edges.len() != proof_size || proof_size == 0 {
        return Err(CycleError::WrongLength {
            expected: proof_size,
            actual: edges.len(),
        });
    }

    let mask = edge_mask(edge_bits);
    let mut uvs = vec![0u64; 2 * proof_size];
    let (mut xor0, mut xor1) = (0u64, 0u64);

    for (n, &edge) in edges.iter().enumerate() {
        let edge = u64::from(edge);
        if edge > mask {
            return Err(CycleError::TooBig);
        }
        if n > 0 && edge <= u64::from(edges[n - 1]) {
            return Err(CycleError::TooSmall);
        }
        uvs[2 * n] = keys.sipnode(edge, 0, mask);
        uvs[2 * n + 1] = keys.sipnode(edge, 1, mask);
        xor0 ^= uvs[2 * n];
        xor1 ^= uvs[2 * n + 1];
    }
    if xor0 | xor1 != 0 {
        return Err(CycleError::NonMatching);
    }

    // Walk the cycle: from endpoint i find the unique other edge sharing it,
    // then continue from that edge's opposite endpoint.
    let len = 2 * proof_size;
    let mut visited = 0usize;
    let mut i = 0usize;
    loop {
        let mut j = i;
        let mut k = i;
        loop {
            k = (k + 2) % len;
            if k == i {
                break;
            }
            if uvs[k] == uvs[i] {
                if j != i {
                    return Err(CycleError::Branch);
                }
                j = k;
            }
        }
        if j == i {
            return Err(CycleError::DeadEnd);
        }
        i = j ^ 1;
        visited += 1;
        if i == 0 {
            break;
        }
    }

    if visited == proof_size {
        Ok(())
    } else {
        Err(CycleError::ShortCycle)
    }
}

/// Parse a comma-separated list of hex edge indices
pub fn parse_cycle(cycle: &str) -> Option<Vec<u32>> {
    cycle
        .split(',')
        .map(|edge| u32::from_str_radix(edge.trim(), 16).ok())
        .collect()
}

/// Bytes hashed to obtain the proof-of-work hash of a cycle
pub fn cycle_bytes(edges: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + edges.len() * 4);
    write_compact_size(&mut out, edges.len() as u64);
    for edge in edges {
        out.extend_from_slice(&edge.to_le_bytes());
    }
    out
}

fn write_compact_size(out: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => out.push(n as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&n.to_le_bytes());
        }
    }
}

/// Brute-force a 2-cycle for tiny graphs; test support only
#[cfg(test)]
pub(crate) fn find_two_cycle(keys: &SipKeys, edge_bits: u8) -> Option<Vec<u32>> {
    let mask = edge_mask(edge_bits);
    for a in 0..=mask {
        for b in (a + 1)..=mask {
            if keys.sipnode(a, 0, mask) == keys.sipnode(b, 0, mask)
                && keys.sipnode(a, 1, mask) == keys.sipnode(b, 1, mask)
            {
                return Some(vec![a as u32, b as u32]);
            }
        }
    }
    None
}
