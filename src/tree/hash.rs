//! Domain-separated SHA-256 hashing (RFC 6962 construction)
//!
//! Leaf and interior node hashes use distinct prefix bytes so a leaf can
//! never be confused with an internal node (second-preimage protection).

use sha2::{Digest, Sha256};

/// Prefix byte for leaf hashes
pub const LEAF_PREFIX: u8 = 0x00;

/// Prefix byte for interior node hashes
pub const NODE_PREFIX: u8 = 0x01;

/// Root of the empty tree: SHA-256 of the empty string.
///
/// A fixed constant rather than a prefixed hash, so it collides with
/// neither a single-leaf root nor any interior node.
pub const EMPTY_ROOT: [u8; 32] = [
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9,
    0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52,
    0xb8, 0x55,
];

/// Hash a leaf: `SHA-256(0x00 || data)`
#[must_use]
pub fn leaf_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash two children: `SHA-256(0x01 || left || right)`
#[must_use]
pub fn node_hash(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}
