//! Append-only Merkle hash tree: engine, proof types, and pure verifiers

pub mod engine;
pub mod hash;
pub mod proof;
pub mod verify;

pub use engine::MerkleTree;
pub use hash::{leaf_hash, node_hash, EMPTY_ROOT};
pub use proof::{ConsistencyProof, InclusionProof, Root};
pub use verify::{verify_consistency, verify_inclusion};
