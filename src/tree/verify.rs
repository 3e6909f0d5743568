//! Pure proof verification
//!
//! No I/O, no shared state. Both functions return `false` on ANY structural
//! mismatch (wrong path length, size arithmetic, size disagreement between
//! proof and root). Callers treat `false` as "reject, possible tampering",
//! never as a transient error.
//!
//! The fold algorithms follow RFC 9162 sections 2.1.3.2 and 2.1.4.2.

use crate::tree::hash::{leaf_hash, node_hash};
use crate::tree::proof::{ConsistencyProof, InclusionProof, Root};

/// Check that `leaf_data` is the leaf at `proof.leaf_index` of the tree
/// described by `trusted_root`.
#[must_use]
pub fn verify_inclusion(leaf_data: &[u8], proof: &InclusionProof, trusted_root: &Root) -> bool {
    if proof.tree_size != trusted_root.size {
        return false;
    }
    if proof.leaf_index >= proof.tree_size {
        return false;
    }

    let mut fnode = proof.leaf_index;
    let mut snode = proof.tree_size - 1;
    let mut hash = leaf_hash(leaf_data);

    for sibling in &proof.path {
        if snode == 0 {
            return false;
        }
        if fnode % 2 == 1 || fnode == snode {
            hash = node_hash(sibling, &hash);
            if fnode % 2 == 0 {
                // Right-most node at this level: climb past the levels it
                // spans alone.
                while fnode % 2 == 0 && fnode != 0 {
                    fnode >>= 1;
                    snode >>= 1;
                }
            }
        } else {
            hash = node_hash(&hash, sibling);
        }
        fnode >>= 1;
        snode >>= 1;
    }

    snode == 0 && hash == trusted_root.hash
}

/// Check that `trusted_old_root` describes a prefix of the tree described by
/// `claimed_new_root`, using the shared-node hashes in `proof`.
#[must_use]
pub fn verify_consistency(
    proof: &ConsistencyProof,
    trusted_old_root: &Root,
    claimed_new_root: &Root,
) -> bool {
    if proof.old_size != trusted_old_root.size || proof.new_size != claimed_new_root.size {
        return false;
    }
    let old = proof.old_size;
    let new = proof.new_size;
    if old == 0 || old > new {
        return false;
    }
    if old == new {
        return proof.path.is_empty() && trusted_old_root.hash == claimed_new_root.hash;
    }

    // When the old tree is a complete subtree of the new one, its root is
    // itself the first shared node; otherwise the proof carries it.
    let mut path = proof.path.iter();
    let (mut old_hash, mut new_hash) = if old.is_power_of_two() {
        (trusted_old_root.hash, trusted_old_root.hash)
    } else {
        match path.next() {
            Some(shared) => (*shared, *shared),
            None => return false,
        }
    };

    let mut fnode = old - 1;
    let mut snode = new - 1;
    while fnode % 2 == 1 {
        fnode >>= 1;
        snode >>= 1;
    }

    for shared in path {
        if snode == 0 {
            return false;
        }
        if fnode % 2 == 1 || fnode == snode {
            old_hash = node_hash(shared, &old_hash);
            new_hash = node_hash(shared, &new_hash);
            if fnode % 2 == 0 {
                while fnode % 2 == 0 && fnode != 0 {
                    fnode >>= 1;
                    snode >>= 1;
                }
            }
        } else {
            new_hash = node_hash(&new_hash, shared);
        }
        fnode >>= 1;
        snode >>= 1;
    }

    snode == 0 && old_hash == trusted_old_root.hash && new_hash == claimed_new_root.hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::engine::MerkleTree;

    fn build(n: usize) -> (Vec<Vec<u8>>, MerkleTree) {
        let leaves: Vec<Vec<u8>> = (0..n).map(|i| format!("entry-{i}").into_bytes()).collect();
        let mut tree = MerkleTree::new();
        for leaf in &leaves {
            tree.append(leaf_hash(leaf));
        }
        (leaves, tree)
    }

    #[test]
    fn test_inclusion_rejects_wrong_leaf_data() {
        let (_, tree) = build(8);
        let root = tree.root();
        let proof = tree.inclusion_proof(3, 8).unwrap();
        assert!(!verify_inclusion(b"entry-4", &proof, &root));
        assert!(verify_inclusion(b"entry-3", &proof, &root));
    }

    #[test]
    fn test_inclusion_rejects_size_mismatch_with_root() {
        let (leaves, tree) = build(8);
        let proof = tree.inclusion_proof(3, 7).unwrap();
        // Root for a different size than the proof was built against
        let root = tree.root_at(8).unwrap();
        assert!(!verify_inclusion(&leaves[3], &proof, &root));
    }

    #[test]
    fn test_inclusion_rejects_truncated_and_padded_paths() {
        let (leaves, tree) = build(8);
        let root = tree.root();
        let good = tree.inclusion_proof(3, 8).unwrap();

        let mut short = good.clone();
        short.path.pop();
        assert!(!verify_inclusion(&leaves[3], &short, &root));

        let mut long = good;
        long.path.push([0u8; 32]);
        assert!(!verify_inclusion(&leaves[3], &long, &root));
    }

    #[test]
    fn test_inclusion_rejects_flipped_sibling() {
        let (leaves, tree) = build(6);
        let root = tree.root();
        let mut proof = tree.inclusion_proof(2, 6).unwrap();
        proof.path[0][0] ^= 0x01;
        assert!(!verify_inclusion(&leaves[2], &proof, &root));
    }

    #[test]
    fn test_consistency_growth_by_one_leaf() {
        // Tree with 3 leaves has root R3; appending a 4th yields R4
        let (_, tree) = build(4);
        let r3 = tree.root_at(3).unwrap();
        let r4 = tree.root_at(4).unwrap();
        let proof = tree.consistency_proof(3, 4).unwrap();
        assert!(verify_consistency(&proof, &r3, &r4));

        // One flipped bit in the trusted old root must fail
        let mut bad_r3 = r3;
        bad_r3.hash[0] ^= 0x01;
        assert!(!verify_consistency(&proof, &bad_r3, &r4));
    }

    #[test]
    fn test_consistency_rejects_size_disagreement() {
        let (_, tree) = build(8);
        let proof = tree.consistency_proof(3, 8).unwrap();
        let r3 = tree.root_at(3).unwrap();
        let r8 = tree.root_at(8).unwrap();
        let r7 = tree.root_at(7).unwrap();

        assert!(verify_consistency(&proof, &r3, &r8));
        assert!(!verify_consistency(&proof, &r3, &r7));
        assert!(!verify_consistency(&proof, &r8, &r3));
    }

    #[test]
    fn test_consistency_equal_sizes() {
        let (_, tree) = build(5);
        let r5 = tree.root_at(5).unwrap();
        let proof = tree.consistency_proof(5, 5).unwrap();
        assert!(verify_consistency(&proof, &r5, &r5));

        let mut other = r5;
        other.hash[10] ^= 0xff;
        assert!(!verify_consistency(&proof, &r5, &other));
    }

    #[test]
    fn test_consistency_rejects_zero_old_size() {
        let proof = ConsistencyProof {
            old_size: 0,
            new_size: 4,
            path: vec![],
        };
        let zero = Root {
            size: 0,
            hash: crate::tree::hash::EMPTY_ROOT,
        };
        let (_, tree) = build(4);
        assert!(!verify_consistency(&proof, &zero, &tree.root()));
    }

    #[test]
    fn test_consistency_rejects_tampered_path() {
        let (_, tree) = build(9);
        let r5 = tree.root_at(5).unwrap();
        let r9 = tree.root_at(9).unwrap();
        let mut proof = tree.consistency_proof(5, 9).unwrap();
        assert!(verify_consistency(&proof, &r5, &r9));

        proof.path[1][31] ^= 0x80;
        assert!(!verify_consistency(&proof, &r5, &r9));
    }
}
