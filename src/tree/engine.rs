//! In-memory append-only Merkle tree (RFC 6962 shape)
//!
//! Node storage is one hash vector per level; position `i` of level `k`
//! covers leaves `[i * 2^k, (i+1) * 2^k)` and is written exactly once, when
//! that range completes. Appends only push, so every hash reachable at a
//! committed size stays valid forever - historical roots and proofs can be
//! read concurrently with ongoing appends.

use crate::error::{CoreError, CoreResult};
use crate::tree::hash::{node_hash, EMPTY_ROOT};
use crate::tree::proof::{ConsistencyProof, InclusionProof, Root};

/// Append-only Merkle tree over leaf hashes
#[derive(Debug, Default, Clone)]
pub struct MerkleTree {
    /// levels[0] = leaf hashes; levels[k+1] holds parents of complete pairs
    levels: Vec<Vec<[u8; 32]>>,
}

/// Largest power of two strictly less than `n` (n >= 2)
fn split_point(n: u64) -> u64 {
    debug_assert!(n >= 2);
    1u64 << (63 - (n - 1).leading_zeros())
}

impl MerkleTree {
    /// Create an empty tree
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leaves committed
    #[must_use]
    pub fn size(&self) -> u64 {
        self.levels.first().map_or(0, |l| l.len() as u64)
    }

    /// Append a leaf hash, updating the O(log N) parents it completes.
    /// Returns the new leaf's index.
    pub fn append(&mut self, leaf: [u8; 32]) -> u64 {
        if self.levels.is_empty() {
            self.levels.push(Vec::new());
        }
        let index = self.levels[0].len() as u64;
        self.levels[0].push(leaf);

        // Each completed pair rolls up into the next level.
        let mut level = 0;
        loop {
            let len = self.levels[level].len();
            if len % 2 != 0 {
                break;
            }
            let parent = node_hash(&self.levels[level][len - 2], &self.levels[level][len - 1]);
            if self.levels.len() == level + 1 {
                self.levels.push(Vec::new());
            }
            self.levels[level + 1].push(parent);
            level += 1;
        }

        index
    }

    /// Leaf hash at `index`
    pub fn leaf(&self, index: u64) -> CoreResult<[u8; 32]> {
        self.levels
            .first()
            .and_then(|l| l.get(index as usize))
            .copied()
            .ok_or(CoreError::OutOfRange {
                index,
                size: self.size(),
            })
    }

    /// Root of the tree as it stood at `size` leaves.
    ///
    /// Historical roots are pure functions of the first `size` leaves and
    /// never change under further appends.
    pub fn root_at(&self, size: u64) -> CoreResult<Root> {
        if size > self.size() {
            return Err(CoreError::OutOfRange {
                index: size,
                size: self.size(),
            });
        }
        if size == 0 {
            return Ok(Root {
                size: 0,
                hash: EMPTY_ROOT,
            });
        }
        Ok(Root {
            size,
            hash: self.subtree_root(0, size),
        })
    }

    /// Current root
    #[must_use]
    pub fn root(&self) -> Root {
        // size() is always a valid historical size
        self.root_at(self.size()).unwrap_or(Root {
            size: 0,
            hash: EMPTY_ROOT,
        })
    }

    /// RFC 6962 audit path for `leaf_index` within the tree at `tree_size`
    pub fn inclusion_proof(&self, leaf_index: u64, tree_size: u64) -> CoreResult<InclusionProof> {
        if tree_size > self.size() {
            return Err(CoreError::OutOfRange {
                index: tree_size,
                size: self.size(),
            });
        }
        if leaf_index >= tree_size {
            return Err(CoreError::OutOfRange {
                index: leaf_index,
                size: tree_size,
            });
        }

        let mut path = Vec::new();
        self.audit_path(leaf_index, 0, tree_size, &mut path);

        Ok(InclusionProof {
            leaf_index,
            tree_size,
            path,
        })
    }

    /// RFC 6962 consistency proof between two committed sizes
    pub fn consistency_proof(&self, old_size: u64, new_size: u64) -> CoreResult<ConsistencyProof> {
        if old_size == 0 || old_size > new_size {
            return Err(CoreError::InvalidRange {
                old: old_size,
                new: new_size,
            });
        }
        if new_size > self.size() {
            return Err(CoreError::OutOfRange {
                index: new_size,
                size: self.size(),
            });
        }

        let mut path = Vec::new();
        if old_size < new_size {
            self.subproof(old_size, 0, new_size, true, &mut path);
        }

        Ok(ConsistencyProof {
            old_size,
            new_size,
            path,
        })
    }

    /// Stored node hashes, one vector per level (for checkpointing)
    #[must_use]
    pub fn level_hashes(&self) -> &[Vec<[u8; 32]>] {
        &self.levels
    }

    /// Rebuild a tree from checkpointed level vectors.
    ///
    /// Validates the shape (each level holds exactly the complete pairs of
    /// the one below); returns `Corruption` otherwise.
    pub fn from_levels(levels: Vec<Vec<[u8; 32]>>) -> CoreResult<Self> {
        for k in 0..levels.len() {
            let expected = levels[k].len() / 2;
            let actual = levels.get(k + 1).map_or(0, Vec::len);
            if actual != expected {
                return Err(CoreError::Corruption(format!(
                    "checkpoint level {} holds {} nodes, expected {}",
                    k + 1,
                    actual,
                    expected
                )));
            }
        }
        if levels.last().is_some_and(|l| l.is_empty()) {
            return Err(CoreError::Corruption("checkpoint has empty top level".into()));
        }
        Ok(Self { levels })
    }

    /// MTH over leaves [start, start + size), served from stored nodes for
    /// complete aligned subtrees and recomputed for the ragged right edge.
    fn subtree_root(&self, start: u64, size: u64) -> [u8; 32] {
        if size.is_power_of_two() && start % size == 0 {
            let level = size.trailing_zeros() as usize;
            let pos = (start >> level) as usize;
            if let Some(hash) = self.levels.get(level).and_then(|l| l.get(pos)) {
                return *hash;
            }
        }
        // Ephemeral node over a non-power-of-two range
        let k = split_point(size);
        let left = self.subtree_root(start, k);
        let right = self.subtree_root(start + k, size - k);
        node_hash(&left, &right)
    }

    /// PATH(m, D[start : start+size]), sibling hashes leaf level first
    fn audit_path(&self, m: u64, start: u64, size: u64, out: &mut Vec<[u8; 32]>) {
        if size <= 1 {
            return;
        }
        let k = split_point(size);
        if m - start < k {
            self.audit_path(m, start, k, out);
            out.push(self.subtree_root(start + k, size - k));
        } else {
            self.audit_path(m, start + k, size - k, out);
            out.push(self.subtree_root(start, k));
        }
    }

    /// SUBPROOF(m, D[start : start+size], known_root)
    fn subproof(&self, m: u64, start: u64, size: u64, known_root: bool, out: &mut Vec<[u8; 32]>) {
        if m == size {
            if !known_root {
                out.push(self.subtree_root(start, size));
            }
            return;
        }
        let k = split_point(size);
        if m <= k {
            self.subproof(m, start, k, known_root, out);
            out.push(self.subtree_root(start + k, size - k));
        } else {
            self.subproof(m - k, start + k, size - k, false, out);
            out.push(self.subtree_root(start, k));
        }
    }
}
