//! Versioned tree checkpoint format
//!
//! A checkpoint snapshots the tree's level vectors so restart can skip
//! recomputing interior nodes. The format is versioned and CRC-protected:
//! any mismatch discards the checkpoint and forces a full rebuild - never
//! silent corruption.
//!
//! Layout:
//! - magic (4 bytes) "VKCP"
//! - version (1 byte)
//! - tree_size (8 bytes, big-endian)
//! - root_hash (32 bytes)
//! - level_count (4 bytes, big-endian)
//! - per level: node_count (4 bytes) then node_count * 32 hash bytes
//! - body_crc (4 bytes, big-endian, CRC-32/iSCSI over everything above)

use crate::tree::{MerkleTree, Root};

/// Checkpoint file magic bytes
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"VKCP";

/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u8 = 1;

const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// Decoded checkpoint contents
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Tree size at snapshot time
    pub tree_size: u64,

    /// Root hash at snapshot time
    pub root_hash: [u8; 32],

    /// Node hashes, one vector per level
    pub levels: Vec<Vec<[u8; 32]>>,
}

impl Checkpoint {
    /// Snapshot a tree. Callers should only checkpoint non-empty trees.
    #[must_use]
    pub fn of_tree(tree: &MerkleTree, root: &Root) -> Self {
        Self {
            tree_size: root.size,
            root_hash: root.hash,
            levels: tree.level_hashes().to_vec(),
        }
    }

    /// Serialize with trailing CRC
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let node_total: usize = self.levels.iter().map(Vec::len).sum();
        let mut buf = Vec::with_capacity(53 + self.levels.len() * 4 + node_total * 32);

        buf.extend_from_slice(&CHECKPOINT_MAGIC);
        buf.push(CHECKPOINT_VERSION);
        buf.extend_from_slice(&self.tree_size.to_be_bytes());
        buf.extend_from_slice(&self.root_hash);
        buf.extend_from_slice(&(self.levels.len() as u32).to_be_bytes());
        for level in &self.levels {
            buf.extend_from_slice(&(level.len() as u32).to_be_bytes());
            for hash in level {
                buf.extend_from_slice(hash);
            }
        }

        let crc = CRC.checksum(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Deserialize and validate magic, version, structure, and CRC.
    ///
    /// Returns `None` on ANY mismatch; the caller falls back to a full
    /// rebuild. An unknown version is not an error, just an unusable
    /// checkpoint.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 53 {
            return None;
        }

        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let stored_crc = u32::from_be_bytes(crc_bytes.try_into().ok()?);
        if CRC.checksum(body) != stored_crc {
            return None;
        }

        if body[0..4] != CHECKPOINT_MAGIC {
            return None;
        }
        if body[4] != CHECKPOINT_VERSION {
            return None;
        }

        let tree_size = u64::from_be_bytes(body[5..13].try_into().ok()?);
        let root_hash: [u8; 32] = body[13..45].try_into().ok()?;
        let level_count = u32::from_be_bytes(body[45..49].try_into().ok()?) as usize;

        let mut offset = 49;
        let mut levels = Vec::with_capacity(level_count);
        for _ in 0..level_count {
            if body.len() < offset + 4 {
                return None;
            }
            let node_count =
                u32::from_be_bytes(body[offset..offset + 4].try_into().ok()?) as usize;
            offset += 4;
            if body.len() < offset + node_count * 32 {
                return None;
            }
            let mut level = Vec::with_capacity(node_count);
            for _ in 0..node_count {
                level.push(body[offset..offset + 32].try_into().ok()?);
                offset += 32;
            }
            levels.push(level);
        }
        if offset != body.len() {
            return None;
        }

        // Leaf count must agree with the declared size
        if levels.first().map_or(0, |l| l.len() as u64) != tree_size {
            return None;
        }

        Some(Self {
            tree_size,
            root_hash,
            levels,
        })
    }
}
