//! Open-time replay: rebuild tree and derived indexes from the entry log
//!
//! A valid checkpoint seeds the tree so only the log tail needs appending;
//! every persisted leaf is still re-hashed and cross-checked against the
//! seeded nodes, so a tampered entry surfaces as `Corruption` here rather
//! than as a wrong proof later.

use std::collections::{BTreeMap, HashMap};

use crate::error::{CoreError, CoreResult};
use crate::store::backing::SqliteBacking;
use crate::store::checkpoint::Checkpoint;
use crate::store::entry::{score_to_ordered, Entry, EntryKind, ZAddPayload};
use crate::tree::MerkleTree;

/// Key history index: key -> entry indices in append order
pub type KeyIndex = HashMap<Vec<u8>, Vec<u64>>;

/// Derived sorted-set index: set name -> (ordered score, member index) set
pub type ZSetIndex = HashMap<Vec<u8>, BTreeMap<(u64, u64), ()>>;

/// Everything the store derives from the persisted log
#[derive(Debug)]
pub struct ReplayState {
    pub tree: MerkleTree,
    pub keys: KeyIndex,
    pub zsets: ZSetIndex,
}

/// Fold one entry into the derived indexes
pub(crate) fn index_entry(keys: &mut KeyIndex, zsets: &mut ZSetIndex, entry: &Entry) -> CoreResult<()> {
    keys.entry(entry.key.clone()).or_default().push(entry.index);

    if entry.kind == EntryKind::ZAdd {
        let payload = ZAddPayload::decode(&entry.value).map_err(|e| {
            // We wrote this payload ourselves; failing to decode it is damage
            CoreError::Corruption(format!("entry {}: {e}", entry.index))
        })?;
        zsets
            .entry(payload.set)
            .or_default()
            .insert((score_to_ordered(payload.score), payload.target_index), ());
    }

    Ok(())
}

/// Replay the persisted log into tree + indexes
pub fn rebuild(backing: &SqliteBacking) -> CoreResult<ReplayState> {
    let count = backing.entry_count()?;

    let mut tree = load_seed_tree(backing, count)?;
    let seeded_size = tree.size();

    let mut keys = KeyIndex::new();
    let mut zsets = ZSetIndex::new();

    let replayed = backing.scan_all(|entry| {
        index_entry(&mut keys, &mut zsets, &entry)?;

        let leaf = entry.leaf_hash();
        if entry.index < seeded_size {
            if tree.leaf(entry.index)? != leaf {
                return Err(CoreError::Corruption(format!(
                    "leaf hash mismatch at index {} on replay",
                    entry.index
                )));
            }
        } else {
            tree.append(leaf);
        }
        Ok(())
    })?;

    if replayed != count || tree.size() != count {
        return Err(CoreError::Corruption(format!(
            "replay covered {replayed} of {count} entries (tree size {})",
            tree.size()
        )));
    }

    tracing::info!(
        entries = count,
        seeded = seeded_size,
        "log replay complete"
    );

    Ok(ReplayState { tree, keys, zsets })
}

/// Load and validate the checkpoint; any problem means an empty seed and a
/// full rebuild, logged at warn.
fn load_seed_tree(backing: &SqliteBacking, entry_count: u64) -> CoreResult<MerkleTree> {
    let Some(blob) = backing.load_checkpoint()? else {
        return Ok(MerkleTree::new());
    };

    let Some(checkpoint) = Checkpoint::decode(&blob) else {
        tracing::warn!("checkpoint unreadable (version or CRC mismatch), rebuilding tree");
        return Ok(MerkleTree::new());
    };

    if checkpoint.tree_size > entry_count {
        tracing::warn!(
            checkpoint_size = checkpoint.tree_size,
            entry_count,
            "checkpoint ahead of entry log, rebuilding tree"
        );
        return Ok(MerkleTree::new());
    }

    let root_hash = checkpoint.root_hash;
    match MerkleTree::from_levels(checkpoint.levels) {
        Ok(tree) if tree.root().hash == root_hash => Ok(tree),
        Ok(_) => {
            tracing::warn!("checkpoint root does not match its nodes, rebuilding tree");
            Ok(MerkleTree::new())
        }
        Err(e) => {
            tracing::warn!(error = %e, "checkpoint structurally invalid, rebuilding tree");
            Ok(MerkleTree::new())
        }
    }
}
