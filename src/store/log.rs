//! The authenticated log store
//!
//! Coordinates the sqlite backing, the in-memory Merkle tree, and the
//! derived indexes behind a single-writer discipline: appends serialize on
//! the inner write lock, proof reads snapshot committed state under the
//! read lock. Committed node hashes never change, so a proof taken at any
//! committed size stays valid during later appends.
//!
//! Lock order is always inner before backing.

use std::ops::{Bound, RangeBounds};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::StoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::store::backing::SqliteBacking;
use crate::store::checkpoint::Checkpoint;
use crate::store::entry::{
    ordered_to_score, score_to_ordered, Entry, EntryKind, ReferencePayload, ZAddPayload,
};
use crate::store::recovery::{self, index_entry, KeyIndex, ZSetIndex};
use crate::tree::{
    verify_consistency, verify_inclusion, ConsistencyProof, InclusionProof, MerkleTree, Root,
};

/// An entry plus the proof material a caller needs to verify it against a
/// root it already trusts. Verification is an explicit, separate step - see
/// [`LogStore::checked_get`] / [`LogStore::checked_put`] for the enforced
/// variant.
#[derive(Debug, Clone)]
pub struct ProvenEntry {
    /// The entry being proven
    pub entry: Entry,

    /// Tree head the proofs are valid for
    pub root: Root,

    /// Inclusion of `entry` in `root`
    pub inclusion: InclusionProof,

    /// Consistency from the caller's trusted size to `root` (absent when
    /// the caller trusts nothing yet)
    pub consistency: Option<ConsistencyProof>,
}

/// A resolved reference with proofs for both the pointer and its target
#[derive(Debug, Clone)]
pub struct ProvenReference {
    pub reference: Entry,
    pub target: Entry,
    pub root: Root,
    pub reference_proof: InclusionProof,
    pub target_proof: InclusionProof,
}

#[derive(Debug)]
struct Inner {
    tree: MerkleTree,
    keys: KeyIndex,
    zsets: ZSetIndex,
    appends_since_checkpoint: u64,
}

/// Tamper-evident append-only key-value store
#[derive(Debug)]
pub struct LogStore {
    config: StoreConfig,
    backing: Mutex<SqliteBacking>,
    inner: RwLock<Inner>,
    healthy: AtomicBool,
}

impl LogStore {
    /// Open the store, replaying the persisted log into memory.
    ///
    /// # Errors
    ///
    /// `Corruption` if the log has index gaps or hash mismatches; the store
    /// refuses to open over damaged data.
    pub fn open(config: StoreConfig) -> CoreResult<Self> {
        let backing = SqliteBacking::open(&config.db_path)?;
        let state = recovery::rebuild(&backing)?;

        tracing::info!(
            db = %config.db_path.display(),
            size = state.tree.size(),
            "log store opened"
        );

        Ok(Self {
            config,
            backing: Mutex::new(backing),
            inner: RwLock::new(Inner {
                tree: state.tree,
                keys: state.keys,
                zsets: state.zsets,
                appends_since_checkpoint: 0,
            }),
            healthy: AtomicBool::new(true),
        })
    }

    /// Open over an in-memory database (tests)
    #[cfg(test)]
    pub(crate) fn open_in_memory() -> CoreResult<Self> {
        let backing = SqliteBacking::open_in_memory()?;
        let state = recovery::rebuild(&backing)?;
        Ok(Self {
            config: StoreConfig {
                checkpoint_every: 0,
                ..StoreConfig::default()
            },
            backing: Mutex::new(backing),
            inner: RwLock::new(Inner {
                tree: state.tree,
                keys: state.keys,
                zsets: state.zsets,
                appends_since_checkpoint: 0,
            }),
            healthy: AtomicBool::new(true),
        })
    }

    // ========== Writes ==========

    /// Append a key-value entry. Returns its index and the new root.
    pub fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<(u64, Root)> {
        let (entry, root) = self.append(EntryKind::Put, key.to_vec(), value.to_vec())?;
        Ok((entry.index, root))
    }

    /// Append a reference entry pointing at `target_index`.
    ///
    /// The reference is an ordinary log entry, so it is provable like any
    /// other; `OutOfRange` if the target is not committed.
    pub fn add_reference(&self, ref_key: &[u8], target_index: u64) -> CoreResult<(u64, Root)> {
        let target = self.get_at(target_index)?;
        let payload = ReferencePayload {
            target_index,
            target_key: target.key,
        };
        let (entry, root) =
            self.append(EntryKind::Reference, ref_key.to_vec(), payload.encode())?;
        Ok((entry.index, root))
    }

    /// Append a sorted-set membership entry for `target_index`
    pub fn z_add(&self, set: &[u8], score: f64, target_index: u64) -> CoreResult<(u64, Root)> {
        let size = self.size()?;
        if target_index >= size {
            return Err(CoreError::OutOfRange {
                index: target_index,
                size,
            });
        }
        let payload = ZAddPayload {
            set: set.to_vec(),
            score,
            target_index,
        };
        let (entry, root) = self.append(EntryKind::ZAdd, set.to_vec(), payload.encode())?;
        Ok((entry.index, root))
    }

    /// SafeSet: append and return the proof material for the new entry.
    /// The caller verifies against its trusted root (or uses
    /// [`checked_put`](Self::checked_put)).
    pub fn verified_put(&self, key: &[u8], value: &[u8], trusted: &Root) -> CoreResult<ProvenEntry> {
        self.ensure_healthy()?;
        let mut inner = self.write_inner()?;
        let (entry, root) = self.append_locked(&mut inner, EntryKind::Put, key.to_vec(), value.to_vec())?;
        let inclusion = inner.tree.inclusion_proof(entry.index, root.size)?;
        let consistency = if trusted.size > 0 {
            Some(inner.tree.consistency_proof(trusted.size, root.size)?)
        } else {
            None
        };
        Ok(ProvenEntry {
            entry,
            root,
            inclusion,
            consistency,
        })
    }

    /// SafeSet with enforced verification: refuses to hand back the result
    /// unless both proofs validate against `trusted`.
    pub fn checked_put(&self, key: &[u8], value: &[u8], trusted: &Root) -> CoreResult<(u64, Root)> {
        let proven = self.verified_put(key, value, trusted)?;
        verify_proven(&proven, trusted)?;
        Ok((proven.entry.index, proven.root))
    }

    // ========== Reads ==========

    /// Most recent value for `key`. `NotFound` if the key has no entries.
    pub fn get(&self, key: &[u8]) -> CoreResult<(Vec<u8>, u64)> {
        let index = self.latest_index(key)?;
        let entry = self.load_entry(index)?;
        Ok((entry.value, index))
    }

    /// Entry at a log position. `OutOfRange` past the committed size.
    pub fn get_at(&self, index: u64) -> CoreResult<Entry> {
        let size = self.size()?;
        if index >= size {
            return Err(CoreError::OutOfRange { index, size });
        }
        self.load_entry(index)
    }

    /// All versions of `key` in append order
    pub fn history(&self, key: &[u8]) -> CoreResult<Vec<(u64, Vec<u8>)>> {
        self.history_from(key, 0)
    }

    /// Versions of `key` starting at log index `start_index`; lets a caller
    /// resume iteration where a previous call stopped.
    pub fn history_from(&self, key: &[u8], start_index: u64) -> CoreResult<Vec<(u64, Vec<u8>)>> {
        let indices: Vec<u64> = {
            let inner = self.read_inner()?;
            let all = inner
                .keys
                .get(key)
                .ok_or_else(|| CoreError::NotFound(display_key(key)))?;
            all.iter().copied().filter(|i| *i >= start_index).collect()
        };

        let mut out = Vec::with_capacity(indices.len());
        for index in indices {
            let entry = self.load_entry(index)?;
            out.push((index, entry.value));
        }
        Ok(out)
    }

    /// SafeGet: latest value plus the proof material to verify it
    pub fn verified_get(&self, key: &[u8], trusted: &Root) -> CoreResult<ProvenEntry> {
        let (index, root, inclusion, consistency) = {
            let inner = self.read_inner()?;
            let size = inner.tree.size();
            let index = *inner
                .keys
                .get(key)
                .and_then(|v| v.last())
                .ok_or_else(|| CoreError::NotFound(display_key(key)))?;
            let root = inner.tree.root_at(size)?;
            let inclusion = inner.tree.inclusion_proof(index, size)?;
            let consistency = if trusted.size > 0 {
                Some(inner.tree.consistency_proof(trusted.size, size)?)
            } else {
                None
            };
            (index, root, inclusion, consistency)
        };

        let entry = self.load_entry(index)?;
        Ok(ProvenEntry {
            entry,
            root,
            inclusion,
            consistency,
        })
    }

    /// SafeGet with enforced verification
    pub fn checked_get(&self, key: &[u8], trusted: &Root) -> CoreResult<(Vec<u8>, u64, Root)> {
        let proven = self.verified_get(key, trusted)?;
        verify_proven(&proven, trusted)?;
        Ok((proven.entry.value, proven.entry.index, proven.root))
    }

    /// Resolve a reference entry to its target
    pub fn resolve_reference(&self, index: u64) -> CoreResult<(Entry, Entry)> {
        let reference = self.get_at(index)?;
        if reference.kind != EntryKind::Reference {
            return Err(CoreError::MalformedEntry(format!(
                "entry {index} is not a reference"
            )));
        }
        let payload = ReferencePayload::decode(&reference.value)?;
        let target = self.get_at(payload.target_index)?;
        Ok((reference, target))
    }

    /// Resolve a reference and prove both the pointer and its destination
    /// against one tree head.
    pub fn proven_reference(&self, index: u64) -> CoreResult<ProvenReference> {
        let (reference, target) = self.resolve_reference(index)?;

        let inner = self.read_inner()?;
        let size = inner.tree.size();
        let root = inner.tree.root_at(size)?;
        let reference_proof = inner.tree.inclusion_proof(reference.index, size)?;
        let target_proof = inner.tree.inclusion_proof(target.index, size)?;

        Ok(ProvenReference {
            reference,
            target,
            root,
            reference_proof,
            target_proof,
        })
    }

    /// Members of a sorted set within a score range, ordered by
    /// (score, member index). A derived view: authenticity rides on the
    /// member entries' own inclusion proofs.
    pub fn scan_sorted_set<R: RangeBounds<f64>>(
        &self,
        set: &[u8],
        score_range: R,
    ) -> CoreResult<Vec<(f64, u64)>> {
        let inner = self.read_inner()?;
        let Some(members) = inner.zsets.get(set) else {
            return Ok(Vec::new());
        };

        let start = match score_range.start_bound() {
            Bound::Included(s) => Bound::Included((score_to_ordered(*s), u64::MIN)),
            Bound::Excluded(s) => Bound::Excluded((score_to_ordered(*s), u64::MAX)),
            Bound::Unbounded => Bound::Unbounded,
        };
        let end = match score_range.end_bound() {
            Bound::Included(s) => Bound::Included((score_to_ordered(*s), u64::MAX)),
            Bound::Excluded(s) => Bound::Excluded((score_to_ordered(*s), u64::MIN)),
            Bound::Unbounded => Bound::Unbounded,
        };

        Ok(members
            .range((start, end))
            .map(|(&(ordered, target), _)| (ordered_to_score(ordered), target))
            .collect())
    }

    // ========== Tree heads and proofs ==========

    /// Number of committed entries
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.read_inner()?.tree.size())
    }

    /// Current tree head
    pub fn current_root(&self) -> CoreResult<Root> {
        Ok(self.read_inner()?.tree.root())
    }

    /// Historical tree head at `size`
    pub fn root_at(&self, size: u64) -> CoreResult<Root> {
        self.read_inner()?.tree.root_at(size)
    }

    /// Audit path for `leaf_index` in the tree at `tree_size`
    pub fn inclusion_proof(&self, leaf_index: u64, tree_size: u64) -> CoreResult<InclusionProof> {
        self.read_inner()?.tree.inclusion_proof(leaf_index, tree_size)
    }

    /// Consistency proof between two committed sizes
    pub fn consistency_proof(&self, old_size: u64, new_size: u64) -> CoreResult<ConsistencyProof> {
        self.read_inner()?.tree.consistency_proof(old_size, new_size)
    }

    /// Current root plus a consistency proof from `from_size`, taken under
    /// one snapshot. The proof is absent when `from_size` is zero or ahead
    /// of the current size (the latter is the caller's tamper signal).
    pub fn root_bundle(&self, from_size: u64) -> CoreResult<(Root, Option<ConsistencyProof>)> {
        let inner = self.read_inner()?;
        let root = inner.tree.root();
        let consistency = if from_size > 0 && from_size <= root.size {
            Some(inner.tree.consistency_proof(from_size, root.size)?)
        } else {
            None
        };
        Ok((root, consistency))
    }

    // ========== Maintenance ==========

    /// Persist a tree checkpoint now
    pub fn save_checkpoint(&self) -> CoreResult<()> {
        let mut inner = self.write_inner()?;
        self.save_checkpoint_locked(&mut inner)
    }

    /// False once corruption has been detected; writes are refused.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    // ========== Internals ==========

    fn append(&self, kind: EntryKind, key: Vec<u8>, value: Vec<u8>) -> CoreResult<(Entry, Root)> {
        self.ensure_healthy()?;
        let mut inner = self.write_inner()?;
        self.append_locked(&mut inner, kind, key, value)
    }

    fn append_locked(
        &self,
        inner: &mut Inner,
        kind: EntryKind,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> CoreResult<(Entry, Root)> {
        let index = inner.tree.size();
        let entry = Entry {
            index,
            kind,
            key,
            value,
            timestamp: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
        };

        // Durable first: a crash after the insert replays cleanly on open.
        {
            let backing = self.lock_backing()?;
            if let Err(e) = backing.append_entry(&entry) {
                if e.is_fatal() {
                    self.poison();
                }
                return Err(e);
            }
        }

        inner.tree.append(entry.leaf_hash());
        index_entry(&mut inner.keys, &mut inner.zsets, &entry)?;
        let root = inner.tree.root();

        tracing::debug!(index, size = root.size, "entry appended");

        inner.appends_since_checkpoint += 1;
        if self.config.checkpoint_every > 0
            && inner.appends_since_checkpoint >= self.config.checkpoint_every
        {
            self.save_checkpoint_locked(inner)?;
        }

        Ok((entry, root))
    }

    fn save_checkpoint_locked(&self, inner: &mut Inner) -> CoreResult<()> {
        let root = inner.tree.root();
        if root.size == 0 {
            return Ok(());
        }
        let blob = Checkpoint::of_tree(&inner.tree, &root).encode();
        self.lock_backing()?.save_checkpoint(&blob)?;
        inner.appends_since_checkpoint = 0;
        tracing::debug!(size = root.size, "tree checkpoint saved");
        Ok(())
    }

    fn latest_index(&self, key: &[u8]) -> CoreResult<u64> {
        let inner = self.read_inner()?;
        inner
            .keys
            .get(key)
            .and_then(|v| v.last())
            .copied()
            .ok_or_else(|| CoreError::NotFound(display_key(key)))
    }

    /// Load a committed entry from the backing. A missing row at a
    /// committed index is corruption, not NotFound.
    fn load_entry(&self, index: u64) -> CoreResult<Entry> {
        let entry = self.lock_backing()?.get_entry(index)?;
        entry.ok_or_else(|| {
            self.poison();
            CoreError::Corruption(format!("committed entry {index} missing from backing"))
        })
    }

    fn ensure_healthy(&self) -> CoreResult<()> {
        if self.is_healthy() {
            Ok(())
        } else {
            Err(CoreError::Corruption(
                "store disabled by earlier corruption".into(),
            ))
        }
    }

    fn poison(&self) {
        if self.healthy.swap(false, Ordering::Relaxed) {
            tracing::error!("corruption detected, store disabled for writes");
        }
    }

    fn read_inner(&self) -> CoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| CoreError::Corruption("store state lock poisoned".into()))
    }

    fn write_inner(&self) -> CoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| CoreError::Corruption("store state lock poisoned".into()))
    }

    fn lock_backing(&self) -> CoreResult<MutexGuard<'_, SqliteBacking>> {
        self.backing
            .lock()
            .map_err(|_| CoreError::Corruption("backing lock poisoned".into()))
    }
}

/// Run both verification steps on proof material returned by a safe
/// operation. Failure is `VerificationFailed` - a security signal, distinct
/// from NotFound or transport trouble.
fn verify_proven(proven: &ProvenEntry, trusted: &Root) -> CoreResult<()> {
    if !verify_inclusion(&proven.entry.leaf_bytes(), &proven.inclusion, &proven.root) {
        return Err(CoreError::VerificationFailed(format!(
            "inclusion proof rejected for entry {}",
            proven.entry.index
        )));
    }
    if trusted.size > 0 {
        let Some(consistency) = &proven.consistency else {
            return Err(CoreError::VerificationFailed(
                "server omitted the consistency proof".into(),
            ));
        };
        if !verify_consistency(consistency, trusted, &proven.root) {
            return Err(CoreError::VerificationFailed(format!(
                "consistency proof rejected between sizes {} and {}",
                trusted.size, proven.root.size
            )));
        }
    }
    Ok(())
}

fn display_key(key: &[u8]) -> String {
    match std::str::from_utf8(key) {
        Ok(s) => s.to_string(),
        Err(_) => hex::encode(key),
    }
}
