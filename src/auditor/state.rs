//! Persisted auditor state, partitioned by server identity
//!
//! One row per audited server holding the last root that passed
//! verification. Updated only after a successful check, and only forward:
//! a size decrease or a hash change at unchanged size is rejected here as
//! a final guard even though the auditor alerts before ever attempting
//! either.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CoreError, CoreResult};
use crate::tree::Root;

/// Sqlite-backed store of last-known roots
pub struct AuditStateStore {
    conn: Mutex<Connection>,
}

impl AuditStateStore {
    /// Open (or create) the state database at `path`
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::from_conn(Connection::open(path)?)
    }

    /// In-memory state (tests, throwaway auditors)
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> CoreResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS audit_state (
                identity   TEXT PRIMARY KEY,
                tree_size  INTEGER NOT NULL,
                root_hash  BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Last verified root for a server, if any cycle ever succeeded
    pub fn last_known(&self, identity: &str) -> CoreResult<Option<Root>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT tree_size, root_hash FROM audit_state WHERE identity = ?1",
                params![identity],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((size, hash)) => {
                let hash: [u8; 32] = hash.try_into().map_err(|_| {
                    CoreError::Corruption(format!("stored root for {identity} has bad length"))
                })?;
                Ok(Some(Root {
                    size: size as u64,
                    hash,
                }))
            }
        }
    }

    /// Record a newly verified root. Monotonic: refuses to move backwards
    /// or to swap the root hash at an unchanged size.
    pub fn commit(&self, identity: &str, root: &Root) -> CoreResult<()> {
        let conn = self.lock()?;

        let existing: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT tree_size, root_hash FROM audit_state WHERE identity = ?1",
                params![identity],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((known_size, known_hash)) = existing {
            if (known_size as u64) > root.size {
                return Err(CoreError::VerificationFailed(format!(
                    "refusing to roll back {identity} from size {known_size} to {}",
                    root.size
                )));
            }
            if known_size as u64 == root.size && known_hash != root.hash {
                return Err(CoreError::VerificationFailed(format!(
                    "refusing to replace the root for {identity} at size {known_size}"
                )));
            }
        }

        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        conn.execute(
            "INSERT OR REPLACE INTO audit_state (identity, tree_size, root_hash, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![identity, root.size as i64, root.hash.as_slice(), now],
        )?;
        Ok(())
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Corruption("audit state lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(size: u64, fill: u8) -> Root {
        Root {
            size,
            hash: [fill; 32],
        }
    }

    #[test]
    fn test_state_round_trip_per_identity() {
        let state = AuditStateStore::open_in_memory().unwrap();
        assert!(state.last_known("a:1").unwrap().is_none());

        state.commit("a:1", &root(3, 1)).unwrap();
        state.commit("b:2", &root(8, 2)).unwrap();

        assert_eq!(state.last_known("a:1").unwrap().unwrap(), root(3, 1));
        assert_eq!(state.last_known("b:2").unwrap().unwrap(), root(8, 2));
    }

    #[test]
    fn test_commit_refuses_rollback() {
        let state = AuditStateStore::open_in_memory().unwrap();
        state.commit("s", &root(5, 1)).unwrap();

        let err = state.commit("s", &root(4, 1)).unwrap_err();
        assert!(matches!(err, CoreError::VerificationFailed(_)));

        // State untouched
        assert_eq!(state.last_known("s").unwrap().unwrap(), root(5, 1));
    }

    #[test]
    fn test_commit_refuses_hash_change_at_same_size() {
        let state = AuditStateStore::open_in_memory().unwrap();
        state.commit("s", &root(5, 1)).unwrap();

        // Two different roots at one size is a split view, even here
        let err = state.commit("s", &root(5, 2)).unwrap_err();
        assert!(matches!(err, CoreError::VerificationFailed(_)));
        assert_eq!(state.last_known("s").unwrap().unwrap(), root(5, 1));
    }

    #[test]
    fn test_commit_same_size_allowed() {
        let state = AuditStateStore::open_in_memory().unwrap();
        state.commit("s", &root(5, 1)).unwrap();
        state.commit("s", &root(5, 1)).unwrap();
        assert_eq!(state.last_known("s").unwrap().unwrap(), root(5, 1));
    }
}
