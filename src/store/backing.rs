//! Sqlite persistence for the authenticated log
//!
//! One table of entries in append order plus a single-row checkpoint blob.
//! The backing stores bytes; all tree state is derived from it on open.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CoreError, CoreResult};
use crate::store::entry::{Entry, EntryKind};

/// Sqlite-backed entry log
#[derive(Debug)]
pub struct SqliteBacking {
    conn: Connection,
}

impl SqliteBacking {
    /// Open (or create) the database at `path` and ensure the schema
    pub fn open(path: &Path) -> CoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let backing = Self { conn };
        backing.initialize()?;
        Ok(backing)
    }

    /// In-memory database (tests)
    #[cfg(test)]
    pub fn open_in_memory() -> CoreResult<Self> {
        let backing = Self {
            conn: Connection::open_in_memory()?,
        };
        backing.initialize()?;
        Ok(backing)
    }

    /// Raw connection access for tests that tamper with persisted rows
    #[cfg(test)]
    pub(crate) fn conn_for_test(&self) -> &Connection {
        &self.conn
    }

    fn initialize(&self) -> CoreResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                idx   INTEGER PRIMARY KEY,
                kind  INTEGER NOT NULL,
                key   BLOB NOT NULL,
                value BLOB NOT NULL,
                ts    INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_entries_key ON entries(key, idx);
            CREATE TABLE IF NOT EXISTS tree_checkpoint (
                id         INTEGER PRIMARY KEY CHECK (id = 1),
                blob       BLOB NOT NULL,
                created_at INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Append one entry at its assigned index.
    ///
    /// The primary key rejects index reuse; a conflict here means the
    /// in-memory size counter and the database disagree.
    pub fn append_entry(&self, entry: &Entry) -> CoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO entries (idx, kind, key, value, ts) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.index as i64,
                    entry.kind as u8,
                    entry.key.as_slice(),
                    entry.value.as_slice(),
                    entry.timestamp,
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    CoreError::Corruption(format!("index {} already persisted", entry.index))
                }
                other => CoreError::Storage(other),
            })?;
        Ok(())
    }

    /// Number of persisted entries (the next index to assign)
    pub fn entry_count(&self) -> CoreResult<u64> {
        let max: Option<i64> =
            self.conn
                .query_row("SELECT MAX(idx) FROM entries", [], |row| row.get(0))?;
        Ok(max.map_or(0, |m| m as u64 + 1))
    }

    /// Fetch one entry by index
    pub fn get_entry(&self, index: u64) -> CoreResult<Option<Entry>> {
        let row = self
            .conn
            .query_row(
                "SELECT kind, key, value, ts FROM entries WHERE idx = ?1",
                params![index as i64],
                |row| {
                    Ok((
                        row.get::<_, u8>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((tag, key, value, ts)) => Ok(Some(Entry {
                index,
                kind: EntryKind::from_tag(tag)?,
                key,
                value,
                timestamp: ts,
            })),
        }
    }

    /// Scan all entries in index order, enforcing index continuity.
    ///
    /// A gap means an entry was deleted out from under us - fatal.
    pub fn scan_all<F>(&self, mut visit: F) -> CoreResult<u64>
    where
        F: FnMut(Entry) -> CoreResult<()>,
    {
        let mut stmt = self
            .conn
            .prepare("SELECT idx, kind, key, value, ts FROM entries ORDER BY idx")?;
        let mut rows = stmt.query([])?;

        let mut expected = 0u64;
        while let Some(row) = rows.next()? {
            let idx = row.get::<_, i64>(0)? as u64;
            if idx != expected {
                return Err(CoreError::Corruption(format!(
                    "index gap: expected {expected}, found {idx}"
                )));
            }
            let entry = Entry {
                index: idx,
                kind: EntryKind::from_tag(row.get::<_, u8>(1)?)?,
                key: row.get(2)?,
                value: row.get(3)?,
                timestamp: row.get(4)?,
            };
            visit(entry)?;
            expected += 1;
        }
        Ok(expected)
    }

    /// Store the checkpoint blob (replacing any previous one)
    pub fn save_checkpoint(&self, blob: &[u8]) -> CoreResult<()> {
        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        self.conn.execute(
            "INSERT OR REPLACE INTO tree_checkpoint (id, blob, created_at) VALUES (1, ?1, ?2)",
            params![blob, now],
        )?;
        Ok(())
    }

    /// Load the checkpoint blob, if one was ever saved
    pub fn load_checkpoint(&self) -> CoreResult<Option<Vec<u8>>> {
        let blob = self
            .conn
            .query_row("SELECT blob FROM tree_checkpoint WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(blob)
    }
}
