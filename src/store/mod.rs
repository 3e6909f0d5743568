//! Authenticated log store: entries, sqlite backing, checkpoints, recovery

pub mod backing;
pub mod checkpoint;
pub mod entry;
pub mod log;
pub mod recovery;

pub use entry::{Entry, EntryKind, ReferencePayload, ZAddPayload};
pub use log::{LogStore, ProvenEntry, ProvenReference};
