//! verakv - tamper-evident, append-only key-value store
//!
//! Every write becomes a leaf in an RFC 6962-style Merkle tree. Clients
//! holding a previously observed root can verify reads and writes without
//! trusting the server; the auditor watches a server's root history for
//! consistency over time.

pub mod auditor;
pub mod config;
pub mod error;
pub mod store;
pub mod tree;

// Re-exports
pub use auditor::{Alert, AlertReason, AlertSink, AuditStateStore, Auditor, LocalSource, TreeSource};
pub use config::{AuditorConfig, StoreConfig};
pub use error::{CoreError, CoreResult};
pub use store::{Entry, EntryKind, LogStore, ProvenEntry, ProvenReference};
pub use tree::{
    verify_consistency, verify_inclusion, ConsistencyProof, InclusionProof, MerkleTree, Root,
};
