//! Collaborator seam: where audited roots come from
//!
//! The transport layer (gRPC, HTTP, whatever) implements [`TreeSource`];
//! the auditor only sees roots and proofs. [`LocalSource`] audits an
//! in-process store, which is also what the tests use.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::store::LogStore;
use crate::tree::{ConsistencyProof, Root};

/// A server's current root plus the consistency proof from the size the
/// auditor asked about. The proof is absent on first contact
/// (`from_size == 0`) or when the server cannot produce one - the auditor
/// decides what that means.
#[derive(Debug, Clone)]
pub struct RootBundle {
    pub root: Root,
    pub consistency: Option<ConsistencyProof>,
}

/// One audited server
#[async_trait]
pub trait TreeSource: Send + Sync {
    /// Stable server identity (e.g. "host:port"); partitions persisted
    /// auditor state.
    fn identity(&self) -> &str;

    /// Fetch the current root and a consistency proof from `from_size`.
    /// Transport problems surface as `CoreError::Transport`.
    async fn latest_root(&self, from_size: u64) -> CoreResult<RootBundle>;
}

/// In-process source over a local store
pub struct LocalSource {
    identity: String,
    store: Arc<LogStore>,
}

impl LocalSource {
    pub fn new(identity: impl Into<String>, store: Arc<LogStore>) -> Self {
        Self {
            identity: identity.into(),
            store,
        }
    }
}

#[async_trait]
impl TreeSource for LocalSource {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn latest_root(&self, from_size: u64) -> CoreResult<RootBundle> {
        let (root, consistency) = self.store.root_bundle(from_size)?;
        Ok(RootBundle { root, consistency })
    }
}
