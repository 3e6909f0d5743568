//! Core error types

use thiserror::Error;

/// Main error type for the authenticated log core
#[derive(Debug, Error)]
pub enum CoreError {
    // ========== Range / Lookup Errors ==========
    /// Index or size outside the committed tree
    #[error("index {index} out of range for tree size {size}")]
    OutOfRange { index: u64, size: u64 },

    /// Key has no entries
    #[error("key not found: {0}")]
    NotFound(String),

    /// Malformed proof request (e.g. old size > new size, or zero old size)
    #[error("invalid proof range: old size {old}, new size {new}")]
    InvalidRange { old: u64, new: u64 },

    // ========== Integrity Errors ==========
    /// Persisted log is damaged: index gaps or hash mismatches on replay.
    /// Fatal to the store instance - writes are refused until resolved.
    #[error("log corruption: {0}")]
    Corruption(String),

    /// A proof failed to validate against a trusted root.
    /// Security-relevant: possible tampering, never a transient condition.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// Entry payload could not be decoded (wrong kind tag or truncated)
    #[error("malformed entry payload: {0}")]
    MalformedEntry(String),

    // ========== Collaborator Errors ==========
    /// External collaborator unreachable. Retryable by the caller.
    #[error("transport failure: {0}")]
    Transport(String),

    // ========== Storage Errors ==========
    /// Underlying sqlite failure
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// True for errors that signal damage to persisted state
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Corruption(_))
    }
}
