//! Store and auditor configuration

use std::path::PathBuf;

/// Log store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the sqlite database file
    pub db_path: PathBuf,

    /// Save a tree checkpoint every N appends (0 = only on explicit request)
    pub checkpoint_every: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./verakv.db"),
            checkpoint_every: 1024,
        }
    }
}

impl StoreConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let db_path = std::env::var("VERAKV_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./verakv.db"));

        let checkpoint_every = std::env::var("VERAKV_CHECKPOINT_EVERY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1024);

        Self {
            db_path,
            checkpoint_every,
        }
    }
}

/// Auditor configuration
#[derive(Debug, Clone)]
pub struct AuditorConfig {
    /// Seconds between audit cycles
    pub interval_secs: u64,

    /// Maximum random jitter added to each cycle, in milliseconds
    pub jitter_ms: u64,
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            jitter_ms: 5_000,
        }
    }
}

impl AuditorConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let interval_secs = std::env::var("VERAKV_AUDIT_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let jitter_ms = std::env::var("VERAKV_AUDIT_JITTER_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);

        Self {
            interval_secs,
            jitter_ms,
        }
    }
}
