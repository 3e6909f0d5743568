//! Continuous tamper-evidence auditing of remote (or local) log servers

pub mod job;
pub mod source;
pub mod state;

pub use job::{Alert, AlertReason, AlertSink, Auditor, CycleOutcome};
pub use source::{LocalSource, RootBundle, TreeSource};
pub use state::AuditStateStore;
