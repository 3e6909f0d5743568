//! Periodic audit cycle against one server
//!
//! Each cycle fetches the server's current root plus a consistency proof
//! from the last verified size, verifies, and either advances the persisted
//! state or raises an alert. State updates happen only after verification
//! succeeds, so a cancelled cycle never leaves partial state behind.
//! Auditors for different servers are independent tasks.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::interval;

use crate::auditor::source::TreeSource;
use crate::auditor::state::AuditStateStore;
use crate::config::AuditorConfig;
use crate::error::CoreResult;
use crate::tree::{verify_consistency, Root};

/// Why an audit cycle rejected a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertReason {
    /// Fetch failed; no conclusion about tamper-evidence
    Unreachable,

    /// Server reported a smaller tree than previously verified
    RootShrunk,

    /// Same size as before but a different root hash
    SplitView,

    /// Server grew but did not supply a consistency proof
    MissingProof,

    /// Consistency proof failed verification
    InconsistentRoot,
}

/// An audit failure, delivered to the reporting sink
#[derive(Debug, Clone)]
pub struct Alert {
    pub identity: String,
    pub reason: AlertReason,
    pub detail: String,
}

/// Where alerts go. Implementations must not block for long; slow delivery
/// belongs on the sink's side of the seam.
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: Alert);
}

/// What a single cycle concluded
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No prior state (or only an empty root on record); the root was
    /// accepted unconditionally
    FirstContact(Root),

    /// Consistency verified; state advanced
    Advanced { from: u64, to: u64 },

    /// Same root as last time
    Unchanged,

    /// Verification or fetch failed; state untouched
    Alerted(AlertReason),
}

/// Continuous auditor for one server
pub struct Auditor {
    source: Arc<dyn TreeSource>,
    state: Arc<AuditStateStore>,
    sink: Arc<dyn AlertSink>,
    config: AuditorConfig,
}

impl Auditor {
    pub fn new(
        source: Arc<dyn TreeSource>,
        state: Arc<AuditStateStore>,
        sink: Arc<dyn AlertSink>,
        config: AuditorConfig,
    ) -> Self {
        Self {
            source,
            state,
            sink,
            config,
        }
    }

    /// Run cycles until the shutdown signal arrives.
    ///
    /// An in-flight cycle is dropped at its next await point on shutdown;
    /// persisted state only ever changes after a completed verification.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cycle = async {
                        self.jitter_delay().await;
                        self.run_cycle().await
                    };
                    tokio::select! {
                        result = cycle => {
                            if let Err(e) = result {
                                tracing::error!(
                                    identity = self.source.identity(),
                                    error = %e,
                                    "audit cycle failed"
                                );
                            }
                        }
                        _ = shutdown.recv() => {
                            tracing::info!(identity = self.source.identity(), "auditor shutting down");
                            return;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!(identity = self.source.identity(), "auditor shutting down");
                    return;
                }
            }
        }
    }

    /// One fetch-verify-commit cycle. Returns Err only for local state
    /// trouble; server misbehavior becomes `CycleOutcome::Alerted`.
    pub async fn run_cycle(&self) -> CoreResult<CycleOutcome> {
        let identity = self.source.identity();
        // An empty root carries no history to defend: no consistency proof
        // from size 0 exists, and any later root extends the empty tree.
        // Treat it like first contact until the server commits something.
        let known = self.state.last_known(identity)?.filter(|r| r.size > 0);
        let from_size = known.map_or(0, |r| r.size);

        let bundle = match self.source.latest_root(from_size).await {
            Ok(bundle) => bundle,
            Err(e) => {
                return Ok(self.raise(AlertReason::Unreachable, e.to_string()));
            }
        };

        let Some(known) = known else {
            // First contact: nothing to check against, accept and record
            self.state.commit(identity, &bundle.root)?;
            tracing::info!(identity, size = bundle.root.size, "first root recorded");
            return Ok(CycleOutcome::FirstContact(bundle.root));
        };

        if bundle.root.size < known.size {
            return Ok(self.raise(
                AlertReason::RootShrunk,
                format!("verified size {} but server reports {}", known.size, bundle.root.size),
            ));
        }

        if bundle.root.size == known.size {
            if bundle.root.hash != known.hash {
                return Ok(self.raise(
                    AlertReason::SplitView,
                    format!("two different roots at size {}", known.size),
                ));
            }
            return Ok(CycleOutcome::Unchanged);
        }

        let Some(proof) = &bundle.consistency else {
            return Ok(self.raise(
                AlertReason::MissingProof,
                format!(
                    "no consistency proof for growth {} -> {}",
                    known.size, bundle.root.size
                ),
            ));
        };

        if !verify_consistency(proof, &known, &bundle.root) {
            return Ok(self.raise(
                AlertReason::InconsistentRoot,
                format!(
                    "consistency proof rejected for {} -> {}",
                    known.size, bundle.root.size
                ),
            ));
        }

        self.state.commit(identity, &bundle.root)?;
        tracing::debug!(
            identity,
            from = known.size,
            to = bundle.root.size,
            "audit cycle verified"
        );
        Ok(CycleOutcome::Advanced {
            from: known.size,
            to: bundle.root.size,
        })
    }

    fn raise(&self, reason: AlertReason, detail: String) -> CycleOutcome {
        let identity = self.source.identity().to_string();
        tracing::warn!(identity = %identity, ?reason, detail = %detail, "audit alert");
        self.sink.alert(Alert {
            identity,
            reason,
            detail,
        });
        CycleOutcome::Alerted(reason)
    }

    async fn jitter_delay(&self) {
        if self.config.jitter_ms == 0 {
            return;
        }
        let jitter = rand::thread_rng().gen_range(0..=self.config.jitter_ms);
        tokio::time::sleep(Duration::from_millis(jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auditor::source::{RootBundle, TreeSource};
    use crate::error::CoreError;
    use crate::tree::ConsistencyProof;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Source that replays a script of responses
    struct ScriptedSource {
        responses: Mutex<VecDeque<CoreResult<RootBundle>>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<CoreResult<RootBundle>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl TreeSource for ScriptedSource {
        fn identity(&self) -> &str {
            "scripted:0"
        }

        async fn latest_root(&self, _from_size: u64) -> CoreResult<RootBundle> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("script exhausted")
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        alerts: Mutex<Vec<Alert>>,
    }

    impl AlertSink for CollectingSink {
        fn alert(&self, alert: Alert) {
            self.alerts.lock().unwrap().push(alert);
        }
    }

    fn root(size: u64, fill: u8) -> Root {
        Root {
            size,
            hash: [fill; 32],
        }
    }

    fn auditor(source: Arc<dyn TreeSource>) -> (Auditor, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let auditor = Auditor::new(
            source,
            Arc::new(AuditStateStore::open_in_memory().unwrap()),
            sink.clone(),
            AuditorConfig {
                interval_secs: 3600,
                jitter_ms: 0,
            },
        );
        (auditor, sink)
    }

    #[tokio::test]
    async fn test_first_contact_accepts_unconditionally() {
        let source = ScriptedSource::new(vec![Ok(RootBundle {
            root: root(5, 9),
            consistency: None,
        })]);
        let (auditor, sink) = auditor(source);

        let outcome = auditor.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::FirstContact(root(5, 9)));
        assert!(sink.alerts.lock().unwrap().is_empty());
        assert_eq!(auditor.state.last_known("scripted:0").unwrap(), Some(root(5, 9)));
    }

    #[tokio::test]
    async fn test_empty_known_root_does_not_demand_proof() {
        // A server contacted before its first write reports the empty root;
        // later growth has no consistency proof from size 0 and must be
        // accepted as a fresh start, not alerted forever.
        let source = ScriptedSource::new(vec![
            Ok(RootBundle {
                root: Root {
                    size: 0,
                    hash: crate::tree::EMPTY_ROOT,
                },
                consistency: None,
            }),
            Ok(RootBundle {
                root: root(2, 4),
                consistency: None,
            }),
        ]);
        let (auditor, sink) = auditor(source);

        auditor.run_cycle().await.unwrap();
        let outcome = auditor.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::FirstContact(root(2, 4)));
        assert!(sink.alerts.lock().unwrap().is_empty());
        assert_eq!(auditor.state.last_known("scripted:0").unwrap(), Some(root(2, 4)));
    }

    #[tokio::test]
    async fn test_shrinking_size_alerts_and_preserves_state() {
        let source = ScriptedSource::new(vec![
            Ok(RootBundle {
                root: root(5, 9),
                consistency: None,
            }),
            Ok(RootBundle {
                root: root(3, 9),
                consistency: None,
            }),
        ]);
        let (auditor, sink) = auditor(source);

        auditor.run_cycle().await.unwrap();
        let outcome = auditor.run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Alerted(AlertReason::RootShrunk));
        let alerts = sink.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].reason, AlertReason::RootShrunk);
        drop(alerts);

        // Stale-but-trusted root preserved
        assert_eq!(auditor.state.last_known("scripted:0").unwrap(), Some(root(5, 9)));
    }

    #[tokio::test]
    async fn test_split_view_at_same_size_alerts() {
        let source = ScriptedSource::new(vec![
            Ok(RootBundle {
                root: root(5, 9),
                consistency: None,
            }),
            Ok(RootBundle {
                root: root(5, 7),
                consistency: None,
            }),
        ]);
        let (auditor, _) = auditor(source);

        auditor.run_cycle().await.unwrap();
        let outcome = auditor.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Alerted(AlertReason::SplitView));
    }

    #[tokio::test]
    async fn test_unchanged_root_is_quiet() {
        let source = ScriptedSource::new(vec![
            Ok(RootBundle {
                root: root(5, 9),
                consistency: None,
            }),
            Ok(RootBundle {
                root: root(5, 9),
                consistency: None,
            }),
        ]);
        let (auditor, sink) = auditor(source);

        auditor.run_cycle().await.unwrap();
        assert_eq!(auditor.run_cycle().await.unwrap(), CycleOutcome::Unchanged);
        assert!(sink.alerts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_growth_without_proof_alerts() {
        let source = ScriptedSource::new(vec![
            Ok(RootBundle {
                root: root(5, 9),
                consistency: None,
            }),
            Ok(RootBundle {
                root: root(8, 1),
                consistency: None,
            }),
        ]);
        let (auditor, _) = auditor(source);

        auditor.run_cycle().await.unwrap();
        assert_eq!(
            auditor.run_cycle().await.unwrap(),
            CycleOutcome::Alerted(AlertReason::MissingProof)
        );
    }

    #[tokio::test]
    async fn test_bogus_consistency_proof_alerts() {
        let source = ScriptedSource::new(vec![
            Ok(RootBundle {
                root: root(5, 9),
                consistency: None,
            }),
            Ok(RootBundle {
                root: root(8, 1),
                consistency: Some(ConsistencyProof {
                    old_size: 5,
                    new_size: 8,
                    path: vec![[0u8; 32]; 3],
                }),
            }),
        ]);
        let (auditor, _) = auditor(source);

        auditor.run_cycle().await.unwrap();
        assert_eq!(
            auditor.run_cycle().await.unwrap(),
            CycleOutcome::Alerted(AlertReason::InconsistentRoot)
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_alerts_unreachable() {
        let source = ScriptedSource::new(vec![Err(CoreError::Transport(
            "connection refused".into(),
        ))]);
        let (auditor, sink) = auditor(source);

        assert_eq!(
            auditor.run_cycle().await.unwrap(),
            CycleOutcome::Alerted(AlertReason::Unreachable)
        );
        assert_eq!(sink.alerts.lock().unwrap()[0].reason, AlertReason::Unreachable);
    }

    #[tokio::test]
    async fn test_run_shuts_down_cleanly() {
        let source = ScriptedSource::new(vec![Ok(RootBundle {
            root: root(1, 1),
            consistency: None,
        })]);
        let (auditor, _) = auditor(source);

        let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
        let handle = tokio::spawn(async move {
            auditor.run(shutdown_rx).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "auditor should shut down promptly");
    }
}
