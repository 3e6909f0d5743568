//! Auditor integration: real store, real state persistence, forged servers

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use verakv::{
    Alert, AlertReason, AlertSink, AuditStateStore, Auditor, AuditorConfig, CoreResult,
    LocalSource, LogStore, Root, StoreConfig, TreeSource,
};
use verakv::auditor::{CycleOutcome, RootBundle};

#[derive(Default)]
struct CollectingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl AlertSink for CollectingSink {
    fn alert(&self, alert: Alert) {
        self.alerts.lock().unwrap().push(alert);
    }
}

fn open_store(dir: &tempfile::TempDir) -> Arc<LogStore> {
    Arc::new(
        LogStore::open(StoreConfig {
            db_path: dir.path().join("store.db"),
            checkpoint_every: 0,
        })
        .unwrap(),
    )
}

fn quiet_config() -> AuditorConfig {
    AuditorConfig {
        interval_secs: 3600,
        jitter_ms: 0,
    }
}

#[tokio::test]
async fn test_honest_server_advances_monotonically() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let sink = Arc::new(CollectingSink::default());
    let auditor = Auditor::new(
        Arc::new(LocalSource::new("local:1", store.clone())),
        Arc::new(AuditStateStore::open_in_memory().unwrap()),
        sink.clone(),
        quiet_config(),
    );

    store.put(b"a", b"1").unwrap();
    let outcome = auditor.run_cycle().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::FirstContact(_)));

    store.put(b"b", b"2").unwrap();
    store.put(b"c", b"3").unwrap();
    assert_eq!(
        auditor.run_cycle().await.unwrap(),
        CycleOutcome::Advanced { from: 1, to: 3 }
    );

    // No growth between cycles
    assert_eq!(auditor.run_cycle().await.unwrap(), CycleOutcome::Unchanged);
    assert!(sink.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_server_then_growth_stays_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let sink = Arc::new(CollectingSink::default());
    let state = Arc::new(AuditStateStore::open_in_memory().unwrap());
    let auditor = Auditor::new(
        Arc::new(LocalSource::new("local:1", store.clone())),
        state.clone(),
        sink.clone(),
        quiet_config(),
    );

    // Contact before the server's first write
    assert!(matches!(
        auditor.run_cycle().await.unwrap(),
        CycleOutcome::FirstContact(Root { size: 0, .. })
    ));

    store.put(b"a", b"1").unwrap();
    assert!(matches!(
        auditor.run_cycle().await.unwrap(),
        CycleOutcome::FirstContact(Root { size: 1, .. })
    ));
    assert!(sink.alerts.lock().unwrap().is_empty());

    // Subsequent growth verifies normally from the recorded root
    store.put(b"b", b"2").unwrap();
    assert_eq!(
        auditor.run_cycle().await.unwrap(),
        CycleOutcome::Advanced { from: 1, to: 2 }
    );
}

#[tokio::test]
async fn test_auditor_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let state_path = dir.path().join("audit.db");
    let sink = Arc::new(CollectingSink::default());

    store.put(b"a", b"1").unwrap();
    store.put(b"b", b"2").unwrap();

    {
        let auditor = Auditor::new(
            Arc::new(LocalSource::new("local:1", store.clone())),
            Arc::new(AuditStateStore::open(&state_path).unwrap()),
            sink.clone(),
            quiet_config(),
        );
        assert!(matches!(
            auditor.run_cycle().await.unwrap(),
            CycleOutcome::FirstContact(Root { size: 2, .. })
        ));
    }

    // A new auditor process picks up from the persisted root
    store.put(b"c", b"3").unwrap();
    let auditor = Auditor::new(
        Arc::new(LocalSource::new("local:1", store)),
        Arc::new(AuditStateStore::open(&state_path).unwrap()),
        sink,
        quiet_config(),
    );
    assert_eq!(
        auditor.run_cycle().await.unwrap(),
        CycleOutcome::Advanced { from: 2, to: 3 }
    );
}

/// A server that forwards to a real store but lies about its current root
struct ForgingSource {
    inner: LocalSource,
    forged_hash: [u8; 32],
}

#[async_trait]
impl TreeSource for ForgingSource {
    fn identity(&self) -> &str {
        self.inner.identity()
    }

    async fn latest_root(&self, from_size: u64) -> CoreResult<RootBundle> {
        let mut bundle = self.inner.latest_root(from_size).await?;
        bundle.root.hash = self.forged_hash;
        Ok(bundle)
    }
}

#[tokio::test]
async fn test_forged_root_raises_inconsistency_alert() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let sink = Arc::new(CollectingSink::default());
    let state = Arc::new(AuditStateStore::open_in_memory().unwrap());

    // Honest first contact
    store.put(b"a", b"1").unwrap();
    let honest = Auditor::new(
        Arc::new(LocalSource::new("local:1", store.clone())),
        state.clone(),
        sink.clone(),
        quiet_config(),
    );
    honest.run_cycle().await.unwrap();
    let trusted = state.last_known("local:1").unwrap().unwrap();

    // Server starts lying after growing
    store.put(b"b", b"2").unwrap();
    let lying = Auditor::new(
        Arc::new(ForgingSource {
            inner: LocalSource::new("local:1", store),
            forged_hash: [0x66; 32],
        }),
        state.clone(),
        sink.clone(),
        quiet_config(),
    );

    assert_eq!(
        lying.run_cycle().await.unwrap(),
        CycleOutcome::Alerted(AlertReason::InconsistentRoot)
    );
    assert_eq!(sink.alerts.lock().unwrap().len(), 1);

    // Trusted state untouched by the failed cycle
    assert_eq!(state.last_known("local:1").unwrap().unwrap(), trusted);
}

#[tokio::test]
async fn test_independent_auditors_for_multiple_servers() {
    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    let store_a = open_store(&dir_a);
    let store_b = open_store(&dir_b);
    let state = Arc::new(AuditStateStore::open_in_memory().unwrap());
    let sink = Arc::new(CollectingSink::default());

    store_a.put(b"x", b"1").unwrap();
    store_b.put(b"y", b"1").unwrap();
    store_b.put(b"y", b"2").unwrap();

    let auditor_a = Auditor::new(
        Arc::new(LocalSource::new("a:1", store_a)),
        state.clone(),
        sink.clone(),
        quiet_config(),
    );
    let auditor_b = Auditor::new(
        Arc::new(LocalSource::new("b:2", store_b)),
        state.clone(),
        sink,
        quiet_config(),
    );

    auditor_a.run_cycle().await.unwrap();
    auditor_b.run_cycle().await.unwrap();

    assert_eq!(state.last_known("a:1").unwrap().unwrap().size, 1);
    assert_eq!(state.last_known("b:2").unwrap().unwrap().size, 2);
}
