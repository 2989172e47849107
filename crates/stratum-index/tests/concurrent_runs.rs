//! Integration tests for cross-invocation mutual exclusion.
//!
//! These verify the command-lock guarantees: two runs of the same mode
//! never overlap, while dump and collection runs are free to overlap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use stratum_core::{MemoryBackend, PackageId, StorageBackend};
use stratum_index::catalog::{Catalog, MemoryCatalog, PackageRecord, VersionMetadata};
use stratum_index::coordinator::{RunCoordinator, RunMode, RunOutcome};
use stratum_index::gate::DeployGate;
use stratum_index::gc::RetentionPolicy;

fn record(id: u64, name: &str) -> PackageRecord {
    let mut versions = std::collections::BTreeMap::new();
    versions.insert(
        "1.0.0".to_string(),
        VersionMetadata {
            description: Some("fixture".into()),
            source: None,
            dist: None,
            requires: std::collections::BTreeMap::new(),
        },
    );
    PackageRecord {
        id: PackageId::new(id),
        name: name.to_string(),
        replacement: None,
        versions,
        updated_at: chrono::Utc::now(),
        dumped_at: None,
    }
}

/// Catalog wrapper that slows down selection, widening the window in which
/// a second invocation contends for the lock.
struct SlowCatalog {
    inner: MemoryCatalog,
    delay: Duration,
}

#[async_trait]
impl Catalog for SlowCatalog {
    async fn stale_package_ids(&self) -> stratum_index::Result<Vec<PackageId>> {
        tokio::time::sleep(self.delay).await;
        self.inner.stale_package_ids().await
    }

    async fn all_active_ids(&self) -> stratum_index::Result<Vec<PackageId>> {
        tokio::time::sleep(self.delay).await;
        self.inner.all_active_ids().await
    }

    async fn load_package(&self, id: PackageId) -> stratum_index::Result<Option<PackageRecord>> {
        self.inner.load_package(id).await
    }

    async fn mark_dumped(&self, id: PackageId) -> stratum_index::Result<()> {
        self.inner.mark_dumped(id).await
    }
}

fn open_gate(dir: &tempfile::TempDir) -> DeployGate {
    DeployGate::new(dir.path().join("deploy.globallock"))
}

#[tokio::test]
async fn concurrent_dumps_admit_exactly_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(MemoryBackend::new());

    let inner = MemoryCatalog::new();
    inner.insert(record(1, "acme/router"));
    let catalog = Arc::new(SlowCatalog {
        inner,
        delay: Duration::from_millis(200),
    });

    let make = || {
        RunCoordinator::new(
            Arc::clone(&backend) as Arc<dyn StorageBackend>,
            Arc::clone(&catalog) as Arc<dyn Catalog>,
            open_gate(&dir),
            RetentionPolicy::default(),
        )
    };
    let a = make();
    let b = make();

    let (outcome_a, outcome_b) = tokio::join!(
        a.run(RunMode::Dump { force: false }, false),
        b.run(RunMode::Dump { force: false }, false),
    );

    let outcomes = [outcome_a, outcome_b];
    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, RunOutcome::Completed { success: true }))
        .count();
    let busy = outcomes
        .iter()
        .filter(|o| matches!(o, RunOutcome::LockBusy))
        .count();

    assert_eq!(completed, 1, "exactly one run may proceed: {outcomes:?}");
    assert_eq!(busy, 1, "the other must skip at lock acquisition");
    assert!(outcomes.iter().all(|o| matches!(
        o,
        RunOutcome::Completed { success: true } | RunOutcome::LockBusy
    )));
    // Both terminal states map to exit code 0.
    assert!(outcomes.iter().any(|o| o.exit_code() == 0));
}

#[tokio::test]
async fn gc_and_dump_run_concurrently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(MemoryBackend::new());

    let inner = MemoryCatalog::new();
    inner.insert(record(1, "acme/router"));
    let catalog = Arc::new(SlowCatalog {
        inner,
        delay: Duration::from_millis(200),
    });

    let dump = RunCoordinator::new(
        Arc::clone(&backend) as Arc<dyn StorageBackend>,
        Arc::clone(&catalog) as Arc<dyn Catalog>,
        open_gate(&dir),
        RetentionPolicy::default(),
    );
    let gc = RunCoordinator::new(
        Arc::clone(&backend) as Arc<dyn StorageBackend>,
        Arc::clone(&catalog) as Arc<dyn Catalog>,
        open_gate(&dir),
        RetentionPolicy::default(),
    );

    let (dump_outcome, gc_outcome) = tokio::join!(
        dump.run(RunMode::Dump { force: false }, false),
        gc.run(RunMode::Gc, false),
    );

    // Independent locks: neither run may be turned away.
    assert_eq!(dump_outcome, RunOutcome::Completed { success: true });
    assert_eq!(gc_outcome, RunOutcome::GcCompleted);
}

#[tokio::test]
async fn back_to_back_runs_reacquire_the_lock() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(MemoryBackend::new());
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.insert(record(1, "acme/router"));

    let coordinator = RunCoordinator::new(
        Arc::clone(&backend) as Arc<dyn StorageBackend>,
        Arc::clone(&catalog) as Arc<dyn Catalog>,
        open_gate(&dir),
        RetentionPolicy::default(),
    );

    for _ in 0..3 {
        let outcome = coordinator.run(RunMode::Dump { force: true }, false).await;
        assert_eq!(outcome, RunOutcome::Completed { success: true });
    }
}
