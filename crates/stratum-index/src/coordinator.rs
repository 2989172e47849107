//! Per-invocation orchestration.
//!
//! One run is one traversal of a fixed state machine:
//!
//! ```text
//! START -> GATE_CHECK -> {ABORTED | LOCK_ACQUIRE}
//!                     -> {ABORTED | SELECT}
//!                     -> {NOOP_EXIT | EXECUTE}
//!                     -> UNLOCK -> EXIT(code)
//! ```
//!
//! All collaborators are explicit construction-time references: the storage
//! backend, the catalog handle, the deploy gate path, and the retention
//! policy. No ambient lookup. Every failure is recovered here and mapped to
//! an exit code; nothing propagates past the coordinator without the lock
//! being released first.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;
use ulid::Ulid;

use stratum_core::storage::StorageBackend;

use crate::catalog::Catalog;
use crate::dumper::IndexDumper;
use crate::error::Result;
use crate::gate::DeployGate;
use crate::gc::{GarbageCollector, RetentionPolicy};
use crate::lock::{CommandLock, DEFAULT_LOCK_TTL};
use crate::selector::StalenessSelector;

/// Run mode: the two mutually exclusive commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Dump stale (or, with `force`, all active) entries and republish.
    Dump {
        /// Bypass staleness and include every non-spam-retired entry.
        force: bool,
    },
    /// Garbage-collect unreferenced shard files.
    Gc,
}

impl RunMode {
    /// The lock name guarding this mode.
    ///
    /// Dump and GC use independent locks: a collection pass may run
    /// concurrently with a dump, but never with another of its own mode.
    #[must_use]
    pub const fn lock_name(&self) -> &'static str {
        match self {
            Self::Dump { .. } => "dump",
            Self::Gc => "dump-gc",
        }
    }

    /// Short label for logging.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Dump { .. } => "dump",
            Self::Gc => "gc",
        }
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Deploy gate present; run skipped.
    GateAborted,
    /// Another run of the same mode is active (or the lock backend was
    /// unavailable and acquisition failed closed); run skipped.
    LockBusy,
    /// Empty selection without force; nothing to do.
    NothingToDump,
    /// Dump executed; `success` is the dumper's verdict.
    Completed {
        /// Whether every requested entry is represented in the new
        /// generation.
        success: bool,
    },
    /// Collection executed. Always exits zero; per-file errors are logged.
    GcCompleted,
    /// The run failed before completing (e.g. catalog unavailable).
    Failed {
        /// Description of the failure.
        message: String,
    },
}

impl RunOutcome {
    /// Maps the outcome to a process exit code.
    ///
    /// Skips are not errors: gate aborts, lock contention, and empty
    /// selections all exit zero.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::GateAborted | Self::LockBusy | Self::NothingToDump | Self::GcCompleted => 0,
            Self::Completed { success } => {
                if *success {
                    0
                } else {
                    1
                }
            }
            Self::Failed { .. } => 1,
        }
    }
}

/// Orchestrates one run: gate check, lock, select, execute, unlock.
pub struct RunCoordinator {
    storage: Arc<dyn StorageBackend>,
    catalog: Arc<dyn Catalog>,
    gate: DeployGate,
    policy: RetentionPolicy,
    lock_ttl: Duration,
}

impl RunCoordinator {
    /// Creates a coordinator over explicit collaborators.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        catalog: Arc<dyn Catalog>,
        gate: DeployGate,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            storage,
            catalog,
            gate,
            policy,
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    /// Sets the command lock TTL.
    #[must_use]
    pub const fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Executes one run and returns its terminal outcome.
    pub async fn run(&self, mode: RunMode, verbose: bool) -> RunOutcome {
        let run_id = Ulid::new().to_string();
        let span = stratum_core::observability::run_span(mode.label(), &run_id);
        self.run_locked(mode, verbose).instrument(span).await
    }

    async fn run_locked(&self, mode: RunMode, verbose: bool) -> RunOutcome {
        if self.gate.is_closed().await {
            if verbose {
                tracing::info!(gate = %self.gate.path().display(), "aborting, deploy gate present");
            }
            return RunOutcome::GateAborted;
        }

        let lock = CommandLock::new(Arc::clone(&self.storage), mode.lock_name())
            .with_ttl(self.lock_ttl);
        let guard = match lock.try_acquire().await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                if verbose {
                    tracing::info!(lock = mode.lock_name(), "aborting, another task is running already");
                }
                return RunOutcome::LockBusy;
            }
            Err(e) => {
                // Fail closed: an unreachable lock backend is treated as
                // contention, never as a free pass.
                tracing::warn!(lock = mode.lock_name(), error = %e, "lock backend unavailable; aborting");
                return RunOutcome::LockBusy;
            }
        };

        let outcome = self.execute(mode, verbose).await;

        // UNLOCK runs on every path that acquired the lock.
        if let Err(e) = guard.release().await {
            tracing::warn!(lock = mode.lock_name(), error = %e, "failed to release lock; TTL will reclaim it");
        }

        match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "run failed");
                RunOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn execute(&self, mode: RunMode, verbose: bool) -> Result<RunOutcome> {
        match mode {
            RunMode::Gc => {
                let collector =
                    GarbageCollector::new(Arc::clone(&self.storage), self.policy.clone());
                match collector.collect().await {
                    Ok(result) => {
                        if result.has_errors() {
                            tracing::warn!(
                                errors = result.errors.len(),
                                "garbage collection finished with errors"
                            );
                        }
                    }
                    Err(e) => {
                        // GC failures are loud but the run still exits zero
                        // once the lock is released.
                        tracing::error!(error = %e, "garbage collection failed");
                    }
                }
                Ok(RunOutcome::GcCompleted)
            }
            RunMode::Dump { force } => {
                let selector = StalenessSelector::new(Arc::clone(&self.catalog));
                let ids = selector.select(force).await?;

                if ids.is_empty() && !force {
                    if verbose {
                        tracing::info!("aborting, no packages to dump and not doing a forced run");
                    }
                    return Ok(RunOutcome::NothingToDump);
                }

                let dumper =
                    IndexDumper::new(Arc::clone(&self.storage), Arc::clone(&self.catalog));
                let success = dumper.dump(&ids, force, verbose).await?;
                Ok(RunOutcome::Completed { success })
            }
        }
    }
}
