//! # stratum-index
//!
//! The index dump engine for the Stratum package repository.
//!
//! This crate turns "a catalog row changed" into "a correct, atomically
//! published on-disk index":
//!
//! - **Command Lock**: named, non-blocking mutual exclusion across
//!   invocations, with abandoned-lock reclamation via TTL
//! - **Staleness Selector**: decides which catalog entries need
//!   re-serialization, incrementally or in full
//! - **Index Dumper**: serializes entries into immutable content-keyed
//!   shards and republishes the root manifest via an atomic CAS swap
//! - **Garbage Collector**: mark-and-sweep over manifest generations,
//!   reclaiming shards no retained generation references
//! - **Run Coordinator**: drives one invocation through gate check, lock,
//!   select, execute, and unconditional unlock
//!
//! ## Storage Layout
//!
//! ```text
//! <index root>/
//! ├── manifests/
//! │   ├── root.json             # Root pointer, CAS-swapped atomically
//! │   └── gen/                  # Immutable generation manifests
//! ├── shards/                   # Immutable content-keyed package metadata
//! └── locks/                    # Command lock files (dump, dump-gc)
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use stratum_index::prelude::*;
//!
//! let coordinator = RunCoordinator::new(storage, catalog, gate, policy);
//! let outcome = coordinator.run(RunMode::Dump { force: false }, verbose).await;
//! std::process::exit(outcome.exit_code().into());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod coordinator;
pub mod dumper;
pub mod error;
pub mod gate;
pub mod gc;
pub mod lock;
pub mod manifest;
pub mod metrics;
pub mod selector;
pub mod shard;

// Re-export main types at crate root
pub use catalog::{Catalog, MemoryCatalog, PackageRecord, VersionMetadata, SPAM_REPLACEMENT};
pub use coordinator::{RunCoordinator, RunMode, RunOutcome};
pub use dumper::IndexDumper;
pub use error::{IndexError, Result};
pub use gate::DeployGate;
pub use gc::{GarbageCollector, GcReport, GcResult, RetentionPolicy};
pub use lock::{CommandLock, CommandLockGuard, LockInfo};
pub use manifest::{IndexManifest, RootPointer, ShardRef};
pub use selector::StalenessSelector;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::catalog::{Catalog, MemoryCatalog, PackageRecord, VersionMetadata};
    pub use crate::coordinator::{RunCoordinator, RunMode, RunOutcome};
    pub use crate::dumper::IndexDumper;
    pub use crate::gate::DeployGate;
    pub use crate::gc::{GarbageCollector, RetentionPolicy};
    pub use crate::lock::CommandLock;
    pub use crate::selector::StalenessSelector;
}
