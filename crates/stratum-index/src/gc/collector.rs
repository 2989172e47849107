//! Garbage collector implementation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};

use stratum_core::storage::{ObjectMeta, StorageBackend};
use stratum_core::Error as CoreError;

use crate::error::{IndexError, Result};
use crate::gc::RetentionPolicy;
use crate::manifest::{paths, IndexManifest, RootPointer};

/// Result of a garbage collection run.
#[derive(Debug, Clone, Default)]
pub struct GcResult {
    /// Number of objects deleted.
    pub objects_deleted: u64,
    /// Total bytes reclaimed.
    pub bytes_reclaimed: u64,
    /// Number of shard files deleted.
    pub shards_deleted: u64,
    /// Number of generation manifests deleted.
    pub generations_deleted: u64,
    /// Errors encountered (GC continues on non-fatal errors).
    pub errors: Vec<String>,
}

impl GcResult {
    /// Returns true if any errors were encountered.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Dry-run report showing what would be collected.
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    /// Total objects that would be deleted.
    pub objects_to_delete: u64,
    /// Estimated bytes to reclaim.
    pub bytes_to_reclaim: u64,
    /// Shard files that would be deleted.
    pub shards_to_delete: Vec<String>,
    /// Generation manifests that would be deleted.
    pub generations_to_delete: Vec<String>,
}

/// Sweep plan computed by the mark phase.
struct SweepPlan {
    shards: Vec<ObjectMeta>,
    generations: Vec<ObjectMeta>,
}

/// Garbage collector for index artifacts.
///
/// Deletes shard files unreferenced by any retained manifest generation,
/// then generation manifests outside the retained set. Never deletes
/// anything younger than the policy's delay window.
pub struct GarbageCollector {
    storage: Arc<dyn StorageBackend>,
    policy: RetentionPolicy,
}

impl GarbageCollector {
    /// Creates a new garbage collector.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, policy: RetentionPolicy) -> Self {
        Self { storage, policy }
    }

    /// Runs garbage collection without deleting anything.
    ///
    /// # Errors
    ///
    /// Returns an error if listing artifacts or reading retained manifests
    /// fails; the reachable set must be fully known before any sweep.
    pub async fn collect_dry_run(&self) -> Result<GcReport> {
        let plan = self.plan().await?;

        let bytes_to_reclaim = plan
            .shards
            .iter()
            .chain(plan.generations.iter())
            .map(|m| m.size)
            .sum();

        Ok(GcReport {
            objects_to_delete: (plan.shards.len() + plan.generations.len()) as u64,
            bytes_to_reclaim,
            shards_to_delete: plan.shards.into_iter().map(|m| m.path).collect(),
            generations_to_delete: plan.generations.into_iter().map(|m| m.path).collect(),
        })
    }

    /// Runs garbage collection.
    ///
    /// Per-file delete failures are accumulated in the result's `errors`
    /// field without aborting the sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if the mark phase cannot determine the reachable
    /// set; nothing is deleted in that case.
    pub async fn collect(&self) -> Result<GcResult> {
        let start = Instant::now();

        tracing::info!(
            keep_generations = self.policy.keep_generations,
            delay_hours = self.policy.delay_hours,
            metric = "stratum_gc_run_started",
            "starting garbage collection"
        );

        let plan = self.plan().await?;
        let mut result = GcResult::default();

        for meta in plan.shards {
            match self.storage.delete(&meta.path).await {
                Ok(()) => {
                    result.objects_deleted += 1;
                    result.bytes_reclaimed += meta.size;
                    result.shards_deleted += 1;
                    tracing::debug!(path = %meta.path, "deleted unreferenced shard");
                }
                Err(e) => {
                    crate::metrics::record_gc_error();
                    result.errors.push(format!("delete {}: {e}", meta.path));
                }
            }
        }

        for meta in plan.generations {
            match self.storage.delete(&meta.path).await {
                Ok(()) => {
                    result.objects_deleted += 1;
                    result.bytes_reclaimed += meta.size;
                    result.generations_deleted += 1;
                    tracing::debug!(path = %meta.path, "deleted expired generation manifest");
                }
                Err(e) => {
                    crate::metrics::record_gc_error();
                    result.errors.push(format!("delete {}: {e}", meta.path));
                }
            }
        }

        let duration_secs = start.elapsed().as_secs_f64();
        crate::metrics::record_gc_completion(
            result.objects_deleted,
            result.bytes_reclaimed,
            duration_secs,
        );
        tracing::info!(
            objects_deleted = result.objects_deleted,
            bytes_reclaimed = result.bytes_reclaimed,
            shards_deleted = result.shards_deleted,
            generations_deleted = result.generations_deleted,
            errors_count = result.errors.len(),
            duration_secs,
            metric = "stratum_gc_run_completed",
            "garbage collection completed"
        );

        Ok(result)
    }

    /// Mark phase: computes the sweep plan.
    ///
    /// Fails closed: any error reading a retained manifest aborts the run,
    /// because an unknown reachable set must never be swept against.
    async fn plan(&self) -> Result<SweepPlan> {
        let cutoff = Utc::now() - Duration::hours(i64::from(self.policy.delay_hours));

        let current = self.current_generation().await?;

        let mut generations: Vec<(u64, ObjectMeta)> = self
            .storage
            .list(paths::GENERATION_PREFIX)
            .await?
            .into_iter()
            .filter_map(|meta| paths::parse_generation(&meta.path).map(|gen| (gen, meta)))
            .collect();
        generations.sort_by(|a, b| b.0.cmp(&a.0));

        if let Some(current) = current {
            if !generations.iter().any(|(gen, _)| *gen == current) {
                return Err(IndexError::NotFound {
                    message: format!("published generation {current} has no manifest file"),
                });
            }
        }

        let mut retained: HashSet<u64> = generations
            .iter()
            .take(self.policy.keep_generations as usize)
            .map(|(gen, _)| *gen)
            .collect();
        if let Some(current) = current {
            retained.insert(current);
        }
        for (gen, meta) in &generations {
            // Anything inside the delay window stays, including unpublished
            // manifests an in-flight dump just wrote.
            if !is_older_than(meta, cutoff) {
                retained.insert(*gen);
            }
        }

        let mut referenced: HashSet<String> = HashSet::new();
        for (gen, meta) in &generations {
            if !retained.contains(gen) {
                continue;
            }
            let manifest = self.read_manifest(&meta.path).await?;
            for shard in manifest.channels.values() {
                referenced.insert(shard.path.clone());
            }
        }

        let shards = self
            .storage
            .list(paths::SHARD_PREFIX)
            .await?
            .into_iter()
            .filter(|meta| !referenced.contains(&meta.path) && is_older_than(meta, cutoff))
            .collect();

        let generations = generations
            .into_iter()
            .filter(|(gen, meta)| !retained.contains(gen) && is_older_than(meta, cutoff))
            .map(|(_, meta)| meta)
            .collect();

        Ok(SweepPlan {
            shards,
            generations,
        })
    }

    /// Reads the currently published generation number, if any.
    async fn current_generation(&self) -> Result<Option<u64>> {
        match self.storage.get(paths::ROOT_POINTER).await {
            Ok(bytes) => {
                let pointer: RootPointer =
                    serde_json::from_slice(&bytes).map_err(|e| IndexError::Serialization {
                        message: format!("parse root pointer: {e}"),
                    })?;
                Ok(Some(pointer.generation))
            }
            Err(CoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_manifest(&self, path: &str) -> Result<IndexManifest> {
        let bytes = self.storage.get(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| IndexError::Serialization {
            message: format!("parse manifest at {path}: {e}"),
        })
    }
}

/// Whether the object is strictly older than the cutoff.
///
/// Objects with unknown modification time are never deletion candidates.
fn is_older_than(meta: &ObjectMeta, cutoff: DateTime<Utc>) -> bool {
    meta.last_modified.is_some_and(|t| t < cutoff)
}
