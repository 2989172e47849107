//! The index dump engine.
//!
//! Serializes the current state of selected catalog entries into immutable
//! content-keyed shards and republishes the root manifest atomically. The
//! publication discipline is write-new-then-swap:
//!
//! 1. shard files are written under fresh content keys with a
//!    `DoesNotExist` precondition; identical content already on disk
//!    counts as confirmed;
//! 2. a new immutable generation manifest is written beside the previous
//!    ones;
//! 3. the root pointer is swapped to the new generation with a CAS.
//!
//! Readers therefore observe either the fully-old or the fully-new
//! generation. The writer never deletes anything: superseded shards stay on
//! disk until the garbage collector reclaims them, so a reader resolving an
//! older manifest keeps finding its shards.
//!
//! After a successful swap each dumped entry's staleness marker is advanced
//! in the catalog, best-effort per entry. A crash between swap and marking
//! re-selects those entries next run: safe over-work, never data loss.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;

use stratum_core::storage::{StorageBackend, WritePrecondition, WriteResult};
use stratum_core::PackageId;

use crate::catalog::Catalog;
use crate::error::{IndexError, Result};
use crate::manifest::{paths, IndexManifest, RootPointer};
use crate::shard::{shard_ref, ShardDocument};

/// The shard writer / index dumper.
pub struct IndexDumper {
    storage: Arc<dyn StorageBackend>,
    catalog: Arc<dyn Catalog>,
}

impl IndexDumper {
    /// Creates a dumper over the given storage and catalog.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, catalog: Arc<dyn Catalog>) -> Self {
        Self { storage, catalog }
    }

    /// Dumps the given entries and republishes the index.
    ///
    /// Entries are processed in ascending identifier order. Returns `Ok(true)`
    /// when every requested identifier is represented in the newly published
    /// generation; `Ok(false)` when at least one partition failed to write or
    /// the publication swap failed. Partial progress never corrupts the
    /// previously published manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog is unavailable or the current
    /// manifest cannot be loaded.
    pub async fn dump(&self, ids: &[PackageId], force: bool, verbose: bool) -> Result<bool> {
        if ids.is_empty() && !force {
            return Ok(true);
        }

        let start = Instant::now();
        let (root_version, previous) = self.load_current().await?;

        let mut channels = previous.channels.clone();
        let mut represented: Vec<PackageId> = Vec::new();
        let mut shards_written: u64 = 0;
        let mut failures: u64 = 0;

        let mut ordered = ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        for id in ordered {
            match self.catalog.load_package(id).await? {
                None => {
                    // The entry is gone from the catalog; retire its channel
                    // from the next generation.
                    channels.retain(|_, shard| shard.package_id != id);
                    if verbose {
                        tracing::info!(package_id = %id, "package deleted; channel retired");
                    }
                }
                Some(record) => {
                    // A rename drops the channel published under the old name.
                    channels.retain(|name, shard| {
                        shard.package_id != id || *name == record.name
                    });

                    let doc = ShardDocument::from_record(&record);
                    let bytes = match doc.canonical_bytes() {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            failures += 1;
                            tracing::error!(package_id = %id, error = %e, "partition failed to serialize");
                            continue;
                        }
                    };

                    let shard = shard_ref(&record, &bytes);
                    let unchanged = channels.get(&record.name).is_some_and(|current| {
                        current.key == shard.key && current.package_id == shard.package_id
                    });

                    if unchanged {
                        if verbose {
                            tracing::info!(package_id = %id, package = %record.name, "unchanged; confirmed");
                        }
                    } else {
                        match self
                            .storage
                            .put(
                                &shard.path,
                                Bytes::from(bytes),
                                WritePrecondition::DoesNotExist,
                            )
                            .await
                        {
                            Ok(WriteResult::Success { .. }) => {
                                shards_written += 1;
                                if verbose {
                                    tracing::info!(
                                        package_id = %id,
                                        package = %record.name,
                                        shard = %shard.key,
                                        "shard written"
                                    );
                                }
                            }
                            Ok(WriteResult::PreconditionFailed { .. }) => {
                                // Identical content already on disk: shards
                                // are content-keyed, so this is a confirm.
                            }
                            Err(e) => {
                                failures += 1;
                                tracing::error!(package_id = %id, error = %e, "partition failed to write");
                                continue;
                            }
                        }
                        channels.insert(record.name.clone(), shard);
                    }

                    represented.push(id);
                }
            }
        }

        let next = IndexManifest {
            generation: previous.next_generation(),
            channels,
            created_at: Utc::now(),
        };

        if !self.publish(&next, root_version).await {
            crate::metrics::record_dump_completion(
                shards_written,
                failures,
                start.elapsed().as_secs_f64(),
            );
            return Ok(false);
        }

        // Advance staleness markers. Best-effort per entry; a failure here
        // only causes safe re-selection next run.
        for id in &represented {
            if let Err(e) = self.catalog.mark_dumped(*id).await {
                tracing::warn!(package_id = %id, error = %e, "failed to advance staleness marker");
            }
        }

        let duration_secs = start.elapsed().as_secs_f64();
        crate::metrics::record_dump_completion(shards_written, failures, duration_secs);
        tracing::info!(
            generation = next.generation,
            requested = ids.len(),
            shards_written,
            failures,
            duration_secs,
            metric = "stratum_dump_run_completed",
            "dump completed"
        );

        Ok(failures == 0)
    }

    /// Loads the currently published generation, or the empty pre-first
    /// generation when nothing has been published yet.
    ///
    /// Returns the root pointer's version token for the later CAS swap.
    async fn load_current(&self) -> Result<(Option<String>, IndexManifest)> {
        let Some(meta) = self.storage.head(paths::ROOT_POINTER).await? else {
            return Ok((None, IndexManifest::empty()));
        };

        let pointer: RootPointer = self.read_json(paths::ROOT_POINTER).await?;
        let manifest: IndexManifest = self.read_json(&pointer.manifest_path).await?;
        Ok((Some(meta.version), manifest))
    }

    /// Publishes a new generation: immutable manifest file, then root CAS.
    ///
    /// Returns `false` on publish failure; the previously published
    /// generation is left intact in that case.
    async fn publish(&self, next: &IndexManifest, root_version: Option<String>) -> bool {
        let manifest_path = paths::generation(next.generation);
        let manifest_bytes = match serde_json::to_vec_pretty(next) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize manifest");
                return false;
            }
        };

        // An object at this path can only be a leftover from a run that
        // crashed before its swap; it was never published and is safe to
        // replace.
        match self
            .storage
            .put(&manifest_path, manifest_bytes, WritePrecondition::None)
            .await
        {
            Ok(WriteResult::Success { .. }) => {}
            Ok(WriteResult::PreconditionFailed { .. }) | Err(_) => {
                tracing::error!(path = %manifest_path, "failed to write generation manifest");
                return false;
            }
        }

        let pointer = RootPointer {
            generation: next.generation,
            manifest_path,
            updated_at: Utc::now(),
        };
        let pointer_bytes = match serde_json::to_vec_pretty(&pointer) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize root pointer");
                return false;
            }
        };

        let precondition = match root_version {
            Some(version) => WritePrecondition::MatchesVersion(version),
            None => WritePrecondition::DoesNotExist,
        };

        match self
            .storage
            .put(paths::ROOT_POINTER, pointer_bytes, precondition)
            .await
        {
            Ok(WriteResult::Success { .. }) => true,
            Ok(WriteResult::PreconditionFailed { .. }) => {
                // The dump-mode lock should make this impossible; losing the
                // race means another writer published. Leave their
                // generation in place.
                tracing::error!(
                    generation = next.generation,
                    "root pointer changed concurrently; publication abandoned"
                );
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to swap root pointer");
                false
            }
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let bytes = self.storage.get(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| IndexError::Serialization {
            message: format!("parse JSON at {path}: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{test_record, MemoryCatalog};
    use stratum_core::MemoryBackend;

    fn setup() -> (Arc<MemoryBackend>, Arc<MemoryCatalog>, IndexDumper) {
        let backend = Arc::new(MemoryBackend::new());
        let catalog = Arc::new(MemoryCatalog::new());
        let dumper = IndexDumper::new(
            Arc::clone(&backend) as Arc<dyn StorageBackend>,
            Arc::clone(&catalog) as Arc<dyn Catalog>,
        );
        (backend, catalog, dumper)
    }

    async fn published_manifest(backend: &MemoryBackend) -> IndexManifest {
        let pointer: RootPointer =
            serde_json::from_slice(&backend.get(paths::ROOT_POINTER).await.expect("root"))
                .expect("parse root");
        serde_json::from_slice(&backend.get(&pointer.manifest_path).await.expect("manifest"))
            .expect("parse manifest")
    }

    #[tokio::test]
    async fn empty_unforced_dump_writes_nothing() {
        let (backend, _catalog, dumper) = setup();

        let ok = dumper.dump(&[], false, false).await.expect("dump");
        assert!(ok);
        assert!(backend.list("").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn dump_publishes_strict_successor_generations() {
        let (backend, catalog, dumper) = setup();
        catalog.insert(test_record(1, "acme/router"));

        let ok = dumper
            .dump(&[PackageId::new(1)], false, false)
            .await
            .expect("dump");
        assert!(ok);
        let first = published_manifest(&backend).await;
        assert_eq!(first.generation, 1);

        catalog.touch(PackageId::new(1));
        let ok = dumper
            .dump(&[PackageId::new(1)], false, false)
            .await
            .expect("dump");
        assert!(ok);
        let second = published_manifest(&backend).await;
        assert_eq!(second.generation, 2);
    }

    #[tokio::test]
    async fn dumped_entries_resolve_to_catalog_state() {
        let (backend, catalog, dumper) = setup();
        catalog.insert(test_record(1, "acme/router"));
        catalog.insert(test_record(2, "acme/http"));

        let ok = dumper
            .dump(&[PackageId::new(1), PackageId::new(2)], false, false)
            .await
            .expect("dump");
        assert!(ok);

        let manifest = published_manifest(&backend).await;
        assert_eq!(manifest.channels.len(), 2);

        for name in ["acme/router", "acme/http"] {
            let shard = &manifest.channels[name];
            let bytes = backend.get(&shard.path).await.expect("shard");
            let doc: ShardDocument = serde_json::from_slice(&bytes).expect("parse shard");
            assert_eq!(doc.package, name);
            assert!(doc.versions.contains_key("1.0.0"));
        }
    }

    #[tokio::test]
    async fn successful_dump_advances_staleness_markers() {
        let (_backend, catalog, dumper) = setup();
        catalog.insert(test_record(1, "acme/router"));

        dumper
            .dump(&[PackageId::new(1)], false, false)
            .await
            .expect("dump");

        assert!(catalog
            .stale_package_ids()
            .await
            .expect("stale")
            .is_empty());
    }

    #[tokio::test]
    async fn unchanged_content_is_confirmed_without_rewriting() {
        let (backend, catalog, dumper) = setup();
        catalog.insert(test_record(1, "acme/router"));

        dumper
            .dump(&[PackageId::new(1)], true, false)
            .await
            .expect("dump");
        let shards_before = backend.list(paths::SHARD_PREFIX).await.expect("list").len();

        // Forced re-dump with identical metadata: same content key.
        dumper
            .dump(&[PackageId::new(1)], true, false)
            .await
            .expect("dump");
        let shards_after = backend.list(paths::SHARD_PREFIX).await.expect("list").len();

        assert_eq!(shards_before, 1);
        assert_eq!(shards_after, 1);

        // Both generations reference the same shard key.
        let manifest = published_manifest(&backend).await;
        assert_eq!(manifest.generation, 2);
    }

    #[tokio::test]
    async fn deleted_package_retires_its_channel() {
        let (backend, catalog, dumper) = setup();
        catalog.insert(test_record(1, "acme/router"));
        catalog.insert(test_record(2, "acme/http"));

        dumper
            .dump(&[PackageId::new(1), PackageId::new(2)], false, false)
            .await
            .expect("dump");

        catalog.remove(PackageId::new(2));
        dumper
            .dump(&[PackageId::new(2)], false, false)
            .await
            .expect("dump");

        let manifest = published_manifest(&backend).await;
        assert!(manifest.channels.contains_key("acme/router"));
        assert!(!manifest.channels.contains_key("acme/http"));
    }

    #[tokio::test]
    async fn renamed_package_drops_old_channel() {
        let (backend, catalog, dumper) = setup();
        catalog.insert(test_record(1, "acme/router"));
        dumper
            .dump(&[PackageId::new(1)], false, false)
            .await
            .expect("dump");

        let mut renamed = test_record(1, "acme/routing");
        renamed.updated_at = Utc::now();
        catalog.insert(renamed);
        dumper
            .dump(&[PackageId::new(1)], false, false)
            .await
            .expect("dump");

        let manifest = published_manifest(&backend).await;
        assert!(!manifest.channels.contains_key("acme/router"));
        assert!(manifest.channels.contains_key("acme/routing"));
    }

    #[tokio::test]
    async fn forced_dump_with_empty_catalog_publishes_empty_generation() {
        let (backend, _catalog, dumper) = setup();

        let ok = dumper.dump(&[], true, false).await.expect("dump");
        assert!(ok);

        let manifest = published_manifest(&backend).await;
        assert_eq!(manifest.generation, 1);
        assert!(manifest.channels.is_empty());
    }
}
