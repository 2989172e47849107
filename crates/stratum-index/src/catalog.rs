//! The backing catalog boundary.
//!
//! The catalog is the mutable store of package records that the index is
//! derived from. It is externally owned: this crate only consumes the query
//! interface defined here and advances per-entry staleness markers after a
//! successful dump. Any storage engine can sit behind the [`Catalog`] trait;
//! the in-memory implementation below backs tests and small deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use stratum_core::PackageId;

use crate::error::{IndexError, Result};

/// Replacement-pointer sentinel marking an entry as spam-retired.
///
/// Entries whose replacement points at this value are excluded from forced
/// dumps. Other replacement values dump normally.
pub const SPAM_REPLACEMENT: &str = "spam/spam";

/// Metadata for a single published version of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMetadata {
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Source repository URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Distribution archive URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dist: Option<String>,

    /// Dependency requirements, name -> constraint.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requires: BTreeMap<String, String>,
}

/// One package's authoritative record in the backing catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    /// Stable catalog identifier.
    pub id: PackageId,

    /// Package name; the distribution channel it is published under.
    pub name: String,

    /// Successor package if this entry was retired or merged.
    /// The value [`SPAM_REPLACEMENT`] flags spam retirement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,

    /// Published versions, keyed by version name.
    pub versions: BTreeMap<String, VersionMetadata>,

    /// Last modification of the record in the catalog.
    pub updated_at: DateTime<Utc>,

    /// Staleness marker: when the entry was last successfully dumped.
    /// Updated only by the shard writer after a successful publication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dumped_at: Option<DateTime<Utc>>,
}

impl PackageRecord {
    /// Returns whether this entry is spam-retired.
    #[must_use]
    pub fn is_spam_retired(&self) -> bool {
        self.replacement.as_deref() == Some(SPAM_REPLACEMENT)
    }

    /// Returns whether the entry changed since its last successful dump.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        match self.dumped_at {
            Some(dumped_at) => self.updated_at > dumped_at,
            None => true,
        }
    }
}

/// Query interface of the backing catalog.
///
/// All sequences of identifiers are expected in ascending order; the
/// staleness selector re-sorts defensively since the ordering is a
/// correctness requirement for deterministic, resumable dumps.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns identifiers whose staleness marker indicates they changed
    /// since their last successful dump.
    async fn stale_package_ids(&self) -> Result<Vec<PackageId>>;

    /// Returns every identifier that is not spam-retired.
    async fn all_active_ids(&self) -> Result<Vec<PackageId>>;

    /// Loads the current record for an entry.
    ///
    /// Returns `None` if the entry no longer exists in the catalog.
    async fn load_package(&self, id: PackageId) -> Result<Option<PackageRecord>>;

    /// Advances the entry's staleness marker to "dumped as of now".
    async fn mark_dumped(&self, id: PackageId) -> Result<()>;
}

/// In-memory catalog for tests and small deployments.
///
/// Thread-safe via `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: RwLock<BTreeMap<PackageId, PackageRecord>>,
}

impl MemoryCatalog {
    /// Creates a new empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub fn insert(&self, record: PackageRecord) {
        self.records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(record.id, record);
    }

    /// Removes a record, simulating deletion from the catalog.
    pub fn remove(&self, id: PackageId) {
        self.records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id);
    }

    /// Bumps an entry's modification time, making it stale again.
    pub fn touch(&self, id: PackageId) {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(record) = records.get_mut(&id) {
            record.updated_at = Utc::now();
        }
    }

    /// Returns a snapshot of a record, if present.
    #[must_use]
    pub fn get(&self, id: PackageId) -> Option<PackageRecord> {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<PackageId, PackageRecord>> {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn stale_package_ids(&self) -> Result<Vec<PackageId>> {
        Ok(self
            .read()
            .values()
            .filter(|r| r.is_stale())
            .map(|r| r.id)
            .collect())
    }

    async fn all_active_ids(&self) -> Result<Vec<PackageId>> {
        Ok(self
            .read()
            .values()
            .filter(|r| !r.is_spam_retired())
            .map(|r| r.id)
            .collect())
    }

    async fn load_package(&self, id: PackageId) -> Result<Option<PackageRecord>> {
        Ok(self.read().get(&id).cloned())
    }

    async fn mark_dumped(&self, id: PackageId) -> Result<()> {
        let mut records = self
            .records
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = records.get_mut(&id).ok_or_else(|| IndexError::Catalog {
            message: format!("cannot mark unknown package {id} as dumped"),
        })?;
        record.dumped_at = Some(Utc::now());
        Ok(())
    }
}

/// Builds a minimal record for tests.
#[cfg(test)]
pub(crate) fn test_record(id: u64, name: &str) -> PackageRecord {
    let mut versions = BTreeMap::new();
    versions.insert(
        "1.0.0".to_string(),
        VersionMetadata {
            description: Some(format!("{name} test fixture")),
            source: Some(format!("https://example.org/{name}.git")),
            dist: None,
            requires: BTreeMap::new(),
        },
    );
    PackageRecord {
        id: PackageId::new(id),
        name: name.to_string(),
        replacement: None,
        versions,
        updated_at: Utc::now(),
        dumped_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_records_are_stale() {
        let catalog = MemoryCatalog::new();
        catalog.insert(test_record(1, "acme/router"));

        let stale = catalog.stale_package_ids().await.expect("stale");
        assert_eq!(stale, vec![PackageId::new(1)]);
    }

    #[tokio::test]
    async fn mark_dumped_clears_staleness() {
        let catalog = MemoryCatalog::new();
        catalog.insert(test_record(1, "acme/router"));

        catalog.mark_dumped(PackageId::new(1)).await.expect("mark");
        assert!(catalog.stale_package_ids().await.expect("stale").is_empty());

        catalog.touch(PackageId::new(1));
        assert_eq!(
            catalog.stale_package_ids().await.expect("stale"),
            vec![PackageId::new(1)]
        );
    }

    #[tokio::test]
    async fn active_ids_exclude_spam_retired() {
        let catalog = MemoryCatalog::new();
        catalog.insert(test_record(1, "acme/router"));
        catalog.insert(test_record(2, "acme/http"));
        let mut spam = test_record(3, "evil/seo");
        spam.replacement = Some(SPAM_REPLACEMENT.to_string());
        catalog.insert(spam);

        let active = catalog.all_active_ids().await.expect("active");
        assert_eq!(active, vec![PackageId::new(1), PackageId::new(2)]);
    }

    #[tokio::test]
    async fn non_spam_replacement_stays_active() {
        let catalog = MemoryCatalog::new();
        let mut replaced = test_record(5, "old/name");
        replaced.replacement = Some("new/name".to_string());
        catalog.insert(replaced);

        let active = catalog.all_active_ids().await.expect("active");
        assert_eq!(active, vec![PackageId::new(5)]);
    }

    #[tokio::test]
    async fn mark_dumped_on_missing_package_errors() {
        let catalog = MemoryCatalog::new();
        let result = catalog.mark_dumped(PackageId::new(99)).await;
        assert!(matches!(result, Err(IndexError::Catalog { .. })));
    }
}
