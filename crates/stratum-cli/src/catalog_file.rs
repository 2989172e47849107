//! JSON-file-backed catalog adapter.
//!
//! The real backing catalog is an external system; this adapter lets the
//! CLI run against a plain JSON file of package records, which is enough
//! for small registries and for exercising the pipeline end to end. Each
//! staleness-marker update rewrites the file through a temporary-then-rename
//! step so a crash never truncates it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;

use stratum_core::PackageId;
use stratum_index::catalog::{Catalog, PackageRecord};
use stratum_index::error::{IndexError, Result};

/// Catalog stored as a JSON array of package records.
pub struct FileCatalog {
    path: PathBuf,
    records: RwLock<BTreeMap<PackageId, PackageRecord>>,
}

impl FileCatalog {
    /// Loads the catalog from the given file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| IndexError::Catalog {
                message: format!("read catalog {}: {e}", path.display()),
            })?;
        let list: Vec<PackageRecord> =
            serde_json::from_slice(&bytes).map_err(|e| IndexError::Catalog {
                message: format!("parse catalog {}: {e}", path.display()),
            })?;

        let records = list.into_iter().map(|r| (r.id, r)).collect();
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// The catalog file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, list: Vec<PackageRecord>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&list).map_err(|e| IndexError::Catalog {
            message: format!("serialize catalog: {e}"),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| IndexError::Catalog {
                message: format!("write catalog {}: {e}", tmp.display()),
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| IndexError::Catalog {
                message: format!("replace catalog {}: {e}", self.path.display()),
            })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<PackageId, PackageRecord>> {
        self.records
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Catalog for FileCatalog {
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
        let snapshot = {
            let mut records = self
                .records
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let record = records.get_mut(&id).ok_or_else(|| IndexError::Catalog {
                message: format!("cannot mark unknown package {id} as dumped"),
            })?;
            record.dumped_at = Some(chrono::Utc::now());
            records.values().cloned().collect::<Vec<_>>()
        };

        self.persist(snapshot).await
    }
}
