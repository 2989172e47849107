//! Staleness selection: which catalog entries need re-serialization.

use std::sync::Arc;

use stratum_core::PackageId;

use crate::catalog::Catalog;
use crate::error::Result;

/// Decides which catalog entries require re-serialization.
pub struct StalenessSelector {
    catalog: Arc<dyn Catalog>,
}

impl StalenessSelector {
    /// Creates a selector over the given catalog.
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Returns the identifiers to dump, ascending and deduplicated.
    ///
    /// With `force`, selection bypasses staleness and includes every entry
    /// that is not spam-retired. Without it, only entries whose staleness
    /// marker indicates a change since their last successful dump are
    /// returned; an empty result is the common no-op case.
    ///
    /// The ascending order is a correctness requirement: processing in a
    /// fixed order lets a crashed run be restarted without interleaving
    /// differently with the incremental path.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be queried.
    pub async fn select(&self, force: bool) -> Result<Vec<PackageId>> {
        let mut ids = if force {
            self.catalog.all_active_ids().await?
        } else {
            self.catalog.stale_package_ids().await?
        };

        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}
