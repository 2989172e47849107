//! Deploy gate: an external pause signal for index rebuilds.
//!
//! The deployment pipeline drops a marker file while a deploy is in
//! progress; every run checks for it first and skips without error while it
//! is present. This component only reads the marker.

use std::path::{Path, PathBuf};

/// Deploy gate check over a marker file path.
#[derive(Debug, Clone)]
pub struct DeployGate {
    path: PathBuf,
}

impl DeployGate {
    /// Creates a gate over the given marker path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the marker path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the gate is closed (marker present).
    ///
    /// If the marker's presence cannot be determined the gate is treated as
    /// closed: skipping one rebuild is harmless, racing a deploy is not.
    pub async fn is_closed(&self) -> bool {
        match tokio::fs::try_exists(&self.path).await {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "deploy gate check failed; treating as closed");
                true
            }
        }
    }
}
