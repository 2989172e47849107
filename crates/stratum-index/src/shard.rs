//! Shard serialization and content keys.
//!
//! A shard is an immutable file holding the serialized public metadata of
//! one package. Shards are content-keyed: the key is the SHA-256 of the
//! shard's canonical JSON bytes, so updates produce a new shard under a new
//! key and identical content maps to the same file. Writers never mutate or
//! delete shards; reclaiming superseded shards is the garbage collector's
//! sole responsibility.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::catalog::{PackageRecord, VersionMetadata};
use crate::error::{IndexError, Result};
use crate::manifest::{paths, ShardRef};

/// The serialized form of a package inside a shard file.
///
/// Deliberately excludes the staleness marker: it changes on every dump,
/// and including it would give identical metadata a fresh content key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardDocument {
    /// Package name.
    pub package: String,

    /// Published versions, keyed by version name.
    pub versions: BTreeMap<String, VersionMetadata>,

    /// Successor package if this entry was retired or merged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

impl ShardDocument {
    /// Builds the shard document for a catalog record.
    #[must_use]
    pub fn from_record(record: &PackageRecord) -> Self {
        Self {
            package: record.name.clone(),
            versions: record.versions.clone(),
            replacement: record.replacement.clone(),
        }
    }

    /// Serializes to canonical bytes.
    ///
    /// `BTreeMap` fields keep the output deterministic, so equal metadata
    /// always produces equal bytes and therefore an equal content key.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| IndexError::Serialization {
            message: format!("serialize shard for {}: {e}", self.package),
        })
    }
}

/// Computes the content key for shard bytes, `sha256:<hex>`.
#[must_use]
pub fn content_key(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    format!("sha256:{}", hex::encode(hash))
}

/// Returns the storage path for a content key.
///
/// Shards are fanned out under a two-character prefix directory to keep
/// directory sizes bounded.
#[must_use]
pub fn shard_path(key: &str) -> String {
    let hex = key.strip_prefix("sha256:").unwrap_or(key);
    let prefix = hex.get(..2).unwrap_or("00");
    format!("{}{prefix}/{hex}.json", paths::SHARD_PREFIX)
}

/// Builds the manifest reference for a record's shard bytes.
#[must_use]
pub fn shard_ref(record: &PackageRecord, bytes: &[u8]) -> ShardRef {
    let key = content_key(bytes);
    let path = shard_path(&key);
    ShardRef {
        package_id: record.id,
        key,
        path,
    }
}
