//! On-disk index manifest structure.
//!
//! The published index is a two-level artifact:
//!
//! - `manifests/root.json`: the root pointer, a single small file naming the
//!   current generation. It is the only file ever rewritten in place, and
//!   only via a CAS swap, so readers observe either the previous or the next
//!   generation in full.
//! - `manifests/gen/<generation>.json`: one immutable manifest file per
//!   generation, mapping distribution channels (package names) to the
//!   content-keyed shard files representing them.
//!
//! # Storage Layout
//!
//! ```text
//! <index root>/
//! ├── manifests/
//! │   ├── root.json              # Root pointer, CAS-swapped
//! │   └── gen/
//! │       ├── 00000000000000000001.json
//! │       └── 00000000000000000002.json
//! ├── shards/
//! │   └── <kk>/<content-key>.json   # Immutable, content-keyed
//! └── locks/
//!     ├── dump.lock
//!     └── dump-gc.lock
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use stratum_core::PackageId;

/// Reference from a channel to the shard currently representing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardRef {
    /// Catalog identifier of the package behind this channel.
    pub package_id: PackageId,

    /// Content key, `sha256:<hex>` over the shard's canonical bytes.
    pub key: String,

    /// Storage path of the shard file.
    pub path: String,
}

/// One immutable manifest generation.
///
/// Channels are ordered by name so serialization is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    /// Monotonically increasing generation marker.
    pub generation: u64,

    /// Channel name (package name) -> current shard.
    pub channels: BTreeMap<String, ShardRef>,

    /// When this generation was built.
    pub created_at: DateTime<Utc>,
}

impl IndexManifest {
    /// Creates the empty pre-first generation.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            generation: 0,
            channels: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Returns the next generation number.
    #[must_use]
    pub const fn next_generation(&self) -> u64 {
        self.generation + 1
    }
}

/// The root pointer, published atomically via CAS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootPointer {
    /// Generation the index currently serves.
    pub generation: u64,

    /// Path of the generation's manifest file.
    pub manifest_path: String,

    /// When the pointer was last swapped.
    pub updated_at: DateTime<Utc>,
}

/// Standard artifact paths within the index root.
pub mod paths {
    /// Root pointer file.
    pub const ROOT_POINTER: &str = "manifests/root.json";

    /// Prefix of generation manifest files.
    pub const GENERATION_PREFIX: &str = "manifests/gen/";

    /// Prefix of shard files.
    pub const SHARD_PREFIX: &str = "shards/";

    /// Prefix of lock files.
    pub const LOCK_PREFIX: &str = "locks/";

    /// Path of a generation manifest file.
    ///
    /// Zero-padded so lexicographic listing order matches numeric order.
    #[must_use]
    pub fn generation(generation: u64) -> String {
        format!("{GENERATION_PREFIX}{generation:020}.json")
    }

    /// Parses the generation number out of a manifest path.
    #[must_use]
    pub fn parse_generation(path: &str) -> Option<u64> {
        path.strip_prefix(GENERATION_PREFIX)?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_paths_roundtrip() {
        let path = paths::generation(42);
        assert_eq!(path, "manifests/gen/00000000000000000042.json");
        assert_eq!(paths::parse_generation(&path), Some(42));
        assert_eq!(paths::parse_generation("manifests/root.json"), None);
        assert_eq!(paths::parse_generation("manifests/gen/x.json"), None);
    }

    #[test]
    fn generation_paths_sort_numerically() {
        let mut files: Vec<String> = [2, 10, 1].iter().map(|g| paths::generation(*g)).collect();
        files.sort();
        assert_eq!(
            files
                .iter()
                .map(|p| paths::parse_generation(p).expect("gen"))
                .collect::<Vec<_>>(),
            vec![1, 2, 10]
        );
    }

    #[test]
    fn manifest_roundtrip() {
        let mut manifest = IndexManifest::empty();
        manifest.generation = 3;
        manifest.channels.insert(
            "acme/router".into(),
            ShardRef {
                package_id: PackageId::new(1),
                key: "sha256:abcd".into(),
                path: "shards/ab/abcd.json".into(),
            },
        );

        let json = serde_json::to_string_pretty(&manifest).expect("serialize");
        let parsed: IndexManifest = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed.generation, 3);
        assert_eq!(
            parsed.channels["acme/router"].key,
            manifest.channels["acme/router"].key
        );
    }

    #[test]
    fn next_generation_is_strict_successor() {
        let manifest = IndexManifest::empty();
        assert_eq!(manifest.next_generation(), 1);
    }
}
