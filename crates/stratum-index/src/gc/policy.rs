//! Retention policy configuration.

use serde::{Deserialize, Serialize};

/// Retention policy for index artifacts.
///
/// Controls how long superseded generations and shards are kept before the
/// garbage collector may remove them.
///
/// - **Generation floor**: the newest `keep_generations` manifests are always
///   retained, along with every shard they reference, so recent readers can
///   finish resolving.
/// - **Delay window**: nothing younger than `delay_hours` is deleted. This
///   must exceed both the longest expected dump (protecting a concurrent
///   dump's not-yet-published artifacts) and the longest plausible reader
///   session against an old manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Always retain the newest N generation manifests.
    pub keep_generations: u32,

    /// Minimum age (in hours) before any artifact may be deleted.
    pub delay_hours: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_generations: 10,
            delay_hours: 24,
        }
    }
}

impl RetentionPolicy {
    /// Creates a new retention policy with the specified values.
    #[must_use]
    pub const fn new(keep_generations: u32, delay_hours: u32) -> Self {
        Self {
            keep_generations,
            delay_hours,
        }
    }

    /// A policy for cost-sensitive deployments with frequent dumps.
    #[must_use]
    pub const fn aggressive() -> Self {
        Self {
            keep_generations: 3,
            delay_hours: 6,
        }
    }

    /// A conservative policy for deployments with slow mirrors.
    #[must_use]
    pub const fn conservative() -> Self {
        Self {
            keep_generations: 30,
            delay_hours: 72,
        }
    }

    /// Validates the policy settings.
    ///
    /// Returns an error message if validation fails.
    #[must_use]
    pub fn validate(&self) -> Option<String> {
        if self.keep_generations == 0 {
            return Some("keep_generations must be at least 1".to_string());
        }
        None
    }
}
