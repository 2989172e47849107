//! Strongly-typed identifiers for Stratum entities.
//!
//! Package identifiers are assigned by the backing catalog and are stable,
//! opaque, and totally ordered. The dumper relies on the ordering to process
//! entries deterministically so an interrupted run can be restarted safely.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A unique identifier for a package in the backing catalog.
///
/// Wraps the catalog's numeric primary key. The numeric order is the
/// canonical processing order for dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(u64);

impl PackageId {
    /// Creates a package ID from its raw catalog value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw catalog value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PackageId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl FromStr for PackageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>().map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid package ID '{s}': {e}"),
        })
    }
}
