//! Garbage collection for index artifacts.
//!
//! Every dump writes new content-keyed shards and a new generation manifest
//! without deleting anything, so storage grows until superseded artifacts
//! are reclaimed. The collector is a mark-and-sweep over the small
//! append-mostly graph of manifest generations and the shard keys they
//! reference:
//!
//! - **Mark**: shard keys referenced by the currently published generation
//!   and by every generation inside the retention window.
//! - **Sweep**: delete shard files outside that set, then generation
//!   manifests outside the retained set. Nothing younger than the delay
//!   window is ever deleted, so a reader who fetched an older manifest can
//!   still resolve every shard it references.
//!
//! A sweep never runs concurrently with another sweep (its own command
//! lock), but may run concurrently with a dump: dumps only add new shards,
//! which the delay window protects.

mod collector;
mod policy;

pub use collector::{GarbageCollector, GcReport, GcResult};
pub use policy::RetentionPolicy;
