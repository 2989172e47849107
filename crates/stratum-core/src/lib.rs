//! # stratum-core
//!
//! Core abstractions for the Stratum package index dumper.
//!
//! This crate provides the foundational types shared by the index engine and
//! the CLI:
//!
//! - **Storage Backends**: Conditional-write (CAS) object storage over the
//!   local filesystem, plus an in-memory backend for tests
//! - **Identifiers**: Strongly-typed package identifiers
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Structured logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `stratum-core` is the only crate allowed to define shared primitives.
//! The index engine consumes storage exclusively through [`StorageBackend`],
//! so the published artifact layout never depends on a concrete store.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod fs;
pub mod id;
pub mod observability;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::fs::FilesystemBackend;
    pub use crate::id::PackageId;
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
}

pub use error::{Error, Result};
pub use fs::FilesystemBackend;
pub use id::PackageId;
pub use observability::{init_logging, LogFormat};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
