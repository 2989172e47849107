//! Named command locks for cross-invocation mutual exclusion.
//!
//! Each run mode (`dump`, `dump-gc`) is guarded by its own named lock so a
//! collection pass may run concurrently with a dump, but never with another
//! instance of the same mode. There is no central lock server: the lock is a
//! CAS-guarded file in the index storage.
//!
//! - Acquisition writes a lock file with the holder's ID and expiry time
//!   under a `DoesNotExist` precondition; only one writer can succeed.
//! - Acquisition is single-attempt and non-blocking. A held, unexpired lock
//!   means another run is active and the caller skips its run.
//! - A lock whose TTL expired (abandoned by a dead process) is taken over
//!   atomically with a `MatchesVersion` precondition.
//! - If the backing storage is unavailable, acquisition fails closed.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use stratum_core::storage::{StorageBackend, WritePrecondition, WriteResult};
use stratum_core::Error as CoreError;

use crate::error::{IndexError, Result};

/// Default lock TTL.
///
/// Must comfortably exceed the longest expected run of the guarded mode;
/// a lock older than this is treated as abandoned.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(3600);

/// Lock file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    /// Unique lock holder ID.
    pub holder_id: String,

    /// When the lock expires.
    pub expires_at: DateTime<Utc>,

    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,

    /// Optional description of the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl LockInfo {
    /// Creates a new lock info with the given holder ID and TTL.
    #[must_use]
    pub fn new(holder_id: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            holder_id: holder_id.into(),
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(3600)),
            acquired_at: now,
            operation: None,
        }
    }

    /// Returns whether this lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// A named, non-blocking command lock.
pub struct CommandLock {
    storage: Arc<dyn StorageBackend>,
    name: String,
    lock_path: String,
    holder_id: String,
    ttl: Duration,
}

impl CommandLock {
    /// Creates a lock handle for the given command name.
    ///
    /// Each handle gets a unique holder ID for identification. Distinct
    /// names map to distinct lock files and never interact.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, name: impl Into<String>) -> Self {
        let name = name.into();
        let lock_path = format!("locks/{name}.lock");
        Self {
            storage,
            name,
            lock_path,
            holder_id: Ulid::new().to_string(),
            ttl: DEFAULT_LOCK_TTL,
        }
    }

    /// Sets the lock TTL.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the command name this lock guards.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the holder ID for this lock handle.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Attempts to acquire the lock once.
    ///
    /// Returns `Ok(None)` if another live holder exists. Never blocks or
    /// retries: contention means another run is active and the caller skips.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage is unavailable; callers must
    /// treat that the same as contention (fail closed).
    pub async fn try_acquire(&self) -> Result<Option<CommandLockGuard>> {
        let mut info = LockInfo::new(&self.holder_id, self.ttl);
        info.operation = Some(self.name.clone());

        let lock_bytes = Bytes::from(serde_json::to_vec(&info).map_err(|e| {
            IndexError::Serialization {
                message: format!("serialize lock: {e}"),
            }
        })?);

        match self
            .storage
            .put(
                &self.lock_path,
                lock_bytes.clone(),
                WritePrecondition::DoesNotExist,
            )
            .await?
        {
            WriteResult::Success { .. } => {
                return Ok(Some(CommandLockGuard {
                    storage: Arc::clone(&self.storage),
                    lock_path: self.lock_path.clone(),
                    holder_id: self.holder_id.clone(),
                    released: false,
                }));
            }
            WriteResult::PreconditionFailed { .. } => {
                // Lock exists; check whether it was abandoned.
            }
        }

        let existing = self.read_lock().await?;
        match existing {
            Some(existing) if existing.is_expired() => {
                // Take over the abandoned lock with CAS so two reclaimers
                // cannot both succeed.
                let Some(meta) = self.storage.head(&self.lock_path).await? else {
                    // Holder released between read and head; next run gets it.
                    return Ok(None);
                };

                match self
                    .storage
                    .put(
                        &self.lock_path,
                        lock_bytes,
                        WritePrecondition::MatchesVersion(meta.version),
                    )
                    .await?
                {
                    WriteResult::Success { .. } => {
                        tracing::warn!(
                            lock = %self.name,
                            abandoned_holder = %existing.holder_id,
                            "reclaimed abandoned lock"
                        );
                        Ok(Some(CommandLockGuard {
                            storage: Arc::clone(&self.storage),
                            lock_path: self.lock_path.clone(),
                            holder_id: self.holder_id.clone(),
                            released: false,
                        }))
                    }
                    WriteResult::PreconditionFailed { .. } => Ok(None),
                }
            }
            Some(_live) => Ok(None),
            None => Ok(None),
        }
    }

    /// Checks if the lock is currently held by a live holder.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read.
    pub async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .read_lock()
            .await?
            .is_some_and(|info| !info.is_expired()))
    }

    /// Forcefully breaks the lock (admin recovery operation).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file could not be deleted.
    pub async fn force_break(&self) -> Result<()> {
        self.storage.delete(&self.lock_path).await?;
        Ok(())
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        read_lock_file(self.storage.as_ref(), &self.lock_path).await
    }
}

async fn read_lock_file(
    storage: &dyn StorageBackend,
    lock_path: &str,
) -> Result<Option<LockInfo>> {
    match storage.get(lock_path).await {
        Ok(data) => {
            let info: LockInfo =
                serde_json::from_slice(&data).map_err(|e| IndexError::Serialization {
                    message: format!("parse lock: {e}"),
                })?;
            Ok(Some(info))
        }
        Err(CoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Guard for a held command lock.
///
/// Release is explicit and idempotent; a guard dropped without release logs
/// a warning and the lock is reclaimed via TTL expiry by a later run.
pub struct CommandLockGuard {
    storage: Arc<dyn StorageBackend>,
    lock_path: String,
    holder_id: String,
    released: bool,
}

impl CommandLockGuard {
    /// Returns the holder ID for this guard.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Releases the lock.
    ///
    /// Only deletes the lock file if this holder still owns it, so releasing
    /// after a TTL takeover by another run is a no-op. Safe to call more
    /// than once.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read or deleted.
    pub async fn release(mut self) -> Result<()> {
        self.do_release().await
    }

    async fn do_release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }

        if let Some(info) = read_lock_file(self.storage.as_ref(), &self.lock_path).await? {
            if info.holder_id == self.holder_id {
                self.storage.delete(&self.lock_path).await?;
            }
        }

        self.released = true;
        Ok(())
    }
}

impl Drop for CommandLockGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                lock_path = %self.lock_path,
                holder = %self.holder_id,
                "lock guard dropped without release; lock will expire via TTL"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::MemoryBackend;

    fn storage() -> Arc<dyn StorageBackend> {
        Arc::new(MemoryBackend::new())
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let storage = storage();
        let lock = CommandLock::new(Arc::clone(&storage), "dump");

        let guard = lock.try_acquire().await.expect("acquire").expect("guard");
        assert!(!guard.holder_id().is_empty());
        assert!(lock.is_locked().await.expect("check"));

        guard.release().await.expect("release");
        assert!(!lock.is_locked().await.expect("check"));
    }

    #[tokio::test]
    async fn second_acquisition_fails_while_held() {
        let storage = storage();
        let lock1 = CommandLock::new(Arc::clone(&storage), "dump");
        let lock2 = CommandLock::new(Arc::clone(&storage), "dump");

        let _guard = lock1.try_acquire().await.expect("acquire").expect("guard");
        let second = lock2.try_acquire().await.expect("acquire");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn distinct_names_are_independent() {
        let storage = storage();
        let dump = CommandLock::new(Arc::clone(&storage), "dump");
        let gc = CommandLock::new(Arc::clone(&storage), "dump-gc");

        let dump_guard = dump.try_acquire().await.expect("acquire").expect("guard");
        let gc_guard = gc.try_acquire().await.expect("acquire").expect("guard");

        dump_guard.release().await.expect("release");
        gc_guard.release().await.expect("release");
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimed() {
        let storage = storage();
        let lock1 =
            CommandLock::new(Arc::clone(&storage), "dump").with_ttl(Duration::from_millis(1));
        let lock2 = CommandLock::new(Arc::clone(&storage), "dump");

        let guard1 = lock1.try_acquire().await.expect("acquire").expect("guard");
        tokio::time::sleep(Duration::from_millis(10)).await;

        let guard2 = lock2.try_acquire().await.expect("acquire").expect("guard");
        assert_ne!(guard1.holder_id(), guard2.holder_id());

        // The superseded holder's release must not clobber the new owner.
        guard1.release().await.expect("release");
        assert!(lock2.is_locked().await.expect("check"));

        guard2.release().await.expect("release");
    }

    #[tokio::test]
    async fn concurrent_same_name_acquisitions_admit_one() {
        let storage = storage();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = Arc::clone(&storage);
                tokio::spawn(async move {
                    let lock = CommandLock::new(storage, "dump");
                    lock.try_acquire().await.expect("acquire").is_some()
                })
            })
            .collect();

        let mut acquired = 0;
        for handle in handles {
            if handle.await.expect("join") {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 1, "exactly one concurrent acquisition may win");
    }

    #[tokio::test]
    async fn force_break_clears_lock() {
        let storage = storage();
        let lock = CommandLock::new(Arc::clone(&storage), "dump");

        let _guard = lock.try_acquire().await.expect("acquire").expect("guard");
        lock.force_break().await.expect("break");
        assert!(!lock.is_locked().await.expect("check"));
    }
}
