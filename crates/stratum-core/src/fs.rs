//! Local filesystem storage backend.
//!
//! Backs the published index directory. Every write lands in a temporary
//! file in the destination directory and is moved into place with an atomic
//! rename, so readers fetching files mid-update observe either the previous
//! or the next content, never a torn write.
//!
//! Conditional-write semantics:
//! - `DoesNotExist` is enforced with `hard_link`, which fails atomically if
//!   the destination already exists, so two processes cannot both succeed.
//! - `MatchesVersion` compares a token derived from file metadata. In-process
//!   conditional writes are serialized through a mutex; cross-process mutual
//!   exclusion of manifest writers is the command lock's job.
//!
//! Version tokens are `<mtime-nanos>-<len>`. On filesystems with coarse
//! timestamp resolution two writes of identical length inside one tick could
//! alias; manifest payloads embed a growing generation so their length and
//! content always change.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::storage::{validate_path, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Filesystem-rooted storage backend.
///
/// All keys are slash-separated paths relative to the root directory.
pub struct FilesystemBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
    tmp_counter: AtomicU64,
}

impl FilesystemBackend {
    /// Creates a backend rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::storage_with_source(format!("create index root: {e}"), e))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
            tmp_counter: AtomicU64::new(0),
        })
    }

    /// Returns the root directory of this backend.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        let mut abs = self.root.clone();
        for segment in path.split('/') {
            abs.push(segment);
        }
        Ok(abs)
    }

    fn tmp_path(&self, target: &Path) -> PathBuf {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let name = target
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{name}.stratum-tmp.{}.{n}", std::process::id()))
    }

    async fn stat_version(abs: &Path) -> Result<Option<(String, ObjectMeta)>> {
        match tokio::fs::metadata(abs).await {
            Ok(meta) => {
                let mtime_nanos = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| d.as_nanos());
                let version = format!("{mtime_nanos}-{}", meta.len());
                let last_modified: Option<DateTime<Utc>> =
                    meta.modified().ok().map(DateTime::<Utc>::from);
                let object = ObjectMeta {
                    path: String::new(),
                    size: meta.len(),
                    version: version.clone(),
                    last_modified,
                };
                Ok(Some((version, object)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_with_source(format!("stat {abs:?}: {e}"), e)),
        }
    }

    async fn write_tmp(&self, abs: &Path, data: &Bytes) -> Result<PathBuf> {
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage_with_source(format!("create dir {parent:?}: {e}"), e))?;
        }
        let tmp = self.tmp_path(abs);
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Error::storage_with_source(format!("write tmp {tmp:?}: {e}"), e))?;
        Ok(tmp)
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let abs = self.resolve(path)?;
        match tokio::fs::read(&abs).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object not found: {path}")))
            }
            Err(e) => Err(Error::storage_with_source(format!("read {path}: {e}"), e)),
        }
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let abs = self.resolve(path)?;
        let _guard = self.write_lock.lock().await;

        match precondition {
            WritePrecondition::DoesNotExist => {
                let tmp = self.write_tmp(&abs, &data).await?;
                // hard_link fails atomically if the destination exists, so
                // exclusivity holds even against another process.
                let link_result = tokio::fs::hard_link(&tmp, &abs).await;
                let _ = tokio::fs::remove_file(&tmp).await;
                match link_result {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                        let current = Self::stat_version(&abs)
                            .await?
                            .map_or_else(|| "0".to_string(), |(v, _)| v);
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: current,
                        });
                    }
                    Err(e) => {
                        return Err(Error::storage_with_source(format!("link {path}: {e}"), e));
                    }
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                match Self::stat_version(&abs).await? {
                    Some((current, _)) if current == expected => {}
                    Some((current, _)) => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: current,
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                }
                let tmp = self.write_tmp(&abs, &data).await?;
                tokio::fs::rename(&tmp, &abs)
                    .await
                    .map_err(|e| Error::storage_with_source(format!("rename {path}: {e}"), e))?;
            }
            WritePrecondition::None => {
                let tmp = self.write_tmp(&abs, &data).await?;
                tokio::fs::rename(&tmp, &abs)
                    .await
                    .map_err(|e| Error::storage_with_source(format!("rename {path}: {e}"), e))?;
            }
        }

        let (version, _) = Self::stat_version(&abs).await?.ok_or_else(|| Error::Internal {
            message: format!("object vanished after write: {path}"),
        })?;
        Ok(WriteResult::Success { version })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let abs = self.resolve(path)?;
        match tokio::fs::remove_file(&abs).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with_source(format!("delete {path}: {e}"), e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || list_blocking(&root, &prefix))
            .await
            .map_err(|e| Error::Internal {
                message: format!("list task panicked: {e}"),
            })?
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let abs = self.resolve(path)?;
        Ok(Self::stat_version(&abs).await?.map(|(_, mut meta)| {
            meta.path = path.to_string();
            meta
        }))
    }
}

fn list_blocking(root: &Path, prefix: &str) -> Result<Vec<ObjectMeta>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                return Err(Error::storage_with_source(
                    format!("read dir {dir:?}: {e}"),
                    e,
                ))
            }
        };

        for entry in entries {
            let entry =
                entry.map_err(|e| Error::storage_with_source(format!("read entry: {e}"), e))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|e| Error::storage_with_source(format!("file type: {e}"), e))?;

            if file_type.is_dir() {
                stack.push(path);
                continue;
            }

            let name = entry.file_name();
            // Skip in-flight temporaries left by interrupted writers.
            if name.to_string_lossy().contains(".stratum-tmp.") {
                continue;
            }

            let rel = path
                .strip_prefix(root)
                .map_err(|e| Error::Internal {
                    message: format!("path outside root: {e}"),
                })?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if !rel.starts_with(prefix) {
                continue;
            }

            let meta = entry
                .metadata()
                .map_err(|e| Error::storage_with_source(format!("stat {rel}: {e}"), e))?;
            let mtime_nanos = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |d| d.as_nanos());

            out.push(ObjectMeta {
                path: rel,
                size: meta.len(),
                version: format!("{mtime_nanos}-{}", meta.len()),
                last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            });
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, FilesystemBackend) {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FilesystemBackend::new(dir.path()).expect("backend");
        (dir, backend)
    }

    #[tokio::test]
    async fn roundtrip() {
        let (_dir, backend) = backend();
        let data = Bytes::from(r#"{"hello":"world"}"#);

        let result = backend
            .put("manifests/root.json", data.clone(), WritePrecondition::None)
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::Success { .. }));

        let read = backend.get("manifests/root.json").await.expect("get");
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn does_not_exist_is_exclusive() {
        let (_dir, backend) = backend();

        let first = backend
            .put(
                "shards/aa/x.json",
                Bytes::from("a"),
                WritePrecondition::DoesNotExist,
            )
            .await
            .expect("put");
        assert!(matches!(first, WriteResult::Success { .. }));

        let second = backend
            .put(
                "shards/aa/x.json",
                Bytes::from("b"),
                WritePrecondition::DoesNotExist,
            )
            .await
            .expect("put");
        assert!(matches!(second, WriteResult::PreconditionFailed { .. }));

        // Loser must not have clobbered the winner.
        let read = backend.get("shards/aa/x.json").await.expect("get");
        assert_eq!(read, Bytes::from("a"));
    }

    #[tokio::test]
    async fn matches_version_swap() {
        let (_dir, backend) = backend();

        let result = backend
            .put("root.json", Bytes::from("gen-1"), WritePrecondition::None)
            .await
            .expect("put");
        let version = match result {
            WriteResult::Success { version } => version,
            WriteResult::PreconditionFailed { .. } => panic!("expected success"),
        };

        let result = backend
            .put(
                "root.json",
                Bytes::from("gen-2-longer"),
                WritePrecondition::MatchesVersion(version.clone()),
            )
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::Success { .. }));

        let result = backend
            .put(
                "root.json",
                Bytes::from("gen-3"),
                WritePrecondition::MatchesVersion(version),
            )
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn matches_version_on_missing_object_fails() {
        let (_dir, backend) = backend();
        let result = backend
            .put(
                "missing.json",
                Bytes::from("x"),
                WritePrecondition::MatchesVersion("123-4".into()),
            )
            .await
            .expect("put");
        assert!(matches!(result, WriteResult::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn list_skips_temporaries_and_filters_prefix() {
        let (dir, backend) = backend();
        backend
            .put("shards/aa/1.json", Bytes::from("1"), WritePrecondition::None)
            .await
            .expect("put");
        backend
            .put("manifests/gen/1.json", Bytes::from("m"), WritePrecondition::None)
            .await
            .expect("put");

        // Simulate an interrupted writer's leftover temp file.
        std::fs::write(
            dir.path().join("shards/aa/.x.json.stratum-tmp.1.0"),
            b"partial",
        )
        .expect("write tmp");

        let shards = backend.list("shards/").await.expect("list");
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].path, "shards/aa/1.json");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, backend) = backend();
        backend
            .put("x.json", Bytes::from("x"), WritePrecondition::None)
            .await
            .expect("put");
        backend.delete("x.json").await.expect("delete");
        backend.delete("x.json").await.expect("second delete");
        assert!(backend.head("x.json").await.expect("head").is_none());
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let (_dir, backend) = backend();
        let result = backend.put(
            "../escape.json",
            Bytes::from("x"),
            WritePrecondition::None,
        );
        assert!(result.await.is_err());
    }
}
