//! Local-filesystem backend.
//!
//! Keys map one-to-one onto path segments under the root directory. Writes
//! go through a write-then-rename sequence so readers never observe a
//! partially written object, and once-only puts use create-new semantics
//! on the target path.
//!
//! POSIX rename gives atomic replacement but not compare-and-swap, so
//! `atomic_replace` serializes per key behind an in-process async mutex and
//! re-checks the stored payload hash under it. That is linearizable for a
//! single writer process; multi-process deployments should anchor refs in a
//! backend with native CAS.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use snafu::prelude::*;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::storage::error::{IoSnafu, StorageError, StorageResult};
use crate::storage::{payload_hash, Backend, ReplaceOutcome};

/// Filesystem-backed store rooted at a directory.
#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
    ref_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocalBackend {
    /// Open a backend rooted at `root`; the directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ref_locks: Mutex::new(HashMap::new()),
        }
    }

    fn abs(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.ref_locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    async fn create_parent(&self, abs: &Path, key: &str) -> StorageResult<()> {
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)
                .await
                .context(IoSnafu { key })?;
        }
        Ok(())
    }

    /// Write via temp file + fsync + rename.
    async fn write_atomic(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        let abs = self.abs(key);
        self.create_parent(&abs, key).await?;
        let tmp = abs.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp).await.context(IoSnafu { key })?;
            file.write_all(bytes).await.context(IoSnafu { key })?;
            file.sync_all().await.context(IoSnafu { key })?;
        }
        fs::rename(&tmp, &abs).await.context(IoSnafu { key })?;
        Ok(())
    }

    /// Create-new write; fails when the object already exists.
    async fn write_new(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        let abs = self.abs(key);
        self.create_parent(&abs, key).await?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&abs)
            .await
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    StorageError::AlreadyExists {
                        key: key.to_string(),
                        backtrace: snafu::Backtrace::capture(),
                    }
                } else {
                    StorageError::Io {
                        key: key.to_string(),
                        source: e,
                        backtrace: snafu::Backtrace::capture(),
                    }
                }
            })?;
        file.write_all(bytes).await.context(IoSnafu { key })?;
        file.sync_all().await.context(IoSnafu { key })?;
        Ok(())
    }

    fn walk<'a>(
        dir: PathBuf,
        rel: String,
        out: &'a mut Vec<String>,
    ) -> futures::future::BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().to_string();
                let child_rel = if rel.is_empty() {
                    name.clone()
                } else {
                    format!("{rel}/{name}")
                };
                let ty = entry.file_type().await?;
                if ty.is_dir() {
                    Self::walk(entry.path(), child_rel, out).await?;
                } else if !name.ends_with(".tmp") {
                    out.push(child_rel);
                }
            }
            Ok(())
        })
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn put(&self, key: &str, bytes: Bytes, if_absent: bool) -> StorageResult<()> {
        if if_absent {
            self.write_new(key, &bytes).await
        } else {
            self.write_atomic(key, &bytes).await
        }
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        match fs::read(self.abs(key)).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StorageError::NotFound {
                key: key.to_string(),
                backtrace: snafu::Backtrace::capture(),
            }),
            Err(e) => Err(e).context(IoSnafu { key }),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match fs::metadata(self.abs(key)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context(IoSnafu { key }),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.abs(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(IoSnafu { key }),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // Walk from the deepest directory the prefix pins down, then apply
        // the prefix as a plain string filter so partial segments work.
        let dir_part = match prefix.rfind('/') {
            Some(i) => &prefix[..i],
            None => "",
        };
        let mut keys = Vec::new();
        Self::walk(self.root.join(dir_part), dir_part.to_string(), &mut keys)
            .await
            .context(IoSnafu { key: prefix })?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort_unstable();
        Ok(keys)
    }

    async fn atomic_replace(
        &self,
        key: &str,
        expected_hash: Option<u64>,
        bytes: Bytes,
    ) -> StorageResult<ReplaceOutcome> {
        let lock = self.lock_for(key).await;
        let _guard = lock.lock().await;

        let current = match self.get(key).await {
            Ok(existing) => Some(payload_hash(&existing)),
            Err(StorageError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        if current != expected_hash {
            return Ok(ReplaceOutcome::LostRace);
        }
        self.write_atomic(key, &bytes).await?;
        Ok(ReplaceOutcome::Replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn put_get_roundtrip_with_nested_keys() -> TestResult {
        let tmp = TempDir::new()?;
        let backend = LocalBackend::new(tmp.path());

        backend
            .put("tdata/sym/1/2/abc", Bytes::from_static(b"payload"), true)
            .await?;
        let back = backend.get("tdata/sym/1/2/abc").await?;
        assert_eq!(back, Bytes::from_static(b"payload"));
        assert!(backend.exists("tdata/sym/1/2/abc").await?);
        Ok(())
    }

    #[tokio::test]
    async fn once_only_put_refuses_overwrite() -> TestResult {
        let tmp = TempDir::new()?;
        let backend = LocalBackend::new(tmp.path());

        backend.put("ver/s/1", Bytes::from_static(b"a"), true).await?;
        let err = backend
            .put("ver/s/1", Bytes::from_static(b"b"), true)
            .await
            .expect_err("must not overwrite");
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn get_missing_returns_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        let backend = LocalBackend::new(tmp.path());

        let err = backend.get("nope").await.expect_err("missing");
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(!backend.exists("nope").await?);
        Ok(())
    }

    #[tokio::test]
    async fn list_filters_by_string_prefix() -> TestResult {
        let tmp = TempDir::new()?;
        let backend = LocalBackend::new(tmp.path());

        for key in ["ver/sym/1", "ver/sym/2", "ver/other/1", "vref/sym"] {
            backend.put(key, Bytes::from_static(b"x"), true).await?;
        }
        let keys = backend.list("ver/sym/").await?;
        assert_eq!(keys, vec!["ver/sym/1".to_string(), "ver/sym/2".to_string()]);

        let all = backend.list("").await?;
        assert_eq!(all.len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn atomic_replace_serializes_per_key() -> TestResult {
        let tmp = TempDir::new()?;
        let backend = Arc::new(LocalBackend::new(tmp.path()));

        assert_eq!(
            backend
                .atomic_replace("vref/s", None, Bytes::from_static(b"head1"))
                .await?,
            ReplaceOutcome::Replaced
        );

        // A writer that still expects absence loses.
        assert_eq!(
            backend
                .atomic_replace("vref/s", None, Bytes::from_static(b"head2"))
                .await?,
            ReplaceOutcome::LostRace
        );

        let hash = payload_hash(b"head1");
        assert_eq!(
            backend
                .atomic_replace("vref/s", Some(hash), Bytes::from_static(b"head2"))
                .await?,
            ReplaceOutcome::Replaced
        );
        assert_eq!(backend.get("vref/s").await?, Bytes::from_static(b"head2"));
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent() -> TestResult {
        let tmp = TempDir::new()?;
        let backend = LocalBackend::new(tmp.path());

        backend.put("k", Bytes::from_static(b"v"), true).await?;
        backend.delete("k").await?;
        backend.delete("k").await?;
        assert!(!backend.exists("k").await?);
        Ok(())
    }
}
