//! Object-store backend adapter.
//!
//! Wraps any [`object_store::ObjectStore`] implementation (S3-compatible,
//! Azure Blob, GCS, or its local/in-memory stores), mapping keys onto
//! object paths under an optional prefix. Once-only puts use the store's
//! conditional-put mode; ref-key CAS uses etag-conditioned updates where
//! the store supports them, falling back to a hash check under a
//! per-key mutex elsewhere.
//!
//! Listing inherits the store's consistency model, which is exactly the
//! eventual-consistency contract the version index is designed around.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutMode, PutPayload};
use tokio::sync::Mutex;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::{payload_hash, Backend, ReplaceOutcome};

/// Adapter from [`Backend`] to an `object_store` implementation.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    ref_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for ObjectStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBackend")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreBackend {
    /// Wrap `store`, scoping all keys under `prefix` (may be empty).
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self {
            store,
            prefix,
            ref_locks: Mutex::new(HashMap::new()),
        }
    }

    fn path(&self, key: &str) -> ObjectPath {
        ObjectPath::from(format!("{}{key}", self.prefix))
    }

    fn strip(&self, path: &ObjectPath) -> String {
        let full = path.to_string();
        full.strip_prefix(&self.prefix).unwrap_or(&full).to_string()
    }

    async fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.ref_locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    fn map_err(key: &str, err: object_store::Error) -> StorageError {
        match err {
            object_store::Error::NotFound { .. } => StorageError::NotFound {
                key: key.to_string(),
                backtrace: snafu::Backtrace::capture(),
            },
            object_store::Error::AlreadyExists { .. } => StorageError::AlreadyExists {
                key: key.to_string(),
                backtrace: snafu::Backtrace::capture(),
            },
            other => StorageError::Backend {
                key: key.to_string(),
                detail: other.to_string(),
                backtrace: snafu::Backtrace::capture(),
            },
        }
    }
}

#[async_trait]
impl Backend for ObjectStoreBackend {
    async fn put(&self, key: &str, bytes: Bytes, if_absent: bool) -> StorageResult<()> {
        let path = self.path(key);
        let payload = PutPayload::from(bytes);
        let result = if if_absent {
            self.store
                .put_opts(&path, payload, PutMode::Create.into())
                .await
        } else {
            self.store.put(&path, payload).await
        };
        result.map(|_| ()).map_err(|e| Self::map_err(key, e))
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.path(key);
        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| Self::map_err(key, e))?;
        result.bytes().await.map_err(|e| Self::map_err(key, e))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.store.head(&self.path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(Self::map_err(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        match self.store.delete(&self.path(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Self::map_err(key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        // Object paths are '/'-delimited; partial trailing segments narrow
        // to the parent path and filter client-side.
        let full = format!("{}{prefix}", self.prefix);
        let dir_part = match full.rfind('/') {
            Some(i) => &full[..i],
            None => "",
        };
        let list_prefix = if dir_part.is_empty() {
            None
        } else {
            Some(ObjectPath::from(dir_part))
        };
        let metas: Vec<_> = self
            .store
            .list(list_prefix.as_ref())
            .try_collect()
            .await
            .map_err(|e| Self::map_err(prefix, e))?;
        let mut keys: Vec<String> = metas
            .into_iter()
            .map(|m| self.strip(&m.location))
            .filter(|k| k.starts_with(prefix))
            .collect();
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
        let path = self.path(key);

        // Resolve the current payload + entity tag under the lock.
        let current = match self.store.get(&path).await {
            Ok(result) => {
                let meta = result.meta.clone();
                let data = result
                    .bytes()
                    .await
                    .map_err(|e| Self::map_err(key, e))?;
                Some((payload_hash(&data), meta))
            }
            Err(object_store::Error::NotFound { .. }) => None,
            Err(e) => return Err(Self::map_err(key, e)),
        };

        let payload = PutPayload::from(bytes);
        match (expected_hash, current) {
            (None, None) => {
                match self
                    .store
                    .put_opts(&path, payload, PutMode::Create.into())
                    .await
                {
                    Ok(_) => Ok(ReplaceOutcome::Replaced),
                    Err(object_store::Error::AlreadyExists { .. }) => {
                        Ok(ReplaceOutcome::LostRace)
                    }
                    Err(e) => Err(Self::map_err(key, e)),
                }
            }
            (Some(expected), Some((actual, meta))) if expected == actual => {
                let update = object_store::UpdateVersion {
                    e_tag: meta.e_tag.clone(),
                    version: meta.version.clone(),
                };
                match self
                    .store
                    .put_opts(&path, payload, PutMode::Update(update).into())
                    .await
                {
                    Ok(_) => Ok(ReplaceOutcome::Replaced),
                    Err(object_store::Error::Precondition { .. }) => {
                        Ok(ReplaceOutcome::LostRace)
                    }
                    Err(e) => Err(Self::map_err(key, e)),
                }
            }
            _ => Ok(ReplaceOutcome::LostRace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn backend() -> ObjectStoreBackend {
        ObjectStoreBackend::new(Arc::new(InMemory::new()), "lib")
    }

    #[tokio::test]
    async fn roundtrip_under_prefix() {
        let backend = backend();
        backend
            .put("tdata/sym/1", Bytes::from_static(b"seg"), true)
            .await
            .expect("put");
        assert_eq!(
            backend.get("tdata/sym/1").await.expect("get"),
            Bytes::from_static(b"seg")
        );
        assert!(backend.exists("tdata/sym/1").await.expect("exists"));

        let keys = backend.list("tdata/").await.expect("list");
        assert_eq!(keys, vec!["tdata/sym/1".to_string()]);
    }

    #[tokio::test]
    async fn conditional_put_is_once_only() {
        let backend = backend();
        backend
            .put("ver/s/1", Bytes::from_static(b"a"), true)
            .await
            .expect("first");
        let err = backend
            .put("ver/s/1", Bytes::from_static(b"b"), true)
            .await
            .expect_err("second");
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn cas_advances_and_detects_races() {
        let backend = backend();
        assert_eq!(
            backend
                .atomic_replace("vref/s", None, Bytes::from_static(b"h1"))
                .await
                .expect("create"),
            ReplaceOutcome::Replaced
        );
        assert_eq!(
            backend
                .atomic_replace("vref/s", None, Bytes::from_static(b"h2"))
                .await
                .expect("stale create"),
            ReplaceOutcome::LostRace
        );
        assert_eq!(
            backend
                .atomic_replace(
                    "vref/s",
                    Some(payload_hash(b"h1")),
                    Bytes::from_static(b"h2")
                )
                .await
                .expect("cas"),
            ReplaceOutcome::Replaced
        );
        assert_eq!(
            backend.get("vref/s").await.expect("get"),
            Bytes::from_static(b"h2")
        );
    }
}
