//! Embedded in-memory backend.
//!
//! Serves two roles: the single-process embedded store (everything under
//! one mutex, so `atomic_replace` is trivially linearizable) and the test
//! double carrying the failure-simulation hooks recognized by the
//! environment knobs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::storage::error::{FailureOp, StorageError, StorageResult};
use crate::storage::{payload_hash, Backend, ReplaceOutcome};

/// Countdown failure injectors.
///
/// Arming a hook with `n` makes the next `n` matching operations fail with
/// [`StorageError::Simulated`]; subsequent operations proceed normally.
#[derive(Debug, Default)]
pub struct FailureSim {
    reads: AtomicUsize,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl FailureSim {
    /// Fail the next `n` read operations.
    pub fn fail_reads(&self, n: usize) {
        self.reads.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` write operations.
    pub fn fail_writes(&self, n: usize) {
        self.writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` delete operations.
    pub fn fail_deletes(&self, n: usize) {
        self.deletes.store(n, Ordering::SeqCst);
    }

    fn check(&self, op: FailureOp, key: &str) -> StorageResult<()> {
        let counter = match op {
            FailureOp::Read => &self.reads,
            FailureOp::Write => &self.writes,
            FailureOp::Delete => &self.deletes,
        };
        let armed = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if armed {
            return Err(StorageError::Simulated {
                op,
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

/// Key→bytes map behind one mutex.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, Bytes>>,
    sim: Arc<FailureSim>,
}

impl MemoryBackend {
    /// Fresh empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the failure injectors.
    pub fn failures(&self) -> Arc<FailureSim> {
        Arc::clone(&self.sim)
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// True when no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn put(&self, key: &str, bytes: Bytes, if_absent: bool) -> StorageResult<()> {
        self.sim.check(FailureOp::Write, key)?;
        let mut objects = self.objects.lock();
        if if_absent && objects.contains_key(key) {
            return Err(StorageError::AlreadyExists {
                key: key.to_string(),
                backtrace: snafu::Backtrace::capture(),
            });
        }
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.sim.check(FailureOp::Read, key)?;
        self.objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
                backtrace: snafu::Backtrace::capture(),
            })
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.sim.check(FailureOp::Read, key)?;
        Ok(self.objects.lock().contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.sim.check(FailureOp::Delete, key)?;
        self.objects.lock().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.sim.check(FailureOp::Read, prefix)?;
        let objects = self.objects.lock();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn atomic_replace(
        &self,
        key: &str,
        expected_hash: Option<u64>,
        bytes: Bytes,
    ) -> StorageResult<ReplaceOutcome> {
        self.sim.check(FailureOp::Write, key)?;
        let mut objects = self.objects.lock();
        let current = objects.get(key).map(|b| payload_hash(b));
        if current != expected_hash {
            return Ok(ReplaceOutcome::LostRace);
        }
        objects.insert(key.to_string(), bytes);
        Ok(ReplaceOutcome::Replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_if_absent_is_once_only() {
        let backend = MemoryBackend::new();
        backend
            .put("tdata/a", Bytes::from_static(b"one"), true)
            .await
            .expect("first put");
        let err = backend
            .put("tdata/a", Bytes::from_static(b"two"), true)
            .await
            .expect_err("second put");
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(
            backend.get("tdata/a").await.expect("get"),
            Bytes::from_static(b"one")
        );
    }

    #[tokio::test]
    async fn list_is_prefix_scoped() {
        let backend = MemoryBackend::new();
        for key in ["vref/a", "vref/b", "ver/a/1"] {
            backend
                .put(key, Bytes::from_static(b"x"), true)
                .await
                .expect("put");
        }
        let refs = backend.list("vref/").await.expect("list");
        assert_eq!(refs, vec!["vref/a".to_string(), "vref/b".to_string()]);
    }

    #[tokio::test]
    async fn atomic_replace_detects_stale_hash() {
        let backend = MemoryBackend::new();
        let first = Bytes::from_static(b"v1");
        assert_eq!(
            backend
                .atomic_replace("vref/s", None, first.clone())
                .await
                .expect("create"),
            ReplaceOutcome::Replaced
        );

        // Stale expectation loses.
        assert_eq!(
            backend
                .atomic_replace("vref/s", None, Bytes::from_static(b"v2"))
                .await
                .expect("cas"),
            ReplaceOutcome::LostRace
        );

        // Correct expectation wins.
        assert_eq!(
            backend
                .atomic_replace(
                    "vref/s",
                    Some(payload_hash(&first)),
                    Bytes::from_static(b"v2")
                )
                .await
                .expect("cas"),
            ReplaceOutcome::Replaced
        );
    }

    #[tokio::test]
    async fn failure_hooks_trip_then_clear() {
        let backend = MemoryBackend::new();
        backend
            .put("k", Bytes::from_static(b"v"), true)
            .await
            .expect("put");
        backend.failures().fail_reads(1);
        let err = backend.get("k").await.expect_err("simulated");
        assert!(matches!(err, StorageError::Simulated { op: FailureOp::Read, .. }));
        assert!(backend.get("k").await.is_ok());
    }
}
