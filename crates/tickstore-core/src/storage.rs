//! Uniform key→bytes storage adapter over pluggable backends.
//!
//! The engine talks to storage exclusively through [`Backend`]:
//!
//! - `put` of an atom key is once-only; writers pass `if_absent` and treat
//!   an observed existing object as fatal rather than overwriting.
//! - `get` returns exactly the bytes last successfully put; no partial
//!   reads.
//! - `list` may be eventually consistent; the version index tolerates
//!   stale listings because commits are anchored by ref keys, not listings.
//! - `atomic_replace` on ref keys is linearizable with respect to other
//!   `atomic_replace` calls on the same key.
//!
//! In-tree backends: [`LocalBackend`] (filesystem, write-then-rename),
//! [`MemoryBackend`] (embedded single-process store, also the test double
//! with failure hooks), and [`ObjectStoreBackend`] (S3/Azure/GCS through
//! the `object_store` crate). Document-store backends implement the same
//! trait out of tree.

pub mod error;
pub mod local;
pub mod memory;
pub mod object;
pub mod pool;
pub mod retry;

pub use error::{FailureOp, StorageError, StorageResult};
pub use local::LocalBackend;
pub use memory::{FailureSim, MemoryBackend};
pub use object::ObjectStoreBackend;
pub use retry::{with_backoff, RetryConfig};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

/// Outcome of [`Backend::atomic_replace`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The ref key now holds the new payload.
    Replaced,
    /// Another writer advanced the ref first; payload untouched.
    LostRace,
}

/// Key→bytes CRUD plus ref-key compare-and-swap.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    /// Store `bytes` under `key`. With `if_absent`, fail with
    /// [`StorageError::AlreadyExists`] instead of overwriting.
    async fn put(&self, key: &str, bytes: Bytes, if_absent: bool) -> StorageResult<()>;

    /// Fetch the bytes stored under `key`.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// True when an object exists under `key`.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Remove the object under `key`. Removing a missing key is not an
    /// error (delete is idempotent for garbage collection).
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// All keys starting with `prefix`, in unspecified order.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Compare-and-swap a ref key.
    ///
    /// `expected_hash` is the xxh3-64 of the payload the caller last
    /// observed, or `None` when the caller expects the key to be absent.
    /// On mismatch the payload is untouched and `LostRace` is returned.
    async fn atomic_replace(
        &self,
        key: &str,
        expected_hash: Option<u64>,
        bytes: Bytes,
    ) -> StorageResult<ReplaceOutcome>;
}

/// Shared handle to a backend.
pub type BackendRef = Arc<dyn Backend>;

/// Hash used for ref-key CAS guards.
pub fn payload_hash(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}
