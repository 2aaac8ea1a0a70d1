//! Commit protocol and chain walks.
//!
//! The write protocol follows the single-writer-per-symbol discipline:
//!
//! 1. Load the head `H` through the symbol's `VersionRef`.
//! 2. Compose a node `V` whose predecessor is `H`.
//! 3. Write `V` as a once-only atom (data and index atoms were already
//!    written by the caller).
//! 4. `atomic_replace(VersionRef, hash(H), V)`.
//!
//! One commit call is one round: it fails with `WriteConflict` both when
//! the head moved past the caller's base version and when the CAS loses
//! a race that slipped between load and swap. Retrying is the *caller's*
//! job because a sound retry must rebuild against the new head; reread
//! the index, revalidate that nothing it reuses was tombstoned; never
//! blindly swap again. Orphaned nodes from losing rounds stay
//! content-addressed until garbage collection.

use bytes::Bytes;
use chrono::Utc;
use snafu::prelude::*;

use crate::keys::{AtomKey, KeyType, RefKey, StreamId};
use crate::storage::{
    payload_hash, with_backoff, BackendRef, ReplaceOutcome, RetryConfig, StorageError,
};
use crate::version::node::{atom_key_for, VersionNode};
use crate::version::{
    CorruptChainSnafu, CorruptKeySnafu, StorageSnafu, SymbolNotFoundSnafu, VersionError,
    VersionNotFoundSnafu, WriteConflictSnafu,
};

/// A prepared commit: everything but the chain linkage.
#[derive(Clone, Debug)]
pub struct CommitRequest {
    /// Symbol being advanced.
    pub symbol: StreamId,
    /// Version id of the head this commit was built against; `0` when
    /// the caller observed no versions.
    pub base_version: u64,
    /// Index segment describing the new version's data keys; `None`
    /// records a symbol deletion.
    pub index_root: Option<AtomKey>,
    /// Keys superseded by this commit.
    pub tombstones: Vec<AtomKey>,
}

/// Reads and writes version chains for all symbols of one store.
#[derive(Clone, Debug)]
pub struct VersionStore {
    backend: BackendRef,
    retry: RetryConfig,
    cas_retries: u32,
}

impl VersionStore {
    /// Wrap a backend with the given retry budgets.
    pub fn new(backend: BackendRef, retry: RetryConfig, cas_retries: u32) -> Self {
        Self {
            backend,
            retry,
            cas_retries,
        }
    }

    /// The ref key anchoring `symbol`'s chain.
    pub fn version_ref(symbol: &StreamId) -> RefKey {
        RefKey::new(symbol.clone(), KeyType::VersionRef)
    }

    /// Write a once-only atom with transient-failure retries.
    pub async fn put_atom(&self, key: &AtomKey, bytes: Bytes) -> Result<(), VersionError> {
        let name = key.object_name();
        with_backoff(&self.retry, "put_atom", || {
            self.backend.put(&name, bytes.clone(), true)
        })
        .await
        .context(StorageSnafu)
    }

    /// Fetch and verify an atom against its key's content hash.
    pub async fn get_atom(&self, key: &AtomKey) -> Result<Bytes, VersionError> {
        let name = key.object_name();
        let bytes = with_backoff(&self.retry, "get_atom", || self.backend.get(&name))
            .await
            .context(StorageSnafu)?;
        ensure!(
            payload_hash(&bytes) == key.content_hash,
            CorruptChainSnafu {
                symbol: key.stream_id.to_string(),
                detail: format!("content hash mismatch for {name}"),
            }
        );
        Ok(bytes)
    }

    async fn load_node(&self, key: &AtomKey) -> Result<VersionNode, VersionError> {
        let bytes = self.get_atom(key).await?;
        VersionNode::from_bytes(&bytes).map_err(|e| VersionError::CorruptChain {
            symbol: key.stream_id.to_string(),
            detail: format!("version node parse: {e}"),
            backtrace: snafu::Backtrace::capture(),
        })
    }

    /// Load the chain head, or `None` for a symbol with no versions.
    ///
    /// Returns the node, its atom key, and the hash of the ref payload for
    /// use as the CAS guard.
    pub async fn load_head(
        &self,
        symbol: &StreamId,
    ) -> Result<Option<(VersionNode, AtomKey, u64)>, VersionError> {
        let ref_name = Self::version_ref(symbol).object_name();
        let ref_bytes = match with_backoff(&self.retry, "load_head", || {
            self.backend.get(&ref_name)
        })
        .await
        {
            Ok(bytes) => bytes,
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e).context(StorageSnafu),
        };
        let guard_hash = payload_hash(&ref_bytes);
        let text = std::str::from_utf8(&ref_bytes).map_err(|e| VersionError::CorruptChain {
            symbol: symbol.to_string(),
            detail: format!("ref payload not utf-8: {e}"),
            backtrace: snafu::Backtrace::capture(),
        })?;
        let head_key = AtomKey::parse(text).context(CorruptKeySnafu)?;
        let node = self.load_node(&head_key).await?;
        Ok(Some((node, head_key, guard_hash)))
    }

    /// One commit round under the CAS discipline.
    ///
    /// Fails with `WriteConflict` when the head no longer matches
    /// `base_version` or when the ref swap loses a race; callers rebuild
    /// against the fresh head and call again.
    pub async fn commit(&self, req: CommitRequest) -> Result<VersionNode, VersionError> {
        let ref_name = Self::version_ref(&req.symbol).object_name();

        let head = self.load_head(&req.symbol).await?;
        let (previous, head_version, guard) = match &head {
            Some((node, key, guard)) => (Some(key.clone()), node.version_id, Some(*guard)),
            None => (None, 0, None),
        };
        ensure!(
            head_version == req.base_version,
            WriteConflictSnafu {
                symbol: req.symbol.to_string(),
                attempts: 1u32,
            }
        );

        let next_id = req.base_version + 1;
        let node = VersionNode {
            version_id: next_id,
            previous,
            index_root: req.index_root.clone(),
            tombstones: req.tombstones.clone(),
            timestamp: Utc::now(),
        };
        let payload = node.to_bytes().map_err(|e| VersionError::CorruptChain {
            symbol: req.symbol.to_string(),
            detail: format!("version node serialize: {e}"),
            backtrace: snafu::Backtrace::capture(),
        })?;
        let node_key = atom_key_for(
            req.symbol.clone(),
            KeyType::Version,
            next_id,
            &payload,
            None,
        );
        self.put_atom(&node_key, payload).await?;

        let ref_payload = Bytes::from(node_key.object_name());
        let outcome = with_backoff(&self.retry, "advance_ref", || {
            self.backend
                .atomic_replace(&ref_name, guard, ref_payload.clone())
        })
        .await
        .context(StorageSnafu)?;

        match outcome {
            ReplaceOutcome::Replaced => Ok(node),
            ReplaceOutcome::LostRace => {
                log::debug!("lost version race on {}", req.symbol);
                WriteConflictSnafu {
                    symbol: req.symbol.to_string(),
                    attempts: 1u32,
                }
                .fail()
            }
        }
    }

    /// CAS rounds a writer may spend before surfacing `WriteConflict`.
    pub fn cas_retries(&self) -> u32 {
        self.cas_retries
    }

    /// Resolve a version: the head when `as_of` is `None`, otherwise the
    /// chain node with that version id.
    pub async fn resolve(
        &self,
        symbol: &StreamId,
        as_of: Option<u64>,
    ) -> Result<(VersionNode, AtomKey), VersionError> {
        let (head, head_key, _) =
            self.load_head(symbol)
                .await?
                .context(SymbolNotFoundSnafu {
                    symbol: symbol.to_string(),
                })?;

        let target = match as_of {
            None => {
                // A deleted symbol has a head with no index root.
                ensure!(
                    head.index_root.is_some(),
                    SymbolNotFoundSnafu {
                        symbol: symbol.to_string(),
                    }
                );
                return Ok((head, head_key));
            }
            Some(v) => v,
        };

        let mut node = head;
        let mut key = head_key;
        loop {
            ensure!(
                node.version_id >= target,
                VersionNotFoundSnafu {
                    symbol: symbol.to_string(),
                    version: target,
                }
            );
            if node.version_id == target {
                return Ok((node, key));
            }
            let prev_key = node.previous.clone().context(VersionNotFoundSnafu {
                symbol: symbol.to_string(),
                version: target,
            })?;
            let prev = self.load_node(&prev_key).await?;
            // Strictly decreasing ids double as the cycle guard.
            ensure!(
                prev.version_id < node.version_id,
                CorruptChainSnafu {
                    symbol: symbol.to_string(),
                    detail: format!(
                        "version {} links to non-decreasing predecessor {}",
                        node.version_id, prev.version_id
                    ),
                }
            );
            node = prev;
            key = prev_key;
        }
    }

    /// All versions of a symbol, newest first.
    pub async fn list_versions(
        &self,
        symbol: &StreamId,
    ) -> Result<Vec<VersionNode>, VersionError> {
        let Some((head, _, _)) = self.load_head(symbol).await? else {
            return Ok(Vec::new());
        };
        let mut out = vec![head];
        while let Some(prev_key) = out
            .last()
            .and_then(|n| n.previous.clone())
        {
            let prev = self.load_node(&prev_key).await?;
            let last_id = out.last().map(|n| n.version_id).unwrap_or(u64::MAX);
            ensure!(
                prev.version_id < last_id,
                CorruptChainSnafu {
                    symbol: symbol.to_string(),
                    detail: "non-decreasing version id on chain walk".to_string(),
                }
            );
            out.push(prev);
        }
        Ok(out)
    }

    /// The underlying backend handle.
    pub fn backend(&self) -> &BackendRef {
        &self.backend
    }

    /// The retry schedule used for storage calls.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}
