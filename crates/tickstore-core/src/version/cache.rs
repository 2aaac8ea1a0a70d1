//! Read-path cache of chain heads.
//!
//! Purely an optimization: commits always consult storage directly, and
//! the CAS guard catches anything the cache missed. The refresh discipline
//! is the double-checked reader/writer upgrade:
//!
//! 1. Under the read lock, test `is_stale || is_empty`; if both are false,
//!    return the cached head.
//! 2. Otherwise upgrade to the write lock and re-test. The refresh itself
//!    runs only when the entry needs one *and* a refresh is due
//!    (`(is_stale || is_empty) && refresh_due`); the due check is an AND,
//!    never an OR, so a rate-limited entry is served as-is rather than
//!    hammering storage.
//!
//! No lock is held across the storage fetch; the entry is re-installed
//! under a fresh write lock afterwards.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::keys::{AtomKey, StreamId};
use crate::version::node::VersionNode;
use crate::version::store::VersionStore;
use crate::version::VersionError;

#[derive(Clone, Debug)]
struct Entry {
    head: Option<(VersionNode, AtomKey)>,
    fetched_at: Instant,
    last_attempt: Instant,
    invalidated: bool,
}

impl Entry {
    fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.invalidated || self.fetched_at.elapsed() >= ttl
    }

    fn refresh_due(&self, min_interval: Duration) -> bool {
        self.last_attempt.elapsed() >= min_interval
    }
}

/// Cache of the latest version node per symbol.
#[derive(Debug)]
pub struct HeadCache {
    ttl: Duration,
    min_refresh_interval: Duration,
    entries: RwLock<HashMap<StreamId, Entry>>,
}

impl Default for HeadCache {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::ZERO)
    }
}

impl HeadCache {
    /// A cache whose entries live `ttl` and refresh at most once per
    /// `min_refresh_interval`.
    pub fn new(ttl: Duration, min_refresh_interval: Duration) -> Self {
        Self {
            ttl,
            min_refresh_interval,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the head of `symbol`, consulting storage only when the
    /// cached entry needs and is due a refresh.
    pub async fn head(
        &self,
        store: &VersionStore,
        symbol: &StreamId,
    ) -> Result<Option<(VersionNode, AtomKey)>, VersionError> {
        // Fast path under the read lock.
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(symbol) {
                if !(entry.is_stale(self.ttl) || entry.is_empty()) {
                    return Ok(entry.head.clone());
                }
            }
        }

        // Upgrade and re-test; another task may have refreshed meanwhile.
        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(symbol) {
                let needs = entry.is_stale(self.ttl) || entry.is_empty();
                if !needs {
                    return Ok(entry.head.clone());
                }
                if !(needs && entry.refresh_due(self.min_refresh_interval)) {
                    // Needed but not due: serve what we have.
                    return Ok(entry.head.clone());
                }
                entry.last_attempt = Instant::now();
            }
        }

        // Fetch with no lock held.
        let head = store.load_head(symbol).await?;
        let resolved = head.map(|(node, key, _)| (node, key));

        let mut entries = self.entries.write().await;
        entries.insert(
            symbol.clone(),
            Entry {
                head: resolved.clone(),
                fetched_at: Instant::now(),
                last_attempt: Instant::now(),
                invalidated: false,
            },
        );
        Ok(resolved)
    }

    /// Mark a symbol's entry stale; the next read refreshes (subject to
    /// the due-rate limit).
    pub async fn invalidate(&self, symbol: &StreamId) {
        if let Some(entry) = self.entries.write().await.get_mut(symbol) {
            entry.invalidated = true;
        }
    }
}
