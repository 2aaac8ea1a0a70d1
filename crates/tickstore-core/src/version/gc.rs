//! Mark-and-sweep reclamation of unreachable atoms.
//!
//! Roots are every `VersionRef` and every snapshot. The mark phase walks
//! each rooted chain, marking version nodes, index segments, and every
//! data key an index references; tombstoned keys stay reachable through
//! the older versions that still index them, which is what keeps history
//! readable. The sweep deletes unmarked data/index/version atoms older
//! than a grace interval; the grace window is what makes the pass safe
//! under concurrent writers, whose freshly written atoms are unreferenced
//! until their commit lands.
//!
//! The pass is idempotent: marked sets are rebuilt from storage each run
//! and deleting an already-deleted key is a no-op.

use std::collections::HashSet;
use std::time::Duration;

use crate::index::IndexSegment;
use crate::keys::{now_nanos, AtomKey, RefKey};
use crate::storage::with_backoff;
use crate::version::node::SnapshotRecord;
use crate::version::store::VersionStore;
use crate::version::{StorageSnafu, VersionError};
use snafu::prelude::*;

/// Key-type prefixes subject to sweeping.
const SWEPT_PREFIXES: [&str; 4] = ["tdata/", "tindex/", "ver/", "tomb/"];

/// What a garbage-collection pass did.
#[derive(Debug, Default)]
pub struct GcReport {
    /// Candidate keys inspected by the sweep.
    pub scanned: usize,
    /// Keys protected by the mark phase.
    pub reachable: usize,
    /// Keys actually deleted.
    pub deleted: Vec<String>,
    /// Keys left alone because they are younger than the grace interval.
    pub in_grace: usize,
}

/// Run one mark-and-sweep pass.
pub async fn collect_garbage(
    store: &VersionStore,
    grace: Duration,
) -> Result<GcReport, VersionError> {
    let backend = store.backend().clone();
    let mut marked: HashSet<String> = HashSet::new();

    // Roots: version refs.
    let ref_keys = with_backoff(store.retry(), "gc_list_refs", || backend.list("vref/"))
        .await
        .context(StorageSnafu)?;
    for ref_name in ref_keys {
        if RefKey::parse(&ref_name).is_err() {
            log::warn!("skipping unparseable ref key {ref_name:?} during gc");
            continue;
        }
        let payload = match with_backoff(store.retry(), "gc_read_ref", || {
            backend.get(&ref_name)
        })
        .await
        {
            Ok(bytes) => bytes,
            // Deleted between list and get; listings are allowed to be stale.
            Err(crate::storage::StorageError::NotFound { .. }) => continue,
            Err(e) => return Err(e).context(StorageSnafu),
        };
        if let Ok(text) = std::str::from_utf8(&payload) {
            if let Ok(head) = AtomKey::parse(text) {
                mark_chain(store, &head, &mut marked).await?;
            }
        }
    }

    // Roots: retained snapshots.
    let snap_keys = with_backoff(store.retry(), "gc_list_snaps", || backend.list("snap/"))
        .await
        .context(StorageSnafu)?;
    for snap_name in snap_keys {
        let payload = match with_backoff(store.retry(), "gc_read_snap", || {
            backend.get(&snap_name)
        })
        .await
        {
            Ok(bytes) => bytes,
            Err(crate::storage::StorageError::NotFound { .. }) => continue,
            Err(e) => return Err(e).context(StorageSnafu),
        };
        let Ok(record) = serde_json::from_slice::<SnapshotRecord>(&payload) else {
            log::warn!("skipping unparseable snapshot {snap_name:?} during gc");
            continue;
        };
        for version_key in &record.versions {
            mark_chain(store, version_key, &mut marked).await?;
        }
    }

    // Sweep.
    let cutoff = now_nanos().saturating_sub(grace.as_nanos().min(i64::MAX as u128) as i64);
    let mut report = GcReport {
        reachable: marked.len(),
        ..GcReport::default()
    };
    for prefix in SWEPT_PREFIXES {
        let candidates = with_backoff(store.retry(), "gc_list_sweep", || backend.list(prefix))
            .await
            .context(StorageSnafu)?;
        for name in candidates {
            report.scanned += 1;
            if marked.contains(&name) {
                continue;
            }
            let Ok(key) = AtomKey::parse(&name) else {
                log::warn!("skipping unparseable atom key {name:?} during gc");
                continue;
            };
            if key.creation_ts > cutoff {
                report.in_grace += 1;
                continue;
            }
            with_backoff(store.retry(), "gc_delete", || backend.delete(&name))
                .await
                .context(StorageSnafu)?;
            report.deleted.push(name);
        }
    }

    log::debug!(
        "gc pass: {} scanned, {} reachable, {} deleted, {} in grace",
        report.scanned,
        report.reachable,
        report.deleted.len(),
        report.in_grace
    );
    Ok(report)
}

/// Mark a chain and everything its index segments reference.
async fn mark_chain(
    store: &VersionStore,
    head: &AtomKey,
    marked: &mut HashSet<String>,
) -> Result<(), VersionError> {
    let mut next = Some(head.clone());
    while let Some(key) = next {
        let name = key.object_name();
        if !marked.insert(name) {
            // Chains converge once they share a predecessor.
            return Ok(());
        }
        let node = match store.get_atom(&key).await {
            Ok(bytes) => match crate::version::node::VersionNode::from_bytes(&bytes) {
                Ok(node) => node,
                Err(e) => {
                    log::warn!("unparseable version node {key} during gc: {e}");
                    return Ok(());
                }
            },
            // A root pointing at a missing node: nothing more to mark.
            Err(VersionError::Storage { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };
        if let Some(index_key) = &node.index_root {
            marked.insert(index_key.object_name());
            if let Ok(bytes) = store.get_atom(index_key).await {
                if let Ok(index) = IndexSegment::from_bytes(&bytes) {
                    for entry in &index.entries {
                        marked.insert(entry.key.object_name());
                    }
                }
            }
        }
        // Tombstoned keys are not marked here; they stay live only while
        // an older version's index still maps them.
        next = node.previous;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyType, StreamId};
    use crate::storage::{Backend, MemoryBackend, RetryConfig};
    use crate::version::node::atom_key_for;
    use crate::version::store::CommitRequest;
    use bytes::Bytes;
    use std::sync::Arc;

    fn store() -> (Arc<MemoryBackend>, VersionStore) {
        let backend = Arc::new(MemoryBackend::new());
        let store = VersionStore::new(backend.clone(), RetryConfig::default(), 3);
        (backend, store)
    }

    fn symbol() -> StreamId {
        StreamId::Name("gc".to_string())
    }

    /// Write a data atom + index atom and commit them as one version.
    async fn commit_version(store: &VersionStore, v: u64) -> (AtomKey, AtomKey) {
        let data_payload = Bytes::from(format!("data-{v}"));
        let data_key = atom_key_for(
            symbol(),
            KeyType::TableData,
            v,
            &data_payload,
            Some((
                crate::keys::IndexValue::Ts(0),
                crate::keys::IndexValue::Ts(9),
            )),
        );
        store.put_atom(&data_key, data_payload).await.expect("data");

        let index = IndexSegment {
            schema: crate::frame::Schema::new(
                crate::frame::FieldDef::new("ts", crate::frame::DType::Timestamp),
                vec![],
            )
            .expect("schema"),
            total_rows: 10,
            entries: vec![crate::index::RangesAndKey {
                row_range: crate::index::RowRange { start: 0, end: 10 },
                col_range: crate::index::ColRange { start: 0, end: 0 },
                start_index: crate::keys::IndexValue::Ts(0),
                end_index: crate::keys::IndexValue::Ts(9),
                key: data_key.clone(),
            }],
        };
        let index_payload = index.to_bytes().expect("index bytes");
        let index_key = atom_key_for(symbol(), KeyType::TableIndex, v, &index_payload, None);
        store
            .put_atom(&index_key, index_payload)
            .await
            .expect("index");

        store
            .commit(CommitRequest {
                symbol: symbol(),
                base_version: v - 1,
                index_root: Some(index_key.clone()),
                tombstones: Vec::new(),
            })
            .await
            .expect("commit");
        (data_key, index_key)
    }

    #[tokio::test]
    async fn reachable_keys_survive_zero_grace() {
        let (backend, store) = store();
        commit_version(&store, 1).await;
        commit_version(&store, 2).await;

        let before = backend.len();
        let report = collect_garbage(&store, Duration::ZERO)
            .await
            .expect("gc");
        assert!(report.deleted.is_empty(), "deleted {:?}", report.deleted);
        assert_eq!(backend.len(), before);
    }

    #[tokio::test]
    async fn orphans_collected_after_grace_but_not_within() {
        let (backend, store) = store();
        commit_version(&store, 1).await;

        // An orphan: content-addressed data nothing references.
        let orphan_payload = Bytes::from_static(b"orphan");
        let mut orphan = atom_key_for(symbol(), KeyType::TableData, 9, &orphan_payload, None);
        orphan.creation_ts = 1_000; // ancient
        store.put_atom(&orphan, orphan_payload).await.expect("put");

        // Young orphans stay inside the grace window.
        let young_payload = Bytes::from_static(b"young");
        let young = atom_key_for(symbol(), KeyType::TableData, 9, &young_payload, None);
        store.put_atom(&young, young_payload).await.expect("put");

        let report = collect_garbage(&store, Duration::from_secs(3600))
            .await
            .expect("gc");
        assert_eq!(report.deleted, vec![orphan.object_name()]);
        assert_eq!(report.in_grace, 1);
        assert!(!backend
            .list("tdata/")
            .await
            .expect("list")
            .contains(&orphan.object_name()));

        // A second pass is a no-op.
        let again = collect_garbage(&store, Duration::from_secs(3600))
            .await
            .expect("gc again");
        assert!(again.deleted.is_empty());
    }

    #[tokio::test]
    async fn snapshot_roots_protect_old_versions() {
        let (backend, store) = store();
        commit_version(&store, 1).await;
        let (head, head_key, _) = store
            .load_head(&symbol())
            .await
            .expect("head")
            .expect("exists");
        assert_eq!(head.version_id, 1);

        // Pin version 1 in a snapshot, then advance the chain so the data
        // of version 1 would otherwise be just historical.
        let record = SnapshotRecord {
            name: "pin".to_string(),
            versions: vec![head_key],
            created_at: chrono::Utc::now(),
        };
        backend
            .put(
                "snap/pin",
                Bytes::from(serde_json::to_vec(&record).expect("snap json")),
                true,
            )
            .await
            .expect("snap put");
        commit_version(&store, 2).await;

        let report = collect_garbage(&store, Duration::ZERO).await.expect("gc");
        assert!(report.deleted.is_empty());
        assert!(report.reachable >= 4);
    }
}
