//! The user-facing store: symbols in, frames out.
//!
//! [`TickStore`] ties the layers together. Writes slice frames into
//! tiles, persist them as once-only atoms, and advance the symbol's
//! version chain under the CAS discipline; reads resolve a version
//! snapshot up front, compile the request into a clause pipeline, and
//! assemble the surviving processing units back into a frame. Queries
//! are isolated: a read never observes a commit that lands after its
//! version resolved.
//!
//! Each successful mutation also drops a small audit record under a
//! `Log` key and maintains the symbol-list delta keys that back
//! [`TickStore::list_symbols`].

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::arena::ComponentManager;
use crate::clause::row_range::RowRangeKind;
use crate::clause::{Clause, ClauseKind, ColumnStatsClause, ProcessingConfig};
use crate::config::RuntimeConfig;
use crate::error::{StoreError, StoreResult};
use crate::exec::{CancelToken, PipelineExecutor};
use crate::frame::{Column, Frame, Scalar, Schema};
use crate::index::{IndexSegment, RangesAndKey, RowRange};
use crate::keys::{AtomKey, IndexValue, KeyType, RefKey, StreamId};
use crate::query::{plan, ReadRequest};
use crate::segment::{self, FieldStats};
use crate::storage::{with_backoff, BackendRef, ReplaceOutcome, StorageError};
use crate::version::node::{atom_key_for, AuditRecord, SnapshotRecord, VersionNode};
use crate::version::{collect_garbage, CommitRequest, GcReport, HeadCache, VersionStore};
use crate::write::FrameWriter;

/// Symbol-list delta payload under a `SymbolList` key.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct SymbolDelta {
    symbol: StreamId,
    added: bool,
}

/// A versioned, columnar time-series store over one backend.
#[derive(Clone, Debug)]
pub struct TickStore {
    backend: BackendRef,
    versions: VersionStore,
    writer: FrameWriter,
    cache: Arc<HeadCache>,
    config: RuntimeConfig,
}

impl TickStore {
    /// Open a store over `backend`.
    pub fn new(backend: BackendRef, config: RuntimeConfig) -> TickStore {
        let versions = VersionStore::new(backend.clone(), config.retry, config.cas_retries);
        let writer = FrameWriter::new(versions.clone(), config.clone());
        TickStore {
            backend,
            versions,
            writer,
            cache: Arc::new(HeadCache::default()),
            config,
        }
    }

    /// Open over the backend and knobs selected by the environment.
    pub fn from_env() -> TickStore {
        TickStore::new(RuntimeConfig::backend_from_env(), RuntimeConfig::from_env())
    }

    /// Validate a symbol name.
    pub fn symbol(name: &str) -> StoreResult<StreamId> {
        Ok(StreamId::name(name)?)
    }

    /// The configured runtime knobs.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Write surface
    // ------------------------------------------------------------------

    /// Write `frame` as a new version of `symbol`, replacing prior
    /// content. Prior versions stay readable as-of until collected.
    ///
    /// On a lost commit race the tombstone set rebuilds against the fresh
    /// head before the next round; the already-persisted tiles are
    /// head-independent and are reused.
    pub async fn write(&self, symbol: &StreamId, frame: &Frame) -> StoreResult<VersionNode> {
        FrameWriter::check_index(frame)?;
        let mut head = self.versions.load_head(symbol).await?;
        let next = head.as_ref().map(|(n, _, _)| n.version_id + 1).unwrap_or(1);

        let tiles = self
            .writer
            .write_tiles(symbol, next, frame, 0, KeyType::TableData)
            .await?;
        let index = IndexSegment {
            schema: frame.schema().clone(),
            total_rows: tiles.rows,
            entries: tiles.entries,
        };
        let index_key = self.writer.write_index(symbol, next, &index).await?;

        let mut attempts = 0u32;
        let (node, was_live) = loop {
            let base = head.as_ref().map(|(n, _, _)| n.version_id).unwrap_or(0);
            let was_live = head
                .as_ref()
                .map(|(n, _, _)| n.index_root.is_some())
                .unwrap_or(false);
            let tombstones = match &head {
                Some((node, _, _)) => self.superseded_keys(node).await?,
                None => Vec::new(),
            };
            match self
                .versions
                .commit(CommitRequest {
                    symbol: symbol.clone(),
                    base_version: base,
                    index_root: Some(index_key.clone()),
                    tombstones,
                })
                .await
            {
                Ok(node) => break (node, was_live),
                Err(e @ crate::version::VersionError::WriteConflict { .. }) => {
                    attempts += 1;
                    if attempts >= self.versions.cas_retries() {
                        return Err(e.into());
                    }
                    head = self.versions.load_head(symbol).await?;
                }
                Err(e) => return Err(e.into()),
            }
        };

        if !was_live {
            self.write_symbol_delta(symbol, true, node.version_id).await?;
        }
        self.write_audit(symbol, "write", node.version_id, Some(index.total_rows))
            .await?;
        self.cache.invalidate(symbol).await;
        Ok(node)
    }

    /// Append `frame` after the symbol's existing rows.
    ///
    /// The frame's first index value must not precede the symbol's last,
    /// keeping data keys sorted and non-overlapping; equal boundary
    /// timestamps are accepted.
    pub async fn append(&self, symbol: &StreamId, frame: &Frame) -> StoreResult<VersionNode> {
        FrameWriter::check_index(frame)?;
        let (head, index) = self.resolve_index_fresh(symbol).await?;
        FrameWriter::check_schema(&index.schema, frame)?;
        Self::check_append_order(&index, frame)?;

        // Tiles persist once; every commit round rebuilds the index
        // against whatever head it found, rebasing our tiles' row
        // offsets behind any rows a concurrent winner appended.
        let tiles = self
            .writer
            .write_tiles(
                symbol,
                head.version_id + 1,
                frame,
                index.total_rows,
                KeyType::TableData,
            )
            .await?;

        let mut head = head;
        let mut index = index;
        let mut attempts = 0u32;
        let node = loop {
            Self::check_append_order(&index, frame)?;
            let mut entries = index.entries.clone();
            let offset_delta = index.total_rows as i64
                - tiles
                    .entries
                    .first()
                    .map(|e| e.row_range.start as i64)
                    .unwrap_or(0);
            entries.extend(tiles.entries.iter().cloned().map(|mut e| {
                e.row_range = RowRange {
                    start: (e.row_range.start as i64 + offset_delta) as u64,
                    end: (e.row_range.end as i64 + offset_delta) as u64,
                };
                e
            }));
            let new_index = IndexSegment {
                schema: index.schema.clone(),
                total_rows: index.total_rows + tiles.rows,
                entries,
            };
            let index_key = self
                .writer
                .write_index(symbol, head.version_id + 1, &new_index)
                .await?;

            match self
                .versions
                .commit(CommitRequest {
                    symbol: symbol.clone(),
                    base_version: head.version_id,
                    index_root: Some(index_key),
                    tombstones: head.index_root.clone().into_iter().collect(),
                })
                .await
            {
                Ok(node) => break node,
                Err(e @ crate::version::VersionError::WriteConflict { .. }) => {
                    attempts += 1;
                    if attempts >= self.versions.cas_retries() {
                        return Err(e.into());
                    }
                    let fresh = self.resolve_index_fresh(symbol).await?;
                    head = fresh.0;
                    index = fresh.1;
                }
                Err(e) => return Err(e.into()),
            }
        };
        self.write_audit(symbol, "append", node.version_id, Some(tiles.rows))
            .await?;
        self.cache.invalidate(symbol).await;
        Ok(node)
    }

    /// Appends must not start before the symbol's last index value.
    fn check_append_order(index: &IndexSegment, frame: &Frame) -> StoreResult<()> {
        if let (Some((_, last_hi)), Some((first, _))) =
            (index.index_bounds(), frame.index_bounds())
        {
            let new_first = scalar_to_index(&first)?;
            ensure!(
                !matches!(
                    new_first.partial_cmp(&last_hi),
                    Some(std::cmp::Ordering::Less)
                ),
                crate::error::UserInputSnafu {
                    msg: format!(
                        "append starts at {new_first:?}, before the symbol's last index {last_hi:?}"
                    ),
                }
            );
        }
        Ok(())
    }

    /// Splice `frame` into the symbol over the frame's index interval:
    /// rows inside the interval are replaced, tiles entirely outside are
    /// carried forward untouched, and partially covered tiles are
    /// rewritten without their covered rows.
    pub async fn update(&self, symbol: &StreamId, frame: &Frame) -> StoreResult<VersionNode> {
        FrameWriter::check_index(frame)?;
        ensure!(
            frame.num_rows() > 0,
            crate::error::UserInputSnafu {
                msg: "update with an empty frame".to_string(),
            }
        );
        // A lost race invalidates the whole splice; rebuild it from the
        // fresh head. Tiles written by losing rounds become GC fodder.
        let mut attempts = 0u32;
        loop {
            match self.try_update(symbol, frame).await {
                Err(StoreError::Version {
                    source: source @ crate::version::VersionError::WriteConflict { .. },
                }) => {
                    attempts += 1;
                    if attempts >= self.versions.cas_retries() {
                        return Err(source.into());
                    }
                }
                other => return other,
            }
        }
    }

    async fn try_update(&self, symbol: &StreamId, frame: &Frame) -> StoreResult<VersionNode> {
        let (head, index) = self.resolve_index_fresh(symbol).await?;
        FrameWriter::check_schema(&index.schema, frame)?;
        let (lo, hi) = match frame.index_bounds() {
            Some((lo, hi)) => (scalar_ts(&lo)?, scalar_ts(&hi)?),
            None => unreachable!("non-empty frame has bounds"),
        };

        // Partition existing row slices into untouched and overlapped.
        let mut untouched: Vec<Vec<RangesAndKey>> = Vec::new();
        let mut pieces: Vec<Frame> = Vec::new();
        let mut tombstones: Vec<AtomKey> = head.index_root.clone().into_iter().collect();
        for group in group_entries_by_row_slice(&index.entries) {
            let group_lo = group
                .iter()
                .filter_map(|e| index_ts(&e.start_index))
                .min()
                .unwrap_or(i64::MAX);
            let group_hi = group
                .iter()
                .filter_map(|e| index_ts(&e.end_index))
                .max()
                .unwrap_or(i64::MIN);
            if group_hi < lo || group_lo > hi {
                untouched.push(group);
                continue;
            }
            let tile_frame = self.load_group_frame(&index.schema, &group).await?;
            let (before, after) = split_frame_outside(&tile_frame, lo, hi);
            if before.num_rows() > 0 {
                pieces.push(before);
            }
            if after.num_rows() > 0 {
                pieces.push(after);
            }
            tombstones.extend(group.into_iter().map(|e| e.key));
        }

        // New logical order: everything sorted by start index.
        let next = head.version_id + 1;
        enum Part {
            Kept(Vec<RangesAndKey>),
            Fresh(Frame),
        }
        let mut parts: Vec<(i64, Part)> = Vec::new();
        for group in untouched {
            let key_ts = group
                .iter()
                .filter_map(|e| index_ts(&e.start_index))
                .min()
                .unwrap_or(i64::MIN);
            parts.push((key_ts, Part::Kept(group)));
        }
        for piece in pieces {
            let ts = piece
                .index_bounds()
                .and_then(|(first, _)| first.as_i64())
                .unwrap_or(i64::MIN);
            parts.push((ts, Part::Fresh(piece)));
        }
        parts.push((lo, Part::Fresh(frame.clone())));
        parts.sort_by_key(|(ts, _)| *ts);

        let mut entries: Vec<RangesAndKey> = Vec::new();
        let mut offset = 0u64;
        for (_, part) in parts {
            match part {
                Part::Kept(group) => {
                    let rows = group
                        .iter()
                        .map(|e| e.row_range)
                        .next()
                        .map(|r| r.len())
                        .unwrap_or(0);
                    for mut entry in group {
                        entry.row_range = RowRange {
                            start: offset,
                            end: offset + rows,
                        };
                        entries.push(entry);
                    }
                    offset += rows;
                }
                Part::Fresh(piece) => {
                    let written = self
                        .writer
                        .write_tiles(symbol, next, &piece, offset, KeyType::TableData)
                        .await?;
                    offset += written.rows;
                    entries.extend(written.entries);
                }
            }
        }
        entries.sort_by_key(|e| (e.row_range.start, e.col_range.start));

        let new_index = IndexSegment {
            schema: index.schema.clone(),
            total_rows: offset,
            entries,
        };
        let index_key = self.writer.write_index(symbol, next, &new_index).await?;
        let node = self
            .versions
            .commit(CommitRequest {
                symbol: symbol.clone(),
                base_version: head.version_id,
                index_root: Some(index_key),
                tombstones,
            })
            .await?;
        self.write_audit(symbol, "update", node.version_id, Some(frame.num_rows() as u64))
            .await?;
        self.cache.invalidate(symbol).await;
        Ok(node)
    }

    /// Stage `frame` without committing: tiles persist under
    /// `AppendData` keys and become part of the symbol only when
    /// [`TickStore::compact_staged`] folds them in.
    pub async fn stage(&self, symbol: &StreamId, frame: &Frame) -> StoreResult<u64> {
        FrameWriter::check_index(frame)?;
        if let Ok((_, index)) = self.resolve_index_fresh(symbol).await {
            FrameWriter::check_schema(&index.schema, frame)?;
        }
        let head = self.versions.load_head(symbol).await?;
        let next = head.map(|(n, _, _)| n.version_id + 1).unwrap_or(1);
        // Staged tiles are row-sliced only: compaction reassembles them
        // from keys alone, with no index entry to rejoin column splits.
        let staged_writer = FrameWriter::new(
            self.versions.clone(),
            RuntimeConfig {
                col_slice_size: usize::MAX,
                ..self.config.clone()
            },
        );
        let tiles = staged_writer
            .write_tiles(symbol, next, frame, 0, KeyType::AppendData)
            .await?;
        Ok(tiles.rows)
    }

    /// Fold every staged frame of `symbol` into one committed version,
    /// sorted by index, then drop the staged keys.
    pub async fn compact_staged(&self, symbol: &StreamId) -> StoreResult<VersionNode> {
        let prefix = crate::keys::type_stream_prefix(KeyType::AppendData, symbol);
        let staged = with_backoff(&self.config.retry, "list_staged", || {
            self.backend.list(&prefix)
        })
        .await
        .map_err(StoreError::from)?;
        ensure!(
            !staged.is_empty(),
            crate::error::UserInputSnafu {
                msg: format!("no staged data for {symbol}"),
            }
        );

        let mut frames: Vec<Frame> = Vec::new();
        let mut schema: Option<Schema> = None;
        for name in &staged {
            let key = AtomKey::parse(name)?;
            let bytes = self.versions.get_atom(&key).await?;
            let decoded = segment::decode(&bytes)?;
            let frame = decoded.into_frame()?;
            if schema.is_none() {
                schema = Some(frame.schema().clone());
            }
            frames.push(frame);
        }
        let schema = schema.ok_or_else(|| StoreError::UserInput {
            msg: format!("no staged data for {symbol}"),
        })?;
        let merged = merge_frames_sorted(&schema, &frames)?;

        let node = if self.versions.load_head(symbol).await?.is_some() {
            self.append(symbol, &merged).await?
        } else {
            self.write(symbol, &merged).await?
        };
        for name in staged {
            with_backoff(&self.config.retry, "drop_staged", || {
                self.backend.delete(&name)
            })
            .await
            .map_err(StoreError::from)?;
        }
        Ok(node)
    }

    /// Delete `symbol`: the new head carries no index root, hiding the
    /// symbol from reads while keeping history for as-of access until
    /// garbage collection.
    pub async fn delete_symbol(&self, symbol: &StreamId) -> StoreResult<VersionNode> {
        let mut attempts = 0u32;
        let node = loop {
            let (head, index) = self.resolve_index_fresh(symbol).await?;
            let mut tombstones: Vec<AtomKey> =
                index.entries.iter().map(|e| e.key.clone()).collect();
            tombstones.extend(head.index_root.clone());
            match self
                .versions
                .commit(CommitRequest {
                    symbol: symbol.clone(),
                    base_version: head.version_id,
                    index_root: None,
                    tombstones,
                })
                .await
            {
                Ok(node) => break node,
                Err(e @ crate::version::VersionError::WriteConflict { .. }) => {
                    attempts += 1;
                    if attempts >= self.versions.cas_retries() {
                        return Err(e.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };
        self.write_symbol_delta(symbol, false, node.version_id).await?;
        self.write_audit(symbol, "delete", node.version_id, None).await?;
        self.cache.invalidate(symbol).await;
        Ok(node)
    }

    // ------------------------------------------------------------------
    // Read surface
    // ------------------------------------------------------------------

    /// Read `symbol` per `request`.
    pub async fn read(&self, symbol: &StreamId, request: ReadRequest) -> StoreResult<Frame> {
        self.read_with_token(symbol, request, CancelToken::new())
            .await
    }

    /// Read with an external cancellation source.
    pub async fn read_with_token(
        &self,
        symbol: &StreamId,
        request: ReadRequest,
        token: CancelToken,
    ) -> StoreResult<Frame> {
        let (_, index) = self.resolve_index(symbol, request.as_of).await?;
        let query_plan = plan(symbol.clone(), &request, &index)?;

        let processing = ProcessingConfig {
            dynamic_schema: false,
            total_rows: index.total_rows,
            index_range: index.index_bounds().and_then(|(lo, hi)| {
                match (index_ts(&lo), index_ts(&hi)) {
                    (Some(a), Some(b)) => Some((a, b)),
                    _ => None,
                }
            }),
            optimization: request.optimization,
            partition_buckets: self.config.partition_buckets,
        };

        let mgr = Arc::new(ComponentManager::new());
        let mut clauses = Vec::with_capacity(query_plan.clauses.len());
        for mut clause in query_plan.clauses {
            clause
                .set_processing_config(&processing)
                .map_err(plan_clause_error)?;
            clause
                .set_component_manager(Arc::clone(&mgr))
                .map_err(plan_clause_error)?;
            clauses.push(Arc::new(clause));
        }

        let executor = PipelineExecutor::new(
            self.versions.clone(),
            Arc::clone(&mgr),
            self.config.inflight_high_water,
            token,
        );
        let groups = executor
            .execute(clauses, query_plan.initial, query_plan.load_columns)
            .await?;

        let frame = assemble_frame(&mgr, &query_plan.output_schema, &groups)?;
        mgr.release_groups(&groups);
        Ok(frame)
    }

    /// Read several symbols, collecting a result per item.
    ///
    /// Unlike single-symbol reads, which short-circuit at the first
    /// non-ignorable error, a batch always returns one slot per request.
    pub async fn read_batch(
        &self,
        requests: Vec<(StreamId, ReadRequest)>,
    ) -> Vec<StoreResult<Frame>> {
        let futures = requests
            .into_iter()
            .map(|(symbol, request)| {
                let store = self.clone();
                async move { store.read(&symbol, request).await }
            })
            .collect::<Vec<_>>();
        futures::future::join_all(futures).await
    }

    /// First `n` rows.
    pub async fn head(&self, symbol: &StreamId, n: i64) -> StoreResult<Frame> {
        self.read(symbol, ReadRequest::new().with_row_range(RowRangeKind::Head(n)))
            .await
    }

    /// Last `n` rows.
    pub async fn tail(&self, symbol: &StreamId, n: i64) -> StoreResult<Frame> {
        self.read(symbol, ReadRequest::new().with_row_range(RowRangeKind::Tail(n)))
            .await
    }

    /// Versions of `symbol`, newest first.
    pub async fn list_versions(&self, symbol: &StreamId) -> StoreResult<Vec<VersionNode>> {
        Ok(self.versions.list_versions(symbol).await?)
    }

    /// Live symbols, folded from the symbol-list delta keys.
    pub async fn list_symbols(&self) -> StoreResult<Vec<StreamId>> {
        let prefix = format!("{}/", KeyType::SymbolList.tag());
        let names = with_backoff(&self.config.retry, "list_symbols", || {
            self.backend.list(&prefix)
        })
        .await
        .map_err(StoreError::from)?;

        // Fold deltas in creation order; the last action per symbol wins.
        let mut keyed: Vec<(i64, SymbolDelta)> = Vec::new();
        for name in names {
            let key = match AtomKey::parse(&name) {
                Ok(key) => key,
                Err(e) => {
                    log::warn!("skipping unparseable symbol-list key {name:?}: {e}");
                    continue;
                }
            };
            let bytes = match self.backend.get(&name).await {
                Ok(bytes) => bytes,
                Err(StorageError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<SymbolDelta>(&bytes) {
                Ok(delta) => keyed.push((key.creation_ts, delta)),
                Err(e) => log::warn!("skipping corrupt symbol-list delta {name:?}: {e}"),
            }
        }
        keyed.sort_by_key(|(ts, _)| *ts);

        let mut live: Vec<StreamId> = Vec::new();
        for (_, delta) in keyed {
            live.retain(|s| s != &delta.symbol);
            if delta.added {
                live.push(delta.symbol);
            }
        }
        live.sort();
        Ok(live)
    }

    // ------------------------------------------------------------------
    // Snapshots, statistics, maintenance
    // ------------------------------------------------------------------

    /// Pin every live symbol's current version under `name`.
    pub async fn snapshot(&self, name: &str) -> StoreResult<()> {
        let mut versions = Vec::new();
        for symbol in self.list_symbols().await? {
            if let Some((_, key, _)) = self.versions.load_head(&symbol).await? {
                versions.push(key);
            }
        }
        let record = SnapshotRecord {
            name: name.to_string(),
            versions,
            created_at: Utc::now(),
        };
        let payload = serde_json::to_vec(&record).map_err(|e| StoreError::UserInput {
            msg: format!("snapshot serialize: {e}"),
        })?;
        let ref_key = RefKey::new(StreamId::name(name)?, KeyType::Snapshot);
        let outcome = self
            .backend
            .atomic_replace(&ref_key.object_name(), None, Bytes::from(payload))
            .await
            .map_err(StoreError::from)?;
        ensure!(
            outcome == ReplaceOutcome::Replaced,
            crate::error::UserInputSnafu {
                msg: format!("snapshot {name} already exists"),
            }
        );
        Ok(())
    }

    /// Names of retained snapshots.
    pub async fn list_snapshots(&self) -> StoreResult<Vec<String>> {
        let names = self
            .backend
            .list(&format!("{}/", KeyType::Snapshot.tag()))
            .await
            .map_err(StoreError::from)?;
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            if let Ok(key) = RefKey::parse(&name) {
                out.push(key.stream_id.to_string());
            }
        }
        Ok(out)
    }

    /// Drop a snapshot; its pinned versions become ordinary history.
    pub async fn delete_snapshot(&self, name: &str) -> StoreResult<()> {
        let ref_key = RefKey::new(StreamId::name(name)?, KeyType::Snapshot);
        self.backend
            .delete(&ref_key.object_name())
            .await
            .map_err(StoreError::from)
    }

    /// Compute per-column statistics over the symbol's current rows and
    /// persist them as a `Metrics` artifact.
    pub async fn column_stats(
        &self,
        symbol: &StreamId,
        columns: Option<Vec<String>>,
    ) -> StoreResult<Vec<(String, FieldStats)>> {
        let (head, index) = self.resolve_index(symbol, None).await?;

        let stats_clause = ColumnStatsClause::new(columns);
        let collector = stats_clause.collector();
        let mut clause = Clause::new(ClauseKind::ColumnStats(stats_clause));
        let mgr = Arc::new(ComponentManager::new());
        let processing = ProcessingConfig {
            total_rows: index.total_rows,
            partition_buckets: self.config.partition_buckets,
            ..ProcessingConfig::default()
        };
        clause.set_processing_config(&processing).map_err(plan_clause_error)?;
        clause
            .set_component_manager(Arc::clone(&mgr))
            .map_err(plan_clause_error)?;

        let executor = PipelineExecutor::new(
            self.versions.clone(),
            Arc::clone(&mgr),
            self.config.inflight_high_water,
            CancelToken::new(),
        );
        let groups = executor
            .execute(vec![Arc::new(clause)], index.entries.clone(), None)
            .await?;
        mgr.release_groups(&groups);

        let stats = collector.lock().clone();
        let payload = serde_json::to_vec(&stats).map_err(|e| StoreError::UserInput {
            msg: format!("stats serialize: {e}"),
        })?;
        let key = atom_key_for(
            symbol.clone(),
            KeyType::Metrics,
            head.version_id,
            &payload,
            None,
        );
        self.versions.put_atom(&key, Bytes::from(payload)).await?;
        Ok(stats)
    }

    /// Reclaim unreachable atoms older than the configured grace
    /// interval.
    pub async fn garbage_collect(&self) -> StoreResult<GcReport> {
        Ok(collect_garbage(&self.versions, self.config.gc_grace).await?)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Resolve a version for reading and load its index segment. Latest
    /// resolution goes through the head cache.
    async fn resolve_index(
        &self,
        symbol: &StreamId,
        as_of: Option<u64>,
    ) -> StoreResult<(VersionNode, IndexSegment)> {
        let node = match as_of {
            Some(_) => self.versions.resolve(symbol, as_of).await?.0,
            None => {
                let head = self.cache.head(&self.versions, symbol).await?;
                match head {
                    Some((node, _)) if node.index_root.is_some() => node,
                    _ => return Err(self.not_found(symbol)),
                }
            }
        };
        self.index_of(symbol, node).await
    }

    /// Resolve the live head straight from storage; mutations never trust
    /// the cache.
    async fn resolve_index_fresh(
        &self,
        symbol: &StreamId,
    ) -> StoreResult<(VersionNode, IndexSegment)> {
        match self.versions.load_head(symbol).await? {
            Some((node, _, _)) if node.index_root.is_some() => self.index_of(symbol, node).await,
            _ => Err(self.not_found(symbol)),
        }
    }

    async fn index_of(
        &self,
        symbol: &StreamId,
        node: VersionNode,
    ) -> StoreResult<(VersionNode, IndexSegment)> {
        let index_key = node
            .index_root
            .clone()
            .ok_or_else(|| self.not_found(symbol))?;
        let bytes = self.versions.get_atom(&index_key).await?;
        let index = IndexSegment::from_bytes(&bytes)?;
        Ok((node, index))
    }

    fn not_found(&self, symbol: &StreamId) -> StoreError {
        crate::version::VersionError::SymbolNotFound {
            symbol: symbol.to_string(),
            backtrace: snafu::Backtrace::capture(),
        }
        .into()
    }

    /// Keys superseded when replacing a head: its index root plus every
    /// data key the index maps.
    async fn superseded_keys(&self, head: &VersionNode) -> StoreResult<Vec<AtomKey>> {
        let Some(index_key) = &head.index_root else {
            return Ok(Vec::new());
        };
        let bytes = self.versions.get_atom(index_key).await?;
        let index = IndexSegment::from_bytes(&bytes)?;
        let mut keys: Vec<AtomKey> = index.entries.into_iter().map(|e| e.key).collect();
        keys.push(index_key.clone());
        Ok(keys)
    }

    /// Decode one row slice's tiles into a frame with the full schema.
    async fn load_group_frame(
        &self,
        schema: &Schema,
        group: &[RangesAndKey],
    ) -> StoreResult<Frame> {
        let mut index_col: Option<Column> = None;
        let mut columns: Vec<(String, Column)> = Vec::new();
        for entry in group {
            let bytes = self.versions.get_atom(&entry.key).await?;
            let decoded = segment::decode(&bytes)?;
            if index_col.is_none() {
                index_col = Some(decoded.index.clone());
            }
            for (def, col) in decoded.schema.fields().iter().zip(&decoded.columns) {
                if !columns.iter().any(|(n, _)| n == &def.name) {
                    columns.push((def.name.clone(), col.clone()));
                }
            }
        }
        let index_col = index_col.ok_or_else(|| StoreError::UserInput {
            msg: "empty tile group".to_string(),
        })?;
        let ordered = schema
            .fields()
            .iter()
            .map(|def| {
                columns
                    .iter()
                    .find(|(n, _)| n == &def.name)
                    .map(|(_, c)| c.clone())
                    .unwrap_or_else(|| Column::nulls(def.dtype, index_col.len()))
            })
            .collect();
        Ok(Frame::new(schema.clone(), index_col, ordered)?)
    }

    async fn write_symbol_delta(
        &self,
        symbol: &StreamId,
        added: bool,
        version_id: u64,
    ) -> StoreResult<()> {
        let delta = SymbolDelta {
            symbol: symbol.clone(),
            added,
        };
        let payload = serde_json::to_vec(&delta).map_err(|e| StoreError::UserInput {
            msg: format!("symbol delta serialize: {e}"),
        })?;
        let key = atom_key_for(
            symbol.clone(),
            KeyType::SymbolList,
            version_id,
            &payload,
            None,
        );
        self.versions.put_atom(&key, Bytes::from(payload)).await?;
        Ok(())
    }

    async fn write_audit(
        &self,
        symbol: &StreamId,
        op: &str,
        version_id: u64,
        rows: Option<u64>,
    ) -> StoreResult<()> {
        let record = AuditRecord {
            op: op.to_string(),
            version_id,
            rows,
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_vec(&record).map_err(|e| StoreError::UserInput {
            msg: format!("audit serialize: {e}"),
        })?;
        let key = atom_key_for(symbol.clone(), KeyType::Log, version_id, &payload, None);
        self.versions.put_atom(&key, Bytes::from(payload)).await?;
        Ok(())
    }
}

fn plan_clause_error(err: crate::clause::ClauseError) -> StoreError {
    StoreError::from(crate::query::PlanError::from(err))
}

fn index_ts(value: &IndexValue) -> Option<i64> {
    match value {
        IndexValue::Ts(t) => Some(*t),
        IndexValue::Str(_) => None,
    }
}

fn scalar_ts(value: &Scalar) -> StoreResult<i64> {
    value.as_i64().ok_or_else(|| StoreError::UserInput {
        msg: "update requires a timestamp index".to_string(),
    })
}

fn scalar_to_index(value: &Scalar) -> StoreResult<IndexValue> {
    match value {
        Scalar::I64(v) => Ok(IndexValue::Ts(*v)),
        Scalar::Utf8(v) => Ok(IndexValue::Str(v.clone())),
        other => Err(StoreError::UserInput {
            msg: format!("index value {other:?} is not indexable"),
        }),
    }
}

/// Group index entries into row slices, sorted by row start.
fn group_entries_by_row_slice(entries: &[RangesAndKey]) -> Vec<Vec<RangesAndKey>> {
    let mut groups: Vec<(RowRange, Vec<RangesAndKey>)> = Vec::new();
    for entry in entries {
        match groups.iter_mut().find(|(r, _)| *r == entry.row_range) {
            Some((_, members)) => members.push(entry.clone()),
            None => groups.push((entry.row_range, vec![entry.clone()])),
        }
    }
    groups.sort_by_key(|(r, _)| r.start);
    groups.into_iter().map(|(_, members)| members).collect()
}

/// Rows strictly before `lo` and strictly after `hi` of a sorted frame.
fn split_frame_outside(frame: &Frame, lo: i64, hi: i64) -> (Frame, Frame) {
    let rows = frame.num_rows();
    let ts_at = |i: usize| frame.index().scalar_at(i).and_then(|s| s.as_i64());
    let first_inside = (0..rows)
        .find(|&i| ts_at(i).map_or(false, |t| t >= lo))
        .unwrap_or(rows);
    let first_after = (0..rows)
        .find(|&i| ts_at(i).map_or(false, |t| t > hi))
        .unwrap_or(rows);
    (
        frame.slice_rows(0, first_inside),
        frame.slice_rows(first_after, rows),
    )
}

/// Concatenate frames and stable-sort rows by index value.
fn merge_frames_sorted(schema: &Schema, frames: &[Frame]) -> StoreResult<Frame> {
    let mut ordered: Vec<&Frame> = frames.iter().collect();
    ordered.sort_by_key(|f| {
        f.index_bounds()
            .and_then(|(first, _)| first.as_i64())
            .unwrap_or(i64::MIN)
    });

    let index_parts: Vec<&Column> = ordered.iter().map(|f| f.index()).collect();
    let index = Column::concat(&index_parts).ok_or_else(|| StoreError::UserInput {
        msg: "staged frames disagree on index type".to_string(),
    })?;

    let mut order: Vec<usize> = (0..index.len()).collect();
    order.sort_by(|&a, &b| {
        match (index.scalar_at(a), index.scalar_at(b)) {
            (Some(x), Some(y)) => x.partial_cmp_value(&y).unwrap_or(std::cmp::Ordering::Equal),
            _ => std::cmp::Ordering::Equal,
        }
    });

    let mut columns = Vec::with_capacity(schema.fields().len());
    for def in schema.fields() {
        let parts: Vec<&Column> = ordered
            .iter()
            .filter_map(|f| f.column(&def.name))
            .collect();
        let merged = Column::concat(&parts).ok_or_else(|| StoreError::UserInput {
            msg: format!("staged frames disagree on column {}", def.name),
        })?;
        columns.push(merged.take(&order));
    }
    Ok(Frame::new(schema.clone(), index.take(&order), columns)?)
}

/// Assemble the final entity groups into one output frame.
fn assemble_frame(
    mgr: &ComponentManager,
    schema: &Schema,
    groups: &[Vec<crate::arena::EntityId>],
) -> StoreResult<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for group in groups {
        for &id in group {
            let unit = mgr
                .unit(id)
                .map_err(crate::clause::ClauseError::from)
                .map_err(plan_clause_error)?;
            let (index, columns) =
                crate::clause::unit_columns(mgr, &unit).map_err(plan_clause_error)?;
            let rows = index.len();
            let ordered = schema
                .fields()
                .iter()
                .map(|def| {
                    columns
                        .iter()
                        .find(|(n, _)| n == &def.name)
                        .map(|(_, c)| c.clone())
                        .unwrap_or_else(|| Column::nulls(def.dtype, rows))
                })
                .collect();
            frames.push(Frame::new(schema.clone(), index, ordered)?);
        }
    }
    if frames.is_empty() {
        return empty_frame(schema);
    }

    let index_parts: Vec<&Column> = frames.iter().map(|f| f.index()).collect();
    let index = Column::concat(&index_parts).ok_or_else(|| StoreError::UserInput {
        msg: "result slices disagree on index type".to_string(),
    })?;
    let mut columns = Vec::with_capacity(schema.fields().len());
    for (slot, def) in schema.fields().iter().enumerate() {
        let parts: Vec<&Column> = frames.iter().map(|f| &f.columns()[slot]).collect();
        let merged = Column::concat(&parts).ok_or_else(|| StoreError::UserInput {
            msg: format!("result slices disagree on column {}", def.name),
        })?;
        columns.push(merged);
    }
    Ok(Frame::new(schema.clone(), index, columns)?)
}

fn empty_frame(schema: &Schema) -> StoreResult<Frame> {
    let index = match schema.index().dtype.widened() {
        crate::frame::DType::Utf8 => Column::from_utf8(Vec::new()),
        _ => Column::from_i64(schema.index().dtype, Vec::new()),
    };
    let columns = schema
        .fields()
        .iter()
        .map(|def| Column::nulls(def.dtype, 0))
        .collect();
    Ok(Frame::new(schema.clone(), index, columns)?)
}
