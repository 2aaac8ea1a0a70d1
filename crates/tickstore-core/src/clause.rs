//! The clause set: pipeline stages with a uniform capability surface.
//!
//! A [`Clause`] is a tagged variant plus shared wiring; no inheritance,
//! all state is data. Every clause exposes the same capabilities:
//!
//! - `structure_initial` / `structure_for_processing`: partition the
//!   input (key ranges for the first clause, entity groups afterwards)
//!   into processing units. Row-aligned grouping is the default; clauses
//!   needing whole-input visibility declare [`ProcessingStructure::All`].
//! - `process`: transform one processing unit into replacement entities,
//!   side-effect free apart from arena interactions.
//! - `clause_info`: required input columns, projection combinability,
//!   and the structure tag.
//! - `set_processing_config` / `set_component_manager`: receive pipeline
//!   knobs and bind the query's arena.
//! - `modify_schema` / `join_schemas`: static schema effects.
//!
//! Calls outside the `Fresh → Configured → Executing → Drained` state
//! machine fail with [`ClauseError::Misuse`].

pub mod aggregation;
pub mod column_stats;
pub mod date_range;
pub mod filter;
pub mod merge;
pub mod partition;
pub mod project;
pub mod resample;
pub mod row_range;
pub mod sort;

pub use aggregation::AggregationClause;
pub use column_stats::ColumnStatsClause;
pub use date_range::DateRangeClause;
pub use filter::FilterClause;
pub use merge::{ConcatClause, JoinType, MergeClause, RemoveColumnPartitioningClause};
pub use partition::PartitionClause;
pub use project::ProjectClause;
pub use resample::{ResampleBoundary, ResampleClause, ResampleOrigin, ResampleRule};
pub use row_range::RowRangeClause;
pub use sort::{SortClause, SplitClause};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::arena::{ArenaError, ColumnSegment, ComponentManager, EntityPayload, ProcessingUnit};
use crate::arena::EntityId;
use crate::expr::ExprError;
use crate::frame::{Column, Schema};
use crate::index::{RangesAndKey, RowRange};

/// Errors raised by clause operations.
#[derive(Debug, Snafu)]
pub enum ClauseError {
    /// An operation arrived outside the expected lifecycle state.
    #[snafu(display("clause misuse: {clause} cannot {operation} in state {state:?}"))]
    Misuse {
        /// Clause name.
        clause: &'static str,
        /// The attempted operation.
        operation: &'static str,
        /// Current state.
        state: ClauseState,
    },

    /// The clause cannot open a pipeline.
    #[snafu(display("{clause} cannot be the first clause in a pipeline"))]
    NotFirst {
        /// Clause name.
        clause: &'static str,
    },

    /// Arena lookup failure.
    #[snafu(transparent)]
    Arena {
        /// Underlying arena error.
        source: ArenaError,
    },

    /// Expression failure.
    #[snafu(transparent)]
    Expr {
        /// Underlying expression error.
        source: ExprError,
    },

    /// Inputs contradict the clause's contract.
    #[snafu(display("{clause}: {detail}"))]
    BadInput {
        /// Clause name.
        clause: &'static str,
        /// What was wrong.
        detail: String,
    },
}

/// How a clause wants its input partitioned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingStructure {
    /// One processing unit per row slice; units flow independently.
    RowSlice,
    /// The clause needs every upstream group before it can run.
    All,
}

/// Static facts the executor and planner read off a clause.
#[derive(Clone, Debug)]
pub struct ClauseInfo {
    /// Display name.
    pub name: &'static str,
    /// Columns the clause needs decoded, `None` for "whatever is there".
    pub input_columns: Option<Vec<String>>,
    /// Whether a column projection can be pushed through this clause.
    pub can_combine_with_column_selection: bool,
    /// Input partitioning requirement.
    pub structure: ProcessingStructure,
    /// Whether this clause defines the output row order.
    pub defines_row_order: bool,
}

/// Speed/memory preference for intermediate bitsets.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum OptimizationTarget {
    /// Favor evaluation speed.
    #[default]
    Speed,
    /// Run-length compress intermediates to cap memory.
    Memory,
}

/// Pipeline-level knobs pushed into every clause before execution.
#[derive(Clone, Debug, Default)]
pub struct ProcessingConfig {
    /// Columns may appear and disappear across slices; readers materialize
    /// nulls for absent columns.
    pub dynamic_schema: bool,
    /// Total row count of the source version.
    pub total_rows: u64,
    /// Overall index range of the source version, nanoseconds.
    pub index_range: Option<(i64, i64)>,
    /// Bitset optimization preference.
    pub optimization: OptimizationTarget,
    /// Bucket count for hash partitioning.
    pub partition_buckets: usize,
}

/// Lifecycle states of a clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClauseState {
    /// Constructed, not yet configured.
    Fresh,
    /// Config and arena bound; ready to structure and process.
    Configured,
    /// At least one processing unit has run.
    Executing,
    /// The executor finished this clause; further processing is misuse.
    Drained,
}

const STATE_FRESH: u8 = 0;
const STATE_CONFIGURED: u8 = 1;
const STATE_EXECUTING: u8 = 2;
const STATE_DRAINED: u8 = 3;

fn state_from(v: u8) -> ClauseState {
    match v {
        STATE_FRESH => ClauseState::Fresh,
        STATE_CONFIGURED => ClauseState::Configured,
        STATE_EXECUTING => ClauseState::Executing,
        _ => ClauseState::Drained,
    }
}

/// The clause variants.
#[derive(Debug)]
pub enum ClauseKind {
    /// Identity.
    Passthrough,
    /// Row filtering by expression bitset.
    Filter(FilterClause),
    /// Computed column projection.
    Project(ProjectClause),
    /// Hash bucketing on a group column.
    Partition(PartitionClause),
    /// Per-bucket reductions.
    Aggregation(AggregationClause),
    /// Time-bucketed reductions.
    Resample(ResampleClause),
    /// Head/tail/range row retention.
    RowRange(RowRangeClause),
    /// Index-interval row retention with slice push-down.
    DateRange(DateRangeClause),
    /// Stable re-ordering by a key column.
    Sort(SortClause),
    /// Re-slicing to a fixed row count.
    Split(SplitClause),
    /// K-way merge of sorted inputs.
    Merge(MergeClause),
    /// Vertical concatenation of branches.
    Concat(ConcatClause),
    /// Reversal of column-dimension partitioning.
    RemoveColumnPartitioning(RemoveColumnPartitioningClause),
    /// Per-column statistics emission.
    ColumnStats(ColumnStatsClause),
}

/// Everything per-clause code needs at run time.
pub(crate) struct ClauseCtx<'a> {
    pub cfg: &'a ProcessingConfig,
    pub mgr: &'a Arc<ComponentManager>,
}

/// One pipeline stage: a variant plus shared lifecycle wiring.
#[derive(Debug)]
pub struct Clause {
    kind: ClauseKind,
    info: ClauseInfo,
    state: AtomicU8,
    cfg: ProcessingConfig,
    mgr: Option<Arc<ComponentManager>>,
    has_cfg: bool,
}

impl Clause {
    /// Wrap a clause kind.
    pub fn new(kind: ClauseKind) -> Clause {
        let info = clause_info_for(&kind);
        Clause {
            kind,
            info,
            state: AtomicU8::new(STATE_FRESH),
            cfg: ProcessingConfig::default(),
            mgr: None,
            has_cfg: false,
        }
    }

    /// Static clause facts.
    pub fn clause_info(&self) -> &ClauseInfo {
        &self.info
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ClauseState {
        state_from(self.state.load(Ordering::Acquire))
    }

    /// The underlying variant.
    pub fn kind(&self) -> &ClauseKind {
        &self.kind
    }

    /// Push pipeline knobs; legal before execution starts.
    pub fn set_processing_config(&mut self, cfg: &ProcessingConfig) -> Result<(), ClauseError> {
        self.expect_before_execution("set_processing_config")?;
        self.cfg = cfg.clone();
        self.has_cfg = true;
        if let ClauseKind::Resample(r) = &mut self.kind {
            r.apply_config(cfg)?;
        }
        if let ClauseKind::RowRange(r) = &mut self.kind {
            r.apply_config(cfg);
        }
        self.maybe_configured();
        Ok(())
    }

    /// Bind the query's arena; legal before execution starts.
    pub fn set_component_manager(
        &mut self,
        mgr: Arc<ComponentManager>,
    ) -> Result<(), ClauseError> {
        self.expect_before_execution("set_component_manager")?;
        self.mgr = Some(mgr);
        self.maybe_configured();
        Ok(())
    }

    fn maybe_configured(&self) {
        if self.has_cfg && self.mgr.is_some() {
            let _ = self.state.compare_exchange(
                STATE_FRESH,
                STATE_CONFIGURED,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    fn expect_before_execution(&self, operation: &'static str) -> Result<(), ClauseError> {
        let state = self.state();
        ensure!(
            matches!(state, ClauseState::Fresh | ClauseState::Configured),
            MisuseSnafu {
                clause: self.info.name,
                operation,
                state,
            }
        );
        Ok(())
    }

    fn ctx(&self, operation: &'static str) -> Result<ClauseCtx<'_>, ClauseError> {
        let state = self.state();
        ensure!(
            matches!(state, ClauseState::Configured | ClauseState::Executing),
            MisuseSnafu {
                clause: self.info.name,
                operation,
                state,
            }
        );
        let mgr = self.mgr.as_ref().ok_or(ClauseError::Misuse {
            clause: self.info.name,
            operation,
            state,
        })?;
        Ok(ClauseCtx {
            cfg: &self.cfg,
            mgr,
        })
    }

    /// Partition the initial key-range list (first clause only). May drop
    /// entries (push-down pruning); returns groups of indices into the
    /// possibly shrunk list.
    pub fn structure_initial(
        &self,
        ranges: &mut Vec<RangesAndKey>,
    ) -> Result<Vec<Vec<usize>>, ClauseError> {
        let _ctx = self.ctx("structure_initial")?;
        match &self.kind {
            ClauseKind::Passthrough
            | ClauseKind::Filter(_)
            | ClauseKind::Project(_)
            | ClauseKind::Partition(_)
            | ClauseKind::Split(_)
            | ClauseKind::Sort(_)
            | ClauseKind::ColumnStats(_)
            | ClauseKind::RemoveColumnPartitioning(_) => Ok(structure_by_row_slice(ranges)),
            ClauseKind::DateRange(c) => Ok(c.structure_initial(ranges)),
            ClauseKind::RowRange(c) => Ok(c.structure_initial(ranges)),
            ClauseKind::Resample(c) => Ok(c.structure_initial(ranges)),
            ClauseKind::Aggregation(_) => NotFirstSnafu {
                clause: "Aggregation",
            }
            .fail(),
            ClauseKind::Merge(_) => NotFirstSnafu { clause: "Merge" }.fail(),
            ClauseKind::Concat(_) => NotFirstSnafu { clause: "Concat" }.fail(),
        }
    }

    /// Partition entity groups handed down from the previous clause.
    pub fn structure_for_processing(
        &self,
        groups: Vec<Vec<EntityId>>,
    ) -> Result<Vec<Vec<EntityId>>, ClauseError> {
        let ctx = self.ctx("structure_for_processing")?;
        match &self.kind {
            ClauseKind::Aggregation(c) => c.structure(&ctx, groups),
            ClauseKind::Resample(c) => c.structure(&ctx, groups),
            ClauseKind::RemoveColumnPartitioning(c) => c.structure(&ctx, groups),
            ClauseKind::Merge(_) | ClauseKind::Concat(_) | ClauseKind::Sort(_) => {
                // Whole-input clauses see one flattened group.
                Ok(vec![groups.into_iter().flatten().collect()])
            }
            ClauseKind::RowRange(_) => Ok(vec![groups.into_iter().flatten().collect()]),
            _ => Ok(groups),
        }
    }

    /// Transform one processing unit, producing replacement entities.
    pub fn process(&self, ids: Vec<EntityId>) -> Result<Vec<EntityId>, ClauseError> {
        let ctx = self.ctx("process")?;
        let _ = self.state.compare_exchange(
            STATE_CONFIGURED,
            STATE_EXECUTING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        match &self.kind {
            ClauseKind::Passthrough => Ok(ids),
            ClauseKind::Filter(c) => c.process(&ctx, ids),
            ClauseKind::Project(c) => c.process(&ctx, ids),
            ClauseKind::Partition(c) => c.process(&ctx, ids),
            ClauseKind::Aggregation(c) => c.process(&ctx, ids),
            ClauseKind::Resample(c) => c.process(&ctx, ids),
            ClauseKind::RowRange(c) => c.process(&ctx, ids),
            ClauseKind::DateRange(c) => c.process(&ctx, ids),
            ClauseKind::Sort(c) => c.process(&ctx, ids),
            ClauseKind::Split(c) => c.process(&ctx, ids),
            ClauseKind::Merge(c) => c.process(&ctx, ids),
            ClauseKind::Concat(c) => c.process(&ctx, ids),
            ClauseKind::RemoveColumnPartitioning(c) => c.process(&ctx, ids),
            ClauseKind::ColumnStats(c) => c.process(&ctx, ids),
        }
    }

    /// Mark the clause finished; subsequent processing is misuse.
    pub fn mark_drained(&self) {
        self.state.store(STATE_DRAINED, Ordering::Release);
    }

    /// Static effect on the output schema.
    pub fn modify_schema(&self, schema: Schema) -> Result<Schema, ClauseError> {
        match &self.kind {
            ClauseKind::Project(c) => c.modify_schema(schema),
            ClauseKind::Aggregation(c) => c.modify_schema(schema),
            ClauseKind::Resample(c) => c.modify_schema(schema),
            _ => Ok(schema),
        }
    }

    /// Merge branch schemas; only meaningful for joining clauses.
    pub fn join_schemas(&self, schemas: Vec<Schema>) -> Result<Schema, ClauseError> {
        match &self.kind {
            ClauseKind::Concat(c) => c.join_schemas(schemas),
            _ => BadInputSnafu {
                clause: self.info.name,
                detail: "join_schemas on a non-joining clause".to_string(),
            }
            .fail(),
        }
    }
}

fn clause_info_for(kind: &ClauseKind) -> ClauseInfo {
    let base = |name: &'static str| ClauseInfo {
        name,
        input_columns: None,
        can_combine_with_column_selection: true,
        structure: ProcessingStructure::RowSlice,
        defines_row_order: false,
    };
    match kind {
        ClauseKind::Passthrough => base("Passthrough"),
        ClauseKind::Filter(c) => ClauseInfo {
            input_columns: Some(c.input_columns()),
            ..base("Filter")
        },
        ClauseKind::Project(c) => ClauseInfo {
            input_columns: Some(c.input_columns()),
            ..base("Project")
        },
        ClauseKind::Partition(c) => ClauseInfo {
            input_columns: Some(vec![c.grouping_column().to_string()]),
            ..base("Partition")
        },
        ClauseKind::Aggregation(c) => ClauseInfo {
            input_columns: Some(c.input_columns()),
            can_combine_with_column_selection: false,
            structure: ProcessingStructure::All,
            ..base("Aggregation")
        },
        ClauseKind::Resample(c) => ClauseInfo {
            input_columns: Some(c.input_columns()),
            structure: ProcessingStructure::All,
            defines_row_order: true,
            ..base("Resample")
        },
        ClauseKind::RowRange(_) => ClauseInfo {
            structure: ProcessingStructure::All,
            ..base("RowRange")
        },
        ClauseKind::DateRange(_) => base("DateRange"),
        ClauseKind::Sort(c) => ClauseInfo {
            input_columns: Some(vec![c.column().to_string()]),
            structure: ProcessingStructure::All,
            defines_row_order: true,
            ..base("Sort")
        },
        ClauseKind::Split(_) => base("Split"),
        ClauseKind::Merge(_) => ClauseInfo {
            structure: ProcessingStructure::All,
            defines_row_order: true,
            ..base("Merge")
        },
        ClauseKind::Concat(_) => ClauseInfo {
            structure: ProcessingStructure::All,
            can_combine_with_column_selection: false,
            ..base("Concat")
        },
        ClauseKind::RemoveColumnPartitioning(_) => ClauseInfo {
            structure: ProcessingStructure::All,
            can_combine_with_column_selection: false,
            ..base("RemoveColumnPartitioning")
        },
        ClauseKind::ColumnStats(c) => ClauseInfo {
            input_columns: c.input_columns(),
            can_combine_with_column_selection: false,
            ..base("ColumnStatsGeneration")
        },
    }
}

/// Default grouping: one group per row slice, preserving source order.
/// Entries of the same row range (column-partitioned tiles) group
/// together.
pub fn structure_by_row_slice(ranges: &[RangesAndKey]) -> Vec<Vec<usize>> {
    let mut groups: Vec<(RowRange, Vec<usize>)> = Vec::new();
    for (i, entry) in ranges.iter().enumerate() {
        match groups.iter_mut().find(|(r, _)| *r == entry.row_range) {
            Some((_, members)) => members.push(i),
            None => groups.push((entry.row_range, vec![i])),
        }
    }
    groups.sort_by_key(|(r, _)| r.start);
    groups.into_iter().map(|(_, members)| members).collect()
}

// ---------------------------------------------------------------------------
// Shared unit plumbing used by the per-clause modules.
// ---------------------------------------------------------------------------

/// Materialize a unit's index and named columns out of the arena.
pub(crate) fn unit_columns(
    mgr: &ComponentManager,
    unit: &ProcessingUnit,
) -> Result<(Column, Vec<(String, Column)>), ClauseError> {
    let index = mgr.column_data(unit.index)?;
    let mut columns = Vec::with_capacity(unit.columns.len());
    for (name, id) in &unit.columns {
        columns.push((name.clone(), mgr.column_data(*id)?));
    }
    Ok((index, columns))
}

/// Insert columns as entities and bundle them into a new unit.
pub(crate) fn insert_unit(
    mgr: &ComponentManager,
    row_range: RowRange,
    index: Column,
    columns: Vec<(String, Column)>,
    bucket: Option<u64>,
) -> EntityId {
    let index_id = mgr.insert(EntityPayload::Column(ColumnSegment {
        name: "<index>".to_string(),
        column: index,
    }));
    let column_ids = columns
        .into_iter()
        .map(|(name, column)| {
            let id = mgr.insert(EntityPayload::Column(ColumnSegment {
                name: name.clone(),
                column,
            }));
            (name, id)
        })
        .collect();
    mgr.insert(EntityPayload::Unit(ProcessingUnit {
        row_range,
        index: index_id,
        columns: column_ids,
        bucket,
    }))
}

/// Build a unit keeping only masked rows; the row range shrinks in place
/// so downstream ordering keys stay monotone.
pub(crate) fn filter_unit(
    mgr: &ComponentManager,
    unit: &ProcessingUnit,
    mask: &RoaringBitmap,
) -> Result<EntityId, ClauseError> {
    let (index, columns) = unit_columns(mgr, unit)?;
    let kept = mask.len();
    let filtered = columns
        .into_iter()
        .map(|(name, col)| (name, col.filter(mask)))
        .collect();
    Ok(insert_unit(
        mgr,
        RowRange {
            start: unit.row_range.start,
            end: unit.row_range.start + kept,
        },
        index.filter(mask),
        filtered,
        unit.bucket,
    ))
}

/// Concatenate several units' rows in order, returning merged columns.
///
/// With `dynamic_schema`, columns absent from a unit materialize as nulls;
/// otherwise units must agree on their column sets.
pub(crate) fn concat_unit_columns(
    mgr: &ComponentManager,
    units: &[ProcessingUnit],
    dynamic_schema: bool,
) -> Result<(Column, Vec<(String, Column)>), ClauseError> {
    ensure!(
        !units.is_empty(),
        BadInputSnafu {
            clause: "concat",
            detail: "no units to concatenate".to_string(),
        }
    );
    let mut names: Vec<String> = Vec::new();
    for unit in units {
        for (name, _) in &unit.columns {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
    }

    let mut indexes = Vec::with_capacity(units.len());
    let mut per_name: Vec<Vec<Column>> = vec![Vec::new(); names.len()];
    for unit in units {
        let (index, columns) = unit_columns(mgr, unit)?;
        let rows = index.len();
        for (slot, name) in names.iter().enumerate() {
            match columns.iter().find(|(n, _)| n == name) {
                Some((_, col)) => per_name[slot].push(col.clone()),
                None => {
                    ensure!(
                        dynamic_schema,
                        BadInputSnafu {
                            clause: "concat",
                            detail: format!("column {name} missing from a unit"),
                        }
                    );
                    per_name[slot].push(Column::nulls(crate::frame::DType::Float64, rows));
                }
            }
        }
        indexes.push(index);
    }

    let index_refs: Vec<&Column> = indexes.iter().collect();
    let index = Column::concat(&index_refs).ok_or_else(|| ClauseError::BadInput {
        clause: "concat",
        detail: "index columns do not promote to one dtype".to_string(),
    })?;
    let mut columns = Vec::with_capacity(names.len());
    for (name, parts) in names.into_iter().zip(per_name) {
        let refs: Vec<&Column> = parts.iter().collect();
        let merged = Column::concat(&refs).ok_or_else(|| ClauseError::BadInput {
            clause: "concat",
            detail: format!("column {name} does not promote to one dtype"),
        })?;
        columns.push((name, merged));
    }
    Ok((index, columns))
}

/// Load units for a group of ids, in order.
pub(crate) fn load_units(
    mgr: &ComponentManager,
    ids: &[EntityId],
) -> Result<Vec<ProcessingUnit>, ClauseError> {
    ids.iter().map(|&id| Ok(mgr.unit(id)?)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_walks_fresh_to_drained() {
        let mut clause = Clause::new(ClauseKind::Passthrough);
        assert_eq!(clause.state(), ClauseState::Fresh);

        // Processing before configuration is misuse.
        let err = clause.process(Vec::new()).expect_err("unconfigured");
        assert!(matches!(err, ClauseError::Misuse { .. }));

        clause
            .set_processing_config(&ProcessingConfig::default())
            .expect("config");
        assert_eq!(clause.state(), ClauseState::Fresh, "config alone is not enough");
        clause
            .set_component_manager(Arc::new(ComponentManager::new()))
            .expect("manager");
        assert_eq!(clause.state(), ClauseState::Configured);

        clause.process(Vec::new()).expect("first unit");
        assert_eq!(clause.state(), ClauseState::Executing);

        // Reconfiguring a running clause is misuse.
        let err = clause
            .set_processing_config(&ProcessingConfig::default())
            .expect_err("running");
        assert!(matches!(err, ClauseError::Misuse { .. }));

        clause.mark_drained();
        let err = clause.process(Vec::new()).expect_err("drained");
        assert!(matches!(
            err,
            ClauseError::Misuse {
                state: ClauseState::Drained,
                ..
            }
        ));
    }

    #[test]
    fn aggregation_refuses_to_open_a_pipeline() {
        let mut clause = Clause::new(ClauseKind::Aggregation(
            AggregationClause::new(
                "k",
                vec![crate::agg::NamedAggregator::new(
                    crate::agg::AggOp::Sum,
                    "v",
                    "v_sum",
                )],
            )
            .expect("clause"),
        ));
        clause
            .set_processing_config(&ProcessingConfig::default())
            .expect("config");
        clause
            .set_component_manager(Arc::new(ComponentManager::new()))
            .expect("manager");

        let err = clause
            .structure_initial(&mut Vec::new())
            .expect_err("not first");
        assert!(matches!(err, ClauseError::NotFirst { .. }));
    }

    #[test]
    fn row_slice_grouping_folds_column_tiles() {
        let entry = |rows: (u64, u64), col: (u64, u64)| RangesAndKey {
            row_range: RowRange {
                start: rows.0,
                end: rows.1,
            },
            col_range: crate::index::ColRange {
                start: col.0,
                end: col.1,
            },
            start_index: crate::keys::IndexValue::Ts(rows.0 as i64),
            end_index: crate::keys::IndexValue::Ts(rows.1 as i64 - 1),
            key: crate::keys::AtomKey {
                stream_id: crate::keys::StreamId::Num(1),
                key_type: crate::keys::KeyType::TableData,
                version_id: 1,
                creation_ts: 0,
                content_hash: rows.0 + col.0,
                start_index: None,
                end_index: None,
            },
        };
        let ranges = vec![
            entry((0, 10), (0, 2)),
            entry((10, 20), (0, 2)),
            entry((0, 10), (2, 4)),
        ];
        let groups = structure_by_row_slice(&ranges);
        assert_eq!(groups, vec![vec![0, 2], vec![1]]);
    }
}
