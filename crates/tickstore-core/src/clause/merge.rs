//! Stream combination: k-way merge, vertical concat, and column
//! departitioning.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::arena::EntityId;
use crate::clause::{
    concat_unit_columns, insert_unit, load_units, unit_columns, BadInputSnafu, ClauseCtx,
    ClauseError,
};
use crate::frame::{Column, FieldDef, Schema};
use crate::index::RowRange;

/// K-way merge of already-sorted inputs on the index column.
///
/// Monotone: the output index is non-decreasing; ties break by source
/// order (lower row-range start first).
#[derive(Debug, Default)]
pub struct MergeClause;

impl MergeClause {
    /// Build a merge clause.
    pub fn new() -> MergeClause {
        MergeClause
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        let mut units = load_units(ctx.mgr, &ids)?;
        units.sort_by_key(|u| u.row_range.start);
        if units.is_empty() {
            return Ok(Vec::new());
        }

        let mut sources = Vec::with_capacity(units.len());
        for unit in &units {
            sources.push(unit_columns(ctx.mgr, unit)?);
        }

        // Offsets of each source inside the concatenated buffers.
        let mut offsets = Vec::with_capacity(sources.len());
        let mut total = 0usize;
        for (index, _) in &sources {
            offsets.push(total);
            total += index.len();
        }

        // Cursor-based merge producing gather positions into the concat.
        let mut cursors = vec![0usize; sources.len()];
        let mut order = Vec::with_capacity(total);
        while order.len() < total {
            let mut best: Option<(usize, crate::frame::Scalar)> = None;
            for (src, (index, _)) in sources.iter().enumerate() {
                let cur = cursors[src];
                if cur >= index.len() {
                    continue;
                }
                let value = index.scalar_at(cur).unwrap_or(crate::frame::Scalar::Null);
                let better = match &best {
                    None => true,
                    Some((_, b)) => matches!(
                        value.partial_cmp_value(b),
                        Some(std::cmp::Ordering::Less)
                    ),
                };
                if better {
                    best = Some((src, value));
                }
            }
            let Some((src, _)) = best else { break };
            order.push(offsets[src] + cursors[src]);
            cursors[src] += 1;
        }

        let (index, columns) = concat_unit_columns(ctx.mgr, &units, ctx.cfg.dynamic_schema)?;
        let merged_columns = columns
            .into_iter()
            .map(|(name, col)| (name, col.take(&order)))
            .collect();
        let start = units.first().map(|u| u.row_range.start).unwrap_or(0);
        let result = insert_unit(
            ctx.mgr,
            RowRange {
                start,
                end: start + order.len() as u64,
            },
            index.take(&order),
            merged_columns,
            None,
        );
        for id in ids {
            ctx.mgr.release(id);
        }
        Ok(vec![result])
    }
}

/// Column-join mode for vertical concatenation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum JoinType {
    /// Keep only columns present in every input.
    Inner,
    /// Keep every column, materializing nulls where absent.
    Outer,
}

/// Vertical concatenation of independent inputs.
#[derive(Debug)]
pub struct ConcatClause {
    join: JoinType,
}

impl ConcatClause {
    /// Concatenate with the given column join.
    pub fn new(join: JoinType) -> ConcatClause {
        ConcatClause { join }
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        let mut units = load_units(ctx.mgr, &ids)?;
        units.sort_by_key(|u| u.row_range.start);
        if units.is_empty() {
            return Ok(Vec::new());
        }

        let units = match self.join {
            JoinType::Outer => units,
            JoinType::Inner => {
                // Restrict every unit to the shared column set.
                let mut shared: Vec<String> = units[0]
                    .columns
                    .iter()
                    .map(|(n, _)| n.clone())
                    .collect();
                for unit in &units[1..] {
                    shared.retain(|n| unit.columns.iter().any(|(m, _)| m == n));
                }
                let mut restricted = Vec::with_capacity(units.len());
                for unit in &units {
                    let mut narrowed = unit.clone();
                    narrowed.columns.retain(|(n, _)| shared.contains(n));
                    restricted.push(narrowed);
                }
                restricted
            }
        };

        let dynamic = matches!(self.join, JoinType::Outer) || ctx.cfg.dynamic_schema;
        let (index, columns) = concat_unit_columns(ctx.mgr, &units, dynamic)?;
        let start = units.first().map(|u| u.row_range.start).unwrap_or(0);
        let rows = index.len() as u64;
        let result = insert_unit(
            ctx.mgr,
            RowRange {
                start,
                end: start + rows,
            },
            index,
            columns,
            None,
        );
        for id in ids {
            ctx.mgr.release(id);
        }
        Ok(vec![result])
    }

    pub(crate) fn join_schemas(&self, schemas: Vec<Schema>) -> Result<Schema, ClauseError> {
        let first = schemas.first().cloned().ok_or_else(|| ClauseError::BadInput {
            clause: "Concat",
            detail: "no schemas to join".to_string(),
        })?;
        let fields: Vec<FieldDef> = match self.join {
            JoinType::Inner => first
                .fields()
                .iter()
                .filter(|f| {
                    schemas[1..]
                        .iter()
                        .all(|s| s.field(&f.name).is_some())
                })
                .cloned()
                .collect(),
            JoinType::Outer => {
                let mut out: Vec<FieldDef> = first.fields().to_vec();
                for schema in &schemas[1..] {
                    for f in schema.fields() {
                        if !out.iter().any(|g| g.name == f.name) {
                            out.push(f.clone());
                        }
                    }
                }
                out
            }
        };
        Schema::new(first.index().clone(), fields).map_err(|e| ClauseError::BadInput {
            clause: "Concat",
            detail: e.to_string(),
        })
    }
}

/// Reverses a column-dimension partition: units covering the same row
/// range fold into one unit carrying all their columns.
#[derive(Debug, Default)]
pub struct RemoveColumnPartitioningClause;

impl RemoveColumnPartitioningClause {
    /// Build the clause.
    pub fn new() -> RemoveColumnPartitioningClause {
        RemoveColumnPartitioningClause
    }

    pub(crate) fn structure(
        &self,
        ctx: &ClauseCtx<'_>,
        groups: Vec<Vec<EntityId>>,
    ) -> Result<Vec<Vec<EntityId>>, ClauseError> {
        let mut by_rows: Vec<(RowRange, Vec<EntityId>)> = Vec::new();
        for id in groups.into_iter().flatten() {
            let unit = ctx.mgr.unit(id)?;
            match by_rows.iter_mut().find(|(r, _)| *r == unit.row_range) {
                Some((_, members)) => members.push(id),
                None => by_rows.push((unit.row_range, vec![id])),
            }
        }
        by_rows.sort_by_key(|(r, _)| r.start);
        Ok(by_rows.into_iter().map(|(_, members)| members).collect())
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        let units = load_units(ctx.mgr, &ids)?;
        let Some(first) = units.first() else {
            return Ok(Vec::new());
        };
        ensure!(
            units.iter().all(|u| u.row_range == first.row_range),
            BadInputSnafu {
                clause: "RemoveColumnPartitioning",
                detail: "units cover different row ranges".to_string(),
            }
        );

        let index = ctx.mgr.column_data(first.index)?;
        let mut columns: Vec<(String, Column)> = Vec::new();
        let mut seen: HashMap<String, ()> = HashMap::new();
        for unit in &units {
            let (_, cols) = unit_columns(ctx.mgr, unit)?;
            for (name, col) in cols {
                if seen.insert(name.clone(), ()).is_none() {
                    columns.push((name, col));
                }
            }
        }
        let result = insert_unit(ctx.mgr, first.row_range, index, columns, first.bucket);
        for id in ids {
            ctx.mgr.release(id);
        }
        Ok(vec![result])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ComponentManager;
    use crate::clause::{Clause, ClauseKind, ProcessingConfig};
    use crate::frame::{DType, Scalar};
    use std::sync::Arc;

    fn configured(kind: ClauseKind, mgr: &Arc<ComponentManager>) -> Clause {
        let mut c = Clause::new(kind);
        c.set_processing_config(&ProcessingConfig::default())
            .expect("config");
        c.set_component_manager(Arc::clone(mgr)).expect("mgr");
        c
    }

    fn unit(
        mgr: &Arc<ComponentManager>,
        start: u64,
        ts: Vec<i64>,
        columns: Vec<(&str, Vec<i64>)>,
    ) -> EntityId {
        crate::clause::insert_unit(
            mgr,
            RowRange {
                start,
                end: start + ts.len() as u64,
            },
            Column::from_i64(DType::Timestamp, ts),
            columns
                .into_iter()
                .map(|(n, v)| (n.to_string(), Column::from_i64(DType::Int64, v)))
                .collect(),
            None,
        )
    }

    #[test]
    fn merge_interleaves_sorted_streams_with_stable_ties() {
        let mgr = Arc::new(ComponentManager::new());
        let a = unit(&mgr, 0, vec![1, 3, 5], vec![("x", vec![10, 30, 50])]);
        let b = unit(&mgr, 10, vec![2, 3, 6], vec![("x", vec![20, 31, 60])]);

        let clause = configured(ClauseKind::Merge(MergeClause::new()), &mgr);
        let groups = clause
            .structure_for_processing(vec![vec![a], vec![b]])
            .expect("structure");
        let out = clause
            .process(groups.into_iter().next().expect("group"))
            .expect("process");
        let result = mgr.unit(out[0]).expect("unit");
        let (index, columns) = unit_columns(&mgr, &result).expect("cols");

        assert_eq!(index.i64_values(), Some(&[1i64, 2, 3, 3, 5, 6][..]));
        // Tie at ts=3 resolves source-order: a's 30 before b's 31.
        assert_eq!(
            columns[0].1.i64_values(),
            Some(&[10i64, 20, 30, 31, 50, 60][..])
        );
    }

    #[test]
    fn concat_outer_materializes_missing_columns_as_null() {
        let mgr = Arc::new(ComponentManager::new());
        let a = unit(&mgr, 0, vec![1, 2], vec![("x", vec![1, 2])]);
        let b = unit(
            &mgr,
            10,
            vec![3, 4],
            vec![("x", vec![3, 4]), ("y", vec![30, 40])],
        );

        let clause = configured(
            ClauseKind::Concat(ConcatClause::new(JoinType::Outer)),
            &mgr,
        );
        let groups = clause
            .structure_for_processing(vec![vec![a], vec![b]])
            .expect("structure");
        let out = clause
            .process(groups.into_iter().next().expect("group"))
            .expect("process");
        let result = mgr.unit(out[0]).expect("unit");
        let (index, columns) = unit_columns(&mgr, &result).expect("cols");

        assert_eq!(index.len(), 4);
        let y = columns.iter().find(|(n, _)| n == "y").expect("y column");
        assert_eq!(y.1.scalar_at(0), Some(Scalar::Null));
        assert_eq!(y.1.scalar_at(2), Some(Scalar::F64(30.0)));
    }

    #[test]
    fn concat_inner_keeps_shared_columns_only() {
        let mgr = Arc::new(ComponentManager::new());
        let a = unit(&mgr, 0, vec![1], vec![("x", vec![1]), ("only_a", vec![9])]);
        let b = unit(&mgr, 10, vec![2], vec![("x", vec![2])]);

        let clause = configured(
            ClauseKind::Concat(ConcatClause::new(JoinType::Inner)),
            &mgr,
        );
        let groups = clause
            .structure_for_processing(vec![vec![a], vec![b]])
            .expect("structure");
        let out = clause
            .process(groups.into_iter().next().expect("group"))
            .expect("process");
        let result = mgr.unit(out[0]).expect("unit");
        let (_, columns) = unit_columns(&mgr, &result).expect("cols");
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].0, "x");
    }

    #[test]
    fn join_schemas_inner_and_outer() {
        let s1 = Schema::new(
            FieldDef::new("ts", DType::Timestamp),
            vec![
                FieldDef::new("x", DType::Int64),
                FieldDef::new("a", DType::Float64),
            ],
        )
        .expect("schema");
        let s2 = Schema::new(
            FieldDef::new("ts", DType::Timestamp),
            vec![
                FieldDef::new("x", DType::Int64),
                FieldDef::new("b", DType::Utf8),
            ],
        )
        .expect("schema");

        let inner = ConcatClause::new(JoinType::Inner)
            .join_schemas(vec![s1.clone(), s2.clone()])
            .expect("inner");
        assert_eq!(
            inner.fields().iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            vec!["x"]
        );

        let outer = ConcatClause::new(JoinType::Outer)
            .join_schemas(vec![s1, s2])
            .expect("outer");
        assert_eq!(
            outer.fields().iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            vec!["x", "a", "b"]
        );
    }

    #[test]
    fn remove_column_partitioning_folds_same_row_range() {
        let mgr = Arc::new(ComponentManager::new());
        let left = unit(&mgr, 0, vec![1, 2], vec![("x", vec![1, 2])]);
        let right = unit(&mgr, 0, vec![1, 2], vec![("y", vec![10, 20])]);

        let clause = configured(
            ClauseKind::RemoveColumnPartitioning(RemoveColumnPartitioningClause::new()),
            &mgr,
        );
        let groups = clause
            .structure_for_processing(vec![vec![left], vec![right]])
            .expect("structure");
        assert_eq!(groups.len(), 1);
        let out = clause
            .process(groups.into_iter().next().expect("group"))
            .expect("process");
        let result = mgr.unit(out[0]).expect("unit");
        let (_, columns) = unit_columns(&mgr, &result).expect("cols");
        assert_eq!(columns.len(), 2);
    }
}
