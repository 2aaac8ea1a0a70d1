//! Row re-ordering (Sort) and re-slicing (Split).

use crate::arena::EntityId;
use crate::clause::{
    concat_unit_columns, insert_unit, load_units, ClauseCtx, ClauseError,
};
use crate::index::RowRange;

/// Stable re-ordering of the whole input by one key column.
///
/// Null keys sort last, preserving their relative order.
#[derive(Debug)]
pub struct SortClause {
    column: String,
}

impl SortClause {
    /// Sort by `column`. The index column's own name is accepted.
    pub fn new(column: impl Into<String>) -> SortClause {
        SortClause {
            column: column.into(),
        }
    }

    /// The sort key column.
    pub fn column(&self) -> &str {
        &self.column
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
        let (index, columns) = concat_unit_columns(ctx.mgr, &units, ctx.cfg.dynamic_schema)?;

        let key = if self.column == "<index>" {
            index.clone()
        } else {
            columns
                .iter()
                .find(|(n, _)| n == &self.column)
                .map(|(_, c)| c.clone())
                .unwrap_or_else(|| index.clone())
        };

        let mut order: Vec<usize> = (0..key.len()).collect();
        order.sort_by(|&a, &b| {
            match (key.scalar_at(a), key.scalar_at(b)) {
                (Some(x), Some(y)) => match (&x, &y) {
                    (crate::frame::Scalar::Null, crate::frame::Scalar::Null) => {
                        std::cmp::Ordering::Equal
                    }
                    (crate::frame::Scalar::Null, _) => std::cmp::Ordering::Greater,
                    (_, crate::frame::Scalar::Null) => std::cmp::Ordering::Less,
                    _ => x.partial_cmp_value(&y).unwrap_or(std::cmp::Ordering::Equal),
                },
                _ => std::cmp::Ordering::Equal,
            }
        });

        let sorted_columns = columns
            .into_iter()
            .map(|(name, col)| (name, col.take(&order)))
            .collect();
        let start = units.first().map(|u| u.row_range.start).unwrap_or(0);
        let result = insert_unit(
            ctx.mgr,
            RowRange {
                start,
                end: start + key.len() as u64,
            },
            index.take(&order),
            sorted_columns,
            None,
        );
        for id in ids {
            ctx.mgr.release(id);
        }
        Ok(vec![result])
    }
}

/// Re-slices every unit to a fixed row count.
#[derive(Debug)]
pub struct SplitClause {
    rows: u64,
}

impl SplitClause {
    /// Emit units of at most `rows` rows.
    pub fn new(rows: u64) -> SplitClause {
        SplitClause { rows: rows.max(1) }
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        let mut out = Vec::new();
        for id in ids {
            let unit = ctx.mgr.unit(id)?;
            let (index, columns) = crate::clause::unit_columns(ctx.mgr, &unit)?;
            let rows = index.len();
            if rows as u64 <= self.rows {
                out.push(id);
                continue;
            }
            let mut start = 0usize;
            while start < rows {
                let end = (start + self.rows as usize).min(rows);
                let sliced = columns
                    .iter()
                    .map(|(name, col)| (name.clone(), col.slice(start, end)))
                    .collect();
                out.push(insert_unit(
                    ctx.mgr,
                    RowRange {
                        start: unit.row_range.start + start as u64,
                        end: unit.row_range.start + end as u64,
                    },
                    index.slice(start, end),
                    sliced,
                    unit.bucket,
                ));
                start = end;
            }
            ctx.mgr.release(id);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ComponentManager;
    use crate::clause::{unit_columns, Clause, ClauseKind, ProcessingConfig};
    use crate::frame::{Column, DType};
    use std::sync::Arc;

    fn configured(kind: ClauseKind, mgr: &Arc<ComponentManager>) -> Clause {
        let mut c = Clause::new(kind);
        c.set_processing_config(&ProcessingConfig::default())
            .expect("config");
        c.set_component_manager(Arc::clone(mgr)).expect("mgr");
        c
    }

    #[test]
    fn sort_is_stable_with_nulls_last() {
        let mgr = Arc::new(ComponentManager::new());
        let present: roaring::RoaringBitmap = [0u32, 1, 3].into_iter().collect();
        let unit = crate::clause::insert_unit(
            &mgr,
            RowRange { start: 0, end: 4 },
            Column::from_i64(DType::Timestamp, vec![0, 1, 2, 3]),
            vec![
                (
                    "k".to_string(),
                    Column::from_i64(DType::Int64, vec![2, 1, 0, 1]).with_present(present),
                ),
                (
                    "tag".to_string(),
                    Column::from_utf8(
                        ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
                    ),
                ),
            ],
            None,
        );

        let clause = configured(ClauseKind::Sort(SortClause::new("k")), &mgr);
        let groups = clause
            .structure_for_processing(vec![vec![unit]])
            .expect("structure");
        let out = clause
            .process(groups.into_iter().next().expect("group"))
            .expect("process");
        let result = mgr.unit(out[0]).expect("unit");
        let (_, columns) = unit_columns(&mgr, &result).expect("cols");

        // 1(b) before 1(d) (stability), null(c) last.
        let tags: Vec<String> = (0..4)
            .filter_map(|i| match columns[1].1.scalar_at(i) {
                Some(crate::frame::Scalar::Utf8(s)) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(tags, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn split_emits_fixed_row_units() {
        let mgr = Arc::new(ComponentManager::new());
        let unit = crate::clause::insert_unit(
            &mgr,
            RowRange { start: 10, end: 17 },
            Column::from_i64(DType::Timestamp, (0..7).collect()),
            vec![(
                "x".to_string(),
                Column::from_i64(DType::Int64, (0..7).collect()),
            )],
            None,
        );

        let clause = configured(ClauseKind::Split(SplitClause::new(3)), &mgr);
        let out = clause.process(vec![unit]).expect("process");
        assert_eq!(out.len(), 3);

        let sizes: Vec<u64> = out
            .iter()
            .map(|id| mgr.unit(*id).expect("unit").row_range.len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        let first = mgr.unit(out[0]).expect("unit");
        assert_eq!(first.row_range, RowRange { start: 10, end: 13 });
    }
}
