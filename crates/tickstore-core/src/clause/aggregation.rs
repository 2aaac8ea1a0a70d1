//! Per-bucket reductions after hash partitioning.

use std::collections::HashMap;

use snafu::prelude::*;

use crate::agg::{column_from_scalars, reduce, NamedAggregator};
use crate::arena::EntityId;
use crate::clause::{
    insert_unit, load_units, unit_columns, BadInputSnafu, ClauseCtx, ClauseError,
};
use crate::frame::{Column, FieldDef, Scalar, Schema};
use crate::index::RowRange;

/// Reduces each group-key value to one output row.
///
/// Runs after [`PartitionClause`](crate::clause::PartitionClause): the
/// structure pass regroups flattened units by bucket tag, then each bucket
/// reduces its keys exactly. Output rows are sorted by key within a
/// bucket; buckets emit in bucket order.
#[derive(Debug)]
pub struct AggregationClause {
    grouping_column: String,
    aggregators: Vec<NamedAggregator>,
}

impl AggregationClause {
    /// Aggregate on `grouping_column` with the named reductions.
    pub fn new(
        grouping_column: impl Into<String>,
        aggregators: Vec<NamedAggregator>,
    ) -> Result<AggregationClause, ClauseError> {
        ensure!(
            !aggregators.is_empty(),
            BadInputSnafu {
                clause: "Aggregation",
                detail: "no aggregators given".to_string(),
            }
        );
        Ok(AggregationClause {
            grouping_column: grouping_column.into(),
            aggregators,
        })
    }

    /// Columns this clause reads.
    pub fn input_columns(&self) -> Vec<String> {
        let mut out = vec![self.grouping_column.clone()];
        for a in &self.aggregators {
            if !out.contains(&a.input) {
                out.push(a.input.clone());
            }
        }
        out
    }

    pub(crate) fn structure(
        &self,
        ctx: &ClauseCtx<'_>,
        groups: Vec<Vec<EntityId>>,
    ) -> Result<Vec<Vec<EntityId>>, ClauseError> {
        let mut by_bucket: HashMap<u64, Vec<EntityId>> = HashMap::new();
        for id in groups.into_iter().flatten() {
            let unit = ctx.mgr.unit(id)?;
            by_bucket.entry(unit.bucket.unwrap_or(0)).or_default().push(id);
        }
        let mut buckets: Vec<(u64, Vec<EntityId>)> = by_bucket.into_iter().collect();
        buckets.sort_by_key(|(bucket, _)| *bucket);
        Ok(buckets.into_iter().map(|(_, ids)| ids).collect())
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        let units = load_units(ctx.mgr, &ids)?;
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let bucket = units[0].bucket;

        // Exact grouping within the bucket: key -> per-unit row lists.
        let mut key_order: Vec<Scalar> = Vec::new();
        let mut rows_by_key: HashMap<KeyToken, Vec<(usize, usize)>> = HashMap::new();
        let mut materialized = Vec::with_capacity(units.len());
        for (unit_idx, unit) in units.iter().enumerate() {
            let (_, columns) = unit_columns(ctx.mgr, unit)?;
            let key_col = columns
                .iter()
                .find(|(n, _)| n == &self.grouping_column)
                .map(|(_, c)| c.clone())
                .ok_or_else(|| ClauseError::BadInput {
                    clause: "Aggregation",
                    detail: format!("grouping column {} absent", self.grouping_column),
                })?;
            for row in 0..key_col.len() {
                let value = match key_col.scalar_at(row) {
                    Some(Scalar::Null) | None => continue,
                    Some(v) => v,
                };
                let token = KeyToken::from_scalar(&value);
                let entry = rows_by_key.entry(token).or_insert_with(|| {
                    key_order.push(value);
                    Vec::new()
                });
                entry.push((unit_idx, row));
            }
            materialized.push(columns);
        }

        // Deterministic output: sort keys.
        let mut keys = key_order;
        keys.sort_by(|a, b| {
            a.partial_cmp_value(b).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut out_columns: Vec<(String, Vec<Scalar>)> = self
            .aggregators
            .iter()
            .map(|a| (a.output.clone(), Vec::with_capacity(keys.len())))
            .collect();
        for key in &keys {
            let token = KeyToken::from_scalar(key);
            let rows = rows_by_key.get(&token).map(Vec::as_slice).unwrap_or(&[]);
            for (slot, agg) in self.aggregators.iter().enumerate() {
                let value = reduce_over_units(agg, &materialized, rows)?;
                out_columns[slot].1.push(value);
            }
        }

        let key_column = column_from_scalars(
            materialized
                .iter()
                .flat_map(|cols| cols.iter())
                .find(|(n, _)| n == &self.grouping_column)
                .map(|(_, c)| c.dtype())
                .unwrap_or(crate::frame::DType::Int64),
            &keys,
        );
        let rows = keys.len() as u64;
        let columns = out_columns
            .into_iter()
            .zip(&self.aggregators)
            .map(|((name, values), agg)| {
                let input_dtype = materialized
                    .iter()
                    .flat_map(|cols| cols.iter())
                    .find(|(n, _)| n == &agg.input)
                    .map(|(_, c)| c.dtype())
                    .unwrap_or(crate::frame::DType::Float64);
                (name, column_from_scalars(agg.op.output_dtype(input_dtype), &values))
            })
            .collect();

        let result = insert_unit(
            ctx.mgr,
            RowRange {
                start: 0,
                end: rows,
            },
            key_column,
            columns,
            bucket,
        );
        for id in ids {
            ctx.mgr.release(id);
        }
        Ok(vec![result])
    }

    pub(crate) fn modify_schema(&self, schema: Schema) -> Result<Schema, ClauseError> {
        let key_def = schema
            .field(&self.grouping_column)
            .cloned()
            .ok_or_else(|| ClauseError::BadInput {
                clause: "Aggregation",
                detail: format!("grouping column {} not in schema", self.grouping_column),
            })?;
        let mut fields = Vec::with_capacity(self.aggregators.len());
        for a in &self.aggregators {
            let input = schema
                .field(&a.input)
                .ok_or_else(|| ClauseError::BadInput {
                    clause: "Aggregation",
                    detail: format!("aggregated column {} not in schema", a.input),
                })?;
            fields.push(FieldDef::new(a.output.clone(), a.op.output_dtype(input.dtype)));
        }
        Schema::new(key_def, fields).map_err(|e| ClauseError::BadInput {
            clause: "Aggregation",
            detail: e.to_string(),
        })
    }
}

/// Reduce one aggregator over rows scattered across units.
fn reduce_over_units(
    agg: &NamedAggregator,
    materialized: &[Vec<(String, Column)>],
    rows: &[(usize, usize)],
) -> Result<Scalar, ClauseError> {
    use crate::agg::AggOp;

    let unit_rows = |unit_idx: usize| {
        rows.iter()
            .filter(move |(u, _)| *u == unit_idx)
            .map(|(_, r)| *r)
    };
    let column_of = |unit_idx: usize| {
        materialized[unit_idx]
            .iter()
            .find(|(n, _)| n == &agg.input)
            .map(|(_, c)| c)
    };

    // Mean merges exactly through (sum, count) partials; every other
    // operator merges through its own partial results.
    if agg.op == AggOp::Mean {
        let mut total = 0.0f64;
        let mut n = 0u64;
        for unit_idx in 0..materialized.len() {
            let Some(col) = column_of(unit_idx) else { continue };
            if let Some(s) = reduce(AggOp::Sum, col, unit_rows(unit_idx)).as_f64() {
                total += s;
            }
            if let Scalar::U64(c) = reduce(AggOp::Count, col, unit_rows(unit_idx)) {
                n += c;
            }
        }
        return Ok(if n == 0 {
            Scalar::Null
        } else {
            Scalar::F64(total / n as f64)
        });
    }

    let mut partials: Vec<Scalar> = Vec::new();
    for unit_idx in 0..materialized.len() {
        let Some(col) = column_of(unit_idx) else { continue };
        if unit_rows(unit_idx).next().is_none() {
            continue;
        }
        partials.push(reduce(agg.op, col, unit_rows(unit_idx)));
    }
    Ok(merge_partials(agg.op, partials))
}

fn merge_partials(op: crate::agg::AggOp, partials: Vec<Scalar>) -> Scalar {
    use crate::agg::AggOp;
    if partials.is_empty() {
        return match op {
            AggOp::Count => Scalar::U64(0),
            _ => Scalar::Null,
        };
    }
    match op {
        AggOp::First => partials.into_iter().next().unwrap_or(Scalar::Null),
        AggOp::Last => partials.into_iter().last().unwrap_or(Scalar::Null),
        AggOp::Count => Scalar::U64(
            partials
                .iter()
                .filter_map(|p| match p {
                    Scalar::U64(n) => Some(*n),
                    _ => None,
                })
                .sum(),
        ),
        AggOp::Sum => {
            if partials.iter().all(|p| p.as_i64().is_some()) {
                Scalar::I64(
                    partials
                        .iter()
                        .filter_map(|p| p.as_i64())
                        .fold(0i64, i64::wrapping_add),
                )
            } else {
                Scalar::F64(partials.iter().filter_map(|p| p.as_f64()).sum())
            }
        }
        AggOp::Mean => {
            // Unreachable: means merge through (sum, count) above.
            Scalar::Null
        }
        AggOp::Min | AggOp::Max => {
            let mut best: Option<Scalar> = None;
            for p in partials {
                if matches!(p, Scalar::Null) {
                    continue;
                }
                let replace = match &best {
                    None => true,
                    Some(b) => {
                        let ord = p.partial_cmp_value(b);
                        matches!(
                            (op, ord),
                            (AggOp::Min, Some(std::cmp::Ordering::Less))
                                | (AggOp::Max, Some(std::cmp::Ordering::Greater))
                        )
                    }
                };
                if replace {
                    best = Some(p);
                }
            }
            best.unwrap_or(Scalar::Null)
        }
    }
}

/// Hashable identity of a group-key value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum KeyToken {
    I(i64),
    U(u64),
    F(u64),
    B(bool),
    S(String),
}

impl KeyToken {
    fn from_scalar(s: &Scalar) -> KeyToken {
        match s {
            Scalar::I64(v) => KeyToken::I(*v),
            Scalar::U64(v) => KeyToken::U(*v),
            Scalar::F64(v) => KeyToken::F(v.to_bits()),
            Scalar::Bool(v) => KeyToken::B(*v),
            Scalar::Utf8(v) => KeyToken::S(v.clone()),
            Scalar::Null => KeyToken::U(u64::MAX),
        }
    }
}
