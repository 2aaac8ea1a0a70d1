//! Time-bucketed reductions.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::agg::{column_from_scalars, reduce, NamedAggregator};
use crate::arena::EntityId;
use crate::clause::{
    concat_unit_columns, insert_unit, load_units, structure_by_row_slice, BadInputSnafu,
    ClauseCtx, ClauseError, ProcessingConfig,
};
use crate::frame::{Column, DType, FieldDef, Schema};
use crate::index::{RangesAndKey, RowRange};
use crate::keys::IndexValue;

/// Which side of a bucket is closed (owns its boundary value).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResampleBoundary {
    /// Buckets are `[b, b+d)`.
    #[default]
    Left,
    /// Buckets are `(b, b+d]`.
    Right,
}

/// Where the bucket grid is anchored.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResampleOrigin {
    /// Grid aligned to the Unix epoch.
    #[default]
    Epoch,
    /// Grid aligned to the data's first timestamp.
    Start,
    /// Grid aligned to the data's last timestamp.
    End,
    /// Grid aligned to an explicit timestamp (nanoseconds).
    Timestamp(i64),
}

/// Fixed bucket width: a count of calendar-regular units.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResampleRule {
    /// Unit multiplier.
    pub count: u64,
    /// Bucket width of one unit, nanoseconds.
    pub unit_nanos: i64,
}

impl ResampleRule {
    /// Parse rules like `"1D"`, `"4h"`, `"15min"`, `"30s"`.
    pub fn parse(rule: &str) -> Result<ResampleRule, ClauseError> {
        let split = rule
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| bad_rule(rule))?;
        let (count_str, unit) = rule.split_at(split);
        let count: u64 = if count_str.is_empty() {
            1
        } else {
            count_str.parse().map_err(|_| bad_rule(rule))?
        };
        ensure!(count > 0, BadInputSnafu {
            clause: "Resample",
            detail: format!("zero-width rule {rule:?}"),
        });
        let unit_nanos: i64 = match unit {
            "s" | "S" => 1_000_000_000,
            "min" | "T" | "m" => 60 * 1_000_000_000,
            "h" | "H" => 3_600 * 1_000_000_000,
            "d" | "D" => 86_400 * 1_000_000_000,
            _ => return Err(bad_rule(rule)),
        };
        Ok(ResampleRule { count, unit_nanos })
    }

    /// Total bucket width in nanoseconds.
    pub fn nanos(&self) -> i64 {
        self.unit_nanos.saturating_mul(self.count as i64)
    }
}

fn bad_rule(rule: &str) -> ClauseError {
    ClauseError::BadInput {
        clause: "Resample",
        detail: format!("unparseable rule {rule:?}"),
    }
}

/// Reduces rows into fixed time buckets over `[start, end]`.
///
/// Bucket ownership across slices: the structure passes merge row slices
/// that share a bucket, so at most one processing unit spans any bucket
/// boundary and the unit covering the bucket's start owns it. Aggregators
/// run over sorted input with the engine-wide null policy.
#[derive(Debug)]
pub struct ResampleClause {
    rule: ResampleRule,
    closed: ResampleBoundary,
    label: ResampleBoundary,
    offset: i64,
    origin: ResampleOrigin,
    aggregators: Vec<NamedAggregator>,
    boundaries: Vec<i64>,
}

impl ResampleClause {
    /// Build a resample clause; boundaries materialize when the pipeline
    /// config (with the source index range) arrives.
    pub fn new(
        rule: ResampleRule,
        closed: ResampleBoundary,
        label: ResampleBoundary,
        offset: i64,
        origin: ResampleOrigin,
        aggregators: Vec<NamedAggregator>,
    ) -> Result<ResampleClause, ClauseError> {
        ensure!(
            !aggregators.is_empty(),
            BadInputSnafu {
                clause: "Resample",
                detail: "no aggregators given".to_string(),
            }
        );
        Ok(ResampleClause {
            rule,
            closed,
            label,
            offset,
            origin,
            aggregators,
            boundaries: Vec::new(),
        })
    }

    /// Columns this clause reads.
    pub fn input_columns(&self) -> Vec<String> {
        let mut out = Vec::new();
        for a in &self.aggregators {
            if !out.contains(&a.input) {
                out.push(a.input.clone());
            }
        }
        out
    }

    /// Bucket boundaries (test observability).
    pub fn boundaries(&self) -> &[i64] {
        &self.boundaries
    }

    pub(crate) fn apply_config(&mut self, cfg: &ProcessingConfig) -> Result<(), ClauseError> {
        if let Some((start, end)) = cfg.index_range {
            self.boundaries = self.generate_boundaries(start, end);
        }
        Ok(())
    }

    /// Grid covering `[start, end]`: at least two boundaries, spaced one
    /// rule width apart, anchored at the origin.
    fn generate_boundaries(&self, start: i64, end: i64) -> Vec<i64> {
        let d = self.rule.nanos().max(1);
        let anchor = match self.origin {
            ResampleOrigin::Epoch => self.offset,
            ResampleOrigin::Start => start + self.offset,
            ResampleOrigin::End => end + self.offset,
            ResampleOrigin::Timestamp(t) => t + self.offset,
        };
        let mut first = anchor + (start - anchor).div_euclid(d) * d;
        if self.closed == ResampleBoundary::Right && first == start {
            // `start` belongs to the bucket *ending* at `first`.
            first -= d;
        }
        let mut boundaries = vec![first];
        loop {
            let last = *boundaries.last().unwrap_or(&first);
            let done = match self.closed {
                ResampleBoundary::Left => last > end,
                ResampleBoundary::Right => last >= end,
            };
            if done && boundaries.len() >= 2 {
                break;
            }
            boundaries.push(last + d);
        }
        boundaries
    }

    /// Bucket index of a timestamp, or `None` outside the grid.
    fn bucket_of(&self, ts: i64) -> Option<usize> {
        let b0 = *self.boundaries.first()?;
        let d = self.rule.nanos().max(1);
        let idx = match self.closed {
            ResampleBoundary::Left => (ts - b0).div_euclid(d),
            ResampleBoundary::Right => (ts - b0 - 1).div_euclid(d),
        };
        if idx < 0 {
            return None;
        }
        let idx = idx as usize;
        (idx + 1 < self.boundaries.len()).then_some(idx)
    }

    pub(crate) fn structure_initial(&self, ranges: &mut Vec<RangesAndKey>) -> Vec<Vec<usize>> {
        let base = structure_by_row_slice(ranges);
        let bounds: Vec<Option<(i64, i64)>> = base
            .iter()
            .map(|members| {
                let lo = members
                    .iter()
                    .filter_map(|&i| match &ranges[i].start_index {
                        IndexValue::Ts(t) => Some(*t),
                        IndexValue::Str(_) => None,
                    })
                    .min()?;
                let hi = members
                    .iter()
                    .filter_map(|&i| match &ranges[i].end_index {
                        IndexValue::Ts(t) => Some(*t),
                        IndexValue::Str(_) => None,
                    })
                    .max()?;
                Some((lo, hi))
            })
            .collect();
        merge_bucket_sharing_groups(base, &bounds, |ts| self.bucket_of(ts))
    }

    pub(crate) fn structure(
        &self,
        ctx: &ClauseCtx<'_>,
        groups: Vec<Vec<EntityId>>,
    ) -> Result<Vec<Vec<EntityId>>, ClauseError> {
        let mut bounds = Vec::with_capacity(groups.len());
        for group in &groups {
            let units = load_units(ctx.mgr, group)?;
            let mut lo: Option<i64> = None;
            let mut hi: Option<i64> = None;
            for unit in &units {
                let index = ctx.mgr.column_data(unit.index)?;
                for probe in [0, index.len().saturating_sub(1)] {
                    if let Some(t) = index.scalar_at(probe).and_then(|s| s.as_i64()) {
                        lo = Some(lo.map_or(t, |v: i64| v.min(t)));
                        hi = Some(hi.map_or(t, |v: i64| v.max(t)));
                    }
                }
            }
            bounds.push(lo.zip(hi));
        }
        Ok(merge_bucket_sharing_groups(groups, &bounds, |ts| {
            self.bucket_of(ts)
        }))
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        let mut units = load_units(ctx.mgr, &ids)?;
        units.sort_by_key(|u| u.row_range.start);
        if units.is_empty() || self.boundaries.len() < 2 {
            for id in ids {
                ctx.mgr.release(id);
            }
            return Ok(Vec::new());
        }
        let (index, columns) = concat_unit_columns(ctx.mgr, &units, ctx.cfg.dynamic_schema)?;

        // Rows per bucket, in sorted index order.
        let mut bucket_rows: Vec<(usize, Vec<usize>)> = Vec::new();
        for row in 0..index.len() {
            let Some(ts) = index.scalar_at(row).and_then(|s| s.as_i64()) else {
                continue;
            };
            let Some(bucket) = self.bucket_of(ts) else {
                continue;
            };
            match bucket_rows.last_mut() {
                Some((b, rows)) if *b == bucket => rows.push(row),
                _ => bucket_rows.push((bucket, vec![row])),
            }
        }

        let labels: Vec<crate::frame::Scalar> = bucket_rows
            .iter()
            .map(|(b, _)| {
                let edge = match self.label {
                    ResampleBoundary::Left => self.boundaries[*b],
                    ResampleBoundary::Right => self.boundaries[*b + 1],
                };
                crate::frame::Scalar::I64(edge)
            })
            .collect();
        let label_column = column_from_scalars(DType::Timestamp, &labels);

        let mut out_columns: Vec<(String, Column)> = Vec::with_capacity(self.aggregators.len());
        for agg in &self.aggregators {
            let input = columns
                .iter()
                .find(|(n, _)| n == &agg.input)
                .map(|(_, c)| c)
                .ok_or_else(|| ClauseError::BadInput {
                    clause: "Resample",
                    detail: format!("aggregated column {} absent", agg.input),
                })?;
            let values: Vec<crate::frame::Scalar> = bucket_rows
                .iter()
                .map(|(_, rows)| reduce(agg.op, input, rows.iter().copied()))
                .collect();
            out_columns.push((
                agg.output.clone(),
                column_from_scalars(agg.op.output_dtype(input.dtype()), &values),
            ));
        }

        let first_row = units.first().map(|u| u.row_range.start).unwrap_or(0);
        let result = insert_unit(
            ctx.mgr,
            RowRange {
                start: first_row,
                end: first_row + bucket_rows.len() as u64,
            },
            label_column,
            out_columns,
            None,
        );
        for id in ids {
            ctx.mgr.release(id);
        }
        Ok(vec![result])
    }

    pub(crate) fn modify_schema(&self, schema: Schema) -> Result<Schema, ClauseError> {
        let index = FieldDef::new(schema.index().name.clone(), DType::Timestamp);
        let mut fields = Vec::with_capacity(self.aggregators.len());
        for a in &self.aggregators {
            let input = schema
                .field(&a.input)
                .ok_or_else(|| ClauseError::BadInput {
                    clause: "Resample",
                    detail: format!("aggregated column {} not in schema", a.input),
                })?;
            fields.push(FieldDef::new(a.output.clone(), a.op.output_dtype(input.dtype)));
        }
        Schema::new(index, fields).map_err(|e| ClauseError::BadInput {
            clause: "Resample",
            detail: e.to_string(),
        })
    }
}

/// Merge adjacent groups whose index spans land in the same bucket, so no
/// bucket straddles a group boundary.
fn merge_bucket_sharing_groups<T>(
    groups: Vec<Vec<T>>,
    bounds: &[Option<(i64, i64)>],
    bucket_of: impl Fn(i64) -> Option<usize>,
) -> Vec<Vec<T>> {
    let mut merged: Vec<Vec<T>> = Vec::with_capacity(groups.len());
    let mut last_hi_bucket: Option<usize> = None;
    for (group, bound) in groups.into_iter().zip(bounds) {
        let (lo, hi) = match bound {
            Some(b) => *b,
            None => {
                merged.push(group);
                last_hi_bucket = None;
                continue;
            }
        };
        let shares = matches!(
            (last_hi_bucket, bucket_of(lo)),
            (Some(prev), Some(cur)) if prev == cur
        );
        if shares {
            if let Some(tail) = merged.last_mut() {
                tail.extend(group);
            }
        } else {
            merged.push(group);
        }
        last_hi_bucket = bucket_of(hi);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agg::AggOp;
    use crate::arena::ComponentManager;
    use crate::clause::{unit_columns, Clause, ClauseKind};
    use crate::frame::Scalar;
    use std::sync::Arc;

    const HOUR: i64 = 3_600 * 1_000_000_000;
    const DAY: i64 = 24 * HOUR;

    fn clause(rule: &str, closed: ResampleBoundary, label: ResampleBoundary) -> ResampleClause {
        ResampleClause::new(
            ResampleRule::parse(rule).expect("rule"),
            closed,
            label,
            0,
            ResampleOrigin::Epoch,
            vec![NamedAggregator::new(AggOp::Sum, "v", "v_sum")],
        )
        .expect("clause")
    }

    fn configured(
        kind: ClauseKind,
        mgr: &Arc<ComponentManager>,
        index_range: (i64, i64),
        total_rows: u64,
    ) -> Clause {
        let mut c = Clause::new(kind);
        c.set_processing_config(&ProcessingConfig {
            total_rows,
            index_range: Some(index_range),
            ..ProcessingConfig::default()
        })
        .expect("config");
        c.set_component_manager(Arc::clone(mgr)).expect("mgr");
        c
    }

    #[test]
    fn rule_parsing_accepts_pandas_style_units() {
        assert_eq!(ResampleRule::parse("1D").expect("d").nanos(), DAY);
        assert_eq!(ResampleRule::parse("4h").expect("h").nanos(), 4 * HOUR);
        assert_eq!(
            ResampleRule::parse("15min").expect("min").nanos(),
            15 * 60 * 1_000_000_000
        );
        assert_eq!(
            ResampleRule::parse("30s").expect("s").nanos(),
            30 * 1_000_000_000
        );
        assert!(ResampleRule::parse("1x").is_err());
        assert!(ResampleRule::parse("0D").is_err());
    }

    #[test]
    fn epoch_aligned_left_closed_boundaries() {
        let mut c = clause("1D", ResampleBoundary::Left, ResampleBoundary::Left);
        c.apply_config(&ProcessingConfig {
            index_range: Some((HOUR, 3 * DAY + HOUR)),
            ..ProcessingConfig::default()
        })
        .expect("config");
        assert_eq!(c.boundaries(), &[0, DAY, 2 * DAY, 3 * DAY, 4 * DAY]);
        assert_eq!(c.bucket_of(0), Some(0));
        assert_eq!(c.bucket_of(DAY - 1), Some(0));
        assert_eq!(c.bucket_of(DAY), Some(1));
    }

    #[test]
    fn right_closed_buckets_own_their_right_edge() {
        let mut c = clause("1h", ResampleBoundary::Right, ResampleBoundary::Right);
        c.apply_config(&ProcessingConfig {
            index_range: Some((HOUR, 3 * HOUR)),
            ..ProcessingConfig::default()
        })
        .expect("config");
        // start == boundary: start belongs to the bucket ending at start.
        assert_eq!(c.boundaries()[0], 0);
        assert_eq!(c.bucket_of(HOUR), Some(0));
        assert_eq!(c.bucket_of(HOUR + 1), Some(1));
        assert_eq!(c.bucket_of(2 * HOUR), Some(1));
    }

    #[test]
    fn hourly_week_resamples_to_daily_sums() {
        let mgr = Arc::new(ComponentManager::new());
        let rows = 7 * 24;
        let ts: Vec<i64> = (0..rows).map(|i| i as i64 * HOUR).collect();
        let values: Vec<i64> = (0..rows).map(|i| i as i64).collect();
        let unit = crate::clause::insert_unit(
            &mgr,
            RowRange {
                start: 0,
                end: rows as u64,
            },
            Column::from_i64(DType::Timestamp, ts),
            vec![(
                "v".to_string(),
                Column::from_i64(DType::Int64, values),
            )],
            None,
        );

        let c = configured(
            ClauseKind::Resample(clause(
                "1D",
                ResampleBoundary::Left,
                ResampleBoundary::Left,
            )),
            &mgr,
            (0, (rows as i64 - 1) * HOUR),
            rows as u64,
        );
        let groups = c.structure_for_processing(vec![vec![unit]]).expect("structure");
        let out = c
            .process(groups.into_iter().next().expect("group"))
            .expect("process");
        let unit = mgr.unit(out[0]).expect("unit");
        let (labels, columns) = unit_columns(&mgr, &unit).expect("cols");

        assert_eq!(labels.len(), 7);
        for day in 0..7 {
            assert_eq!(labels.scalar_at(day), Some(Scalar::I64(day as i64 * DAY)));
            let expected: i64 = (0..24).map(|h| day as i64 * 24 + h).sum();
            assert_eq!(columns[0].1.scalar_at(day), Some(Scalar::I64(expected)));
        }
    }

    #[test]
    fn groups_sharing_a_bucket_merge() {
        let mut c = clause("1D", ResampleBoundary::Left, ResampleBoundary::Left);
        c.apply_config(&ProcessingConfig {
            index_range: Some((0, 2 * DAY)),
            ..ProcessingConfig::default()
        })
        .expect("config");

        // Two slices inside day 0, one in day 2.
        let groups = vec![vec![1], vec![2], vec![3]];
        let bounds = vec![
            Some((0, HOUR)),
            Some((2 * HOUR, 3 * HOUR)),
            Some((2 * DAY, 2 * DAY + HOUR)),
        ];
        let merged = merge_bucket_sharing_groups(groups, &bounds, |ts| c.bucket_of(ts));
        assert_eq!(merged, vec![vec![1, 2], vec![3]]);
    }
}
