//! Index-interval row retention with slice push-down.

use roaring::RoaringBitmap;

use crate::arena::EntityId;
use crate::clause::{filter_unit, structure_by_row_slice, ClauseCtx, ClauseError};
use crate::index::RangesAndKey;
use crate::keys::IndexValue;

/// Retains rows whose index value falls in the closed interval
/// `[start, end]`. The initial structure pass drops slices entirely
/// outside the interval, so they are never fetched or decoded.
#[derive(Debug)]
pub struct DateRangeClause {
    start: i64,
    end: i64,
}

impl DateRangeClause {
    /// Keep `[start, end]`, nanoseconds, both inclusive.
    pub fn new(start: i64, end: i64) -> DateRangeClause {
        DateRangeClause { start, end }
    }

    /// Interval start.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Interval end.
    pub fn end(&self) -> i64 {
        self.end
    }

    pub(crate) fn structure_initial(&self, ranges: &mut Vec<RangesAndKey>) -> Vec<Vec<usize>> {
        let lo = IndexValue::Ts(self.start);
        let hi = IndexValue::Ts(self.end);
        ranges.retain(|e| e.may_intersect_index(&lo, &hi));
        structure_by_row_slice(ranges)
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let unit = ctx.mgr.unit(id)?;
            let index = ctx.mgr.column_data(unit.index)?;
            let mut mask = RoaringBitmap::new();
            for row in 0..index.len() {
                if let Some(ts) = index.scalar_at(row).and_then(|s| s.as_i64()) {
                    if ts >= self.start && ts <= self.end {
                        mask.insert(row as u32);
                    }
                }
            }
            let replacement = filter_unit(ctx.mgr, &unit, &mask)?;
            ctx.mgr.release(id);
            out.push(replacement);
        }
        Ok(out)
    }
}
