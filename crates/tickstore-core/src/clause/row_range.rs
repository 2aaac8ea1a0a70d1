//! Head/tail/range row retention.

use crate::arena::EntityId;
use crate::clause::{insert_unit, unit_columns, ClauseCtx, ClauseError, ProcessingConfig};
use crate::index::{RangesAndKey, RowRange};

/// Which rows to keep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowRangeKind {
    /// First `n` rows (`n < 0`: all but the last `-n`).
    Head(i64),
    /// Last `n` rows (`n < 0`: all but the first `-n`).
    Tail(i64),
    /// Rows `[start, end)`; negative values wrap against the total count.
    Range {
        /// Start row, possibly negative.
        start: i64,
        /// End row (exclusive), possibly negative.
        end: i64,
    },
}

/// Retains rows `[start, end)` of the whole symbol. First clause only;
/// the concrete interval resolves when the total row count arrives via
/// the processing config.
#[derive(Debug)]
pub struct RowRangeClause {
    kind: RowRangeKind,
    start: u64,
    end: u64,
}

impl RowRangeClause {
    /// Keep rows per `kind`.
    pub fn new(kind: RowRangeKind) -> RowRangeClause {
        RowRangeClause {
            kind,
            start: 0,
            end: 0,
        }
    }

    /// The resolved interval (after configuration).
    pub fn resolved(&self) -> RowRange {
        RowRange {
            start: self.start,
            end: self.end,
        }
    }

    pub(crate) fn apply_config(&mut self, cfg: &ProcessingConfig) {
        let total = cfg.total_rows;
        let wrap = |v: i64| -> u64 {
            if v < 0 {
                total.saturating_sub(v.unsigned_abs())
            } else {
                (v as u64).min(total)
            }
        };
        let (start, end) = match self.kind {
            RowRangeKind::Head(n) => {
                if n >= 0 {
                    (0, (n as u64).min(total))
                } else {
                    (0, total.saturating_sub(n.unsigned_abs()))
                }
            }
            RowRangeKind::Tail(n) => {
                if n >= 0 {
                    (total.saturating_sub(n as u64), total)
                } else {
                    (n.unsigned_abs().min(total), total)
                }
            }
            RowRangeKind::Range { start, end } => (wrap(start), wrap(end)),
        };
        self.start = start;
        self.end = end.max(start);
    }

    pub(crate) fn structure_initial(&self, ranges: &mut Vec<RangesAndKey>) -> Vec<Vec<usize>> {
        let keep = self.resolved();
        ranges.retain(|e| e.row_range.intersects(&keep));
        crate::clause::structure_by_row_slice(ranges)
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        let keep = self.resolved();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let unit = ctx.mgr.unit(id)?;
            let lo = keep.start.max(unit.row_range.start);
            let hi = keep.end.min(unit.row_range.end);
            if hi <= lo {
                ctx.mgr.release(id);
                continue;
            }
            let local_lo = (lo - unit.row_range.start) as usize;
            let local_hi = (hi - unit.row_range.start) as usize;
            let (index, columns) = unit_columns(ctx.mgr, &unit)?;
            let sliced = columns
                .into_iter()
                .map(|(name, col)| (name, col.slice(local_lo, local_hi)))
                .collect();
            let replacement = insert_unit(
                ctx.mgr,
                RowRange { start: lo, end: hi },
                index.slice(local_lo, local_hi),
                sliced,
                unit.bucket,
            );
            ctx.mgr.release(id);
            out.push(replacement);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(kind: RowRangeKind, total: u64) -> RowRange {
        let mut clause = RowRangeClause::new(kind);
        clause.apply_config(&ProcessingConfig {
            total_rows: total,
            ..ProcessingConfig::default()
        });
        clause.resolved()
    }

    #[test]
    fn head_and_tail_resolve_against_total() {
        assert_eq!(
            resolved(RowRangeKind::Head(3), 10),
            RowRange { start: 0, end: 3 }
        );
        assert_eq!(
            resolved(RowRangeKind::Head(-2), 10),
            RowRange { start: 0, end: 8 }
        );
        assert_eq!(
            resolved(RowRangeKind::Tail(3), 10),
            RowRange { start: 7, end: 10 }
        );
        assert_eq!(
            resolved(RowRangeKind::Tail(-2), 10),
            RowRange { start: 2, end: 10 }
        );
        assert_eq!(
            resolved(RowRangeKind::Head(99), 10),
            RowRange { start: 0, end: 10 }
        );
    }

    #[test]
    fn negative_range_indices_wrap() {
        assert_eq!(
            resolved(RowRangeKind::Range { start: -4, end: -1 }, 10),
            RowRange { start: 6, end: 9 }
        );
        assert_eq!(
            resolved(RowRangeKind::Range { start: 8, end: 4 }, 10),
            RowRange { start: 8, end: 8 }
        );
    }

    #[test]
    fn structure_prunes_disjoint_slices() {
        let mut clause = RowRangeClause::new(RowRangeKind::Range { start: 150, end: 250 });
        clause.apply_config(&ProcessingConfig {
            total_rows: 300,
            ..ProcessingConfig::default()
        });

        let entry = |start: u64, end: u64| RangesAndKey {
            row_range: RowRange { start, end },
            col_range: crate::index::ColRange { start: 0, end: 1 },
            start_index: crate::keys::IndexValue::Ts(start as i64),
            end_index: crate::keys::IndexValue::Ts(end as i64 - 1),
            key: crate::keys::AtomKey {
                stream_id: crate::keys::StreamId::Num(1),
                key_type: crate::keys::KeyType::TableData,
                version_id: 1,
                creation_ts: 0,
                content_hash: start,
                start_index: None,
                end_index: None,
            },
        };
        let mut ranges = vec![entry(0, 100), entry(100, 200), entry(200, 300)];
        let groups = clause.structure_initial(&mut ranges);
        assert_eq!(ranges.len(), 2);
        assert_eq!(groups.len(), 2);
        assert_eq!(ranges[0].row_range.start, 100);
    }
}
