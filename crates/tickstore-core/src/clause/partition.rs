//! Hash bucketing on a group column.

use roaring::RoaringBitmap;
use xxhash_rust::xxh3::xxh3_64;

use crate::arena::EntityId;
use crate::clause::{filter_unit, unit_columns, ClauseCtx, ClauseError};
use crate::frame::{Column, ColumnData};

/// Buckets each slice's rows by the hash of one column; downstream
/// aggregation regroups by bucket so each bucket reduces independently.
///
/// Rows whose group key is null fall out of every bucket.
#[derive(Debug)]
pub struct PartitionClause {
    grouping_column: String,
}

impl PartitionClause {
    /// Partition on `column`.
    pub fn new(column: impl Into<String>) -> PartitionClause {
        PartitionClause {
            grouping_column: column.into(),
        }
    }

    /// The grouping column.
    pub fn grouping_column(&self) -> &str {
        &self.grouping_column
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        let buckets = ctx.cfg.partition_buckets.max(1) as u64;
        let mut out = Vec::new();
        for id in ids {
            let unit = ctx.mgr.unit(id)?;
            let (_, columns) = unit_columns(ctx.mgr, &unit)?;
            let key_col = columns
                .iter()
                .find(|(n, _)| n == &self.grouping_column)
                .map(|(_, c)| c.clone())
                .ok_or_else(|| ClauseError::BadInput {
                    clause: "Partition",
                    detail: format!("grouping column {} absent", self.grouping_column),
                })?;

            let mut masks: Vec<RoaringBitmap> = vec![RoaringBitmap::new(); buckets as usize];
            for row in 0..key_col.len() {
                if key_col.is_null(row) {
                    continue;
                }
                let bucket = (hash_row(&key_col, row) % buckets) as usize;
                masks[bucket].insert(row as u32);
            }

            for (bucket, mask) in masks.into_iter().enumerate() {
                if mask.is_empty() {
                    continue;
                }
                let sub = filter_unit(ctx.mgr, &unit, &mask)?;
                // Tag the bucket on the freshly built unit.
                let mut tagged = ctx.mgr.unit(sub)?;
                tagged.bucket = Some(bucket as u64);
                let replacement = ctx.mgr.insert(crate::arena::EntityPayload::Unit(tagged));
                // Drop only the unit shell; the replacement holds the
                // column entities it bundles.
                release_shell(ctx, sub);
                out.push(replacement);
            }
            ctx.mgr.release(id);
        }
        Ok(out)
    }
}

/// Release a unit entity without cascading into its bundle.
fn release_shell(ctx: &ClauseCtx<'_>, id: EntityId) {
    if let Ok(unit) = ctx.mgr.unit(id) {
        for bundled in unit.bundled() {
            let _ = ctx.mgr.retain(bundled);
        }
        ctx.mgr.release(id);
    }
}

/// Stable hash of one row of the group column.
fn hash_row(col: &Column, row: usize) -> u64 {
    match col.data() {
        ColumnData::Int64(v) => xxh3_64(&v[row].to_le_bytes()),
        ColumnData::UInt64(v) => xxh3_64(&v[row].to_le_bytes()),
        ColumnData::Float64(v) => xxh3_64(&v[row].to_bits().to_le_bytes()),
        ColumnData::Bool(v) => xxh3_64(&[u8::from(v[row])]),
        ColumnData::Utf8(v) => xxh3_64(v[row].as_bytes()),
    }
}
