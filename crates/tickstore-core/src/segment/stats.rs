//! Per-field summary statistics recorded in segment headers.
//!
//! Stats are computed at write time and consumed by filter push-down and
//! the column-stats clause. Each statistic is individually optional; the
//! serialized form simply omits unpopulated entries. Unique counts are
//! exact up to a bounded tracking set, then degrade to a HyperLogLog
//! estimate.

use std::collections::HashSet;
use std::collections::hash_map::RandomState;

use hyperloglogplus::{HyperLogLog, HyperLogLogPlus};
use serde::{Deserialize, Serialize};

use crate::frame::{Column, ColumnData, Scalar};

/// Distinct values tracked exactly before switching to an estimate.
const EXACT_UNIQUE_LIMIT: usize = 1024;

/// HyperLogLog precision (2^14 registers).
const HLL_PRECISION: u8 = 14;

/// Distinct-value count, exact or estimated.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum UniqueCount {
    /// Exact distinct count.
    Precise(u64),
    /// HyperLogLog estimate.
    Approximate(u64),
}

impl UniqueCount {
    /// The count regardless of precision.
    pub fn value(self) -> u64 {
        match self {
            UniqueCount::Precise(v) | UniqueCount::Approximate(v) => v,
        }
    }
}

/// Summary statistics for one field.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldStats {
    /// Minimum present value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Scalar>,
    /// Maximum present value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Scalar>,
    /// Distinct-value count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<UniqueCount>,
    /// Whether present values are non-decreasing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorted: Option<bool>,
    /// Non-null row count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub present_rows: Option<u64>,
}

impl FieldStats {
    /// Compute stats over a column.
    pub fn from_column(col: &Column) -> FieldStats {
        let mut min: Option<Scalar> = None;
        let mut max: Option<Scalar> = None;
        for i in 0..col.len() {
            let v = match col.scalar_at(i) {
                Some(Scalar::Null) | None => continue,
                Some(v) => v,
            };
            let lower = match &min {
                Some(m) => matches!(
                    v.partial_cmp_value(m),
                    Some(std::cmp::Ordering::Less)
                ),
                None => true,
            };
            if lower {
                min = Some(v.clone());
            }
            let higher = match &max {
                Some(m) => matches!(
                    v.partial_cmp_value(m),
                    Some(std::cmp::Ordering::Greater)
                ),
                None => true,
            };
            if higher {
                max = Some(v);
            }
        }

        FieldStats {
            min,
            max,
            unique: unique_count(col),
            sorted: Some(col.is_sorted()),
            present_rows: Some(col.present_count() as u64),
        }
    }

    /// True when a value range `[lo, hi]` could intersect this field.
    ///
    /// Conservative: returns true when min/max are unpopulated or
    /// incomparable with the probe values.
    pub fn may_intersect(&self, lo: &Scalar, hi: &Scalar) -> bool {
        if let Some(max) = &self.max {
            if matches!(
                max.partial_cmp_value(lo),
                Some(std::cmp::Ordering::Less)
            ) {
                return false;
            }
        }
        if let Some(min) = &self.min {
            if matches!(
                min.partial_cmp_value(hi),
                Some(std::cmp::Ordering::Greater)
            ) {
                return false;
            }
        }
        true
    }
}

/// Stable 64-bit identity of a value for distinct counting.
fn value_token(col: &Column, i: usize) -> Option<u64> {
    if col.is_null(i) {
        return None;
    }
    Some(match col.data() {
        ColumnData::Int64(v) => v[i] as u64,
        ColumnData::UInt64(v) => v[i],
        ColumnData::Float64(v) => v[i].to_bits(),
        ColumnData::Bool(v) => u64::from(v[i]),
        ColumnData::Utf8(v) => xxhash_rust::xxh3::xxh3_64(v[i].as_bytes()),
    })
}

fn unique_count(col: &Column) -> Option<UniqueCount> {
    let mut exact: HashSet<u64> = HashSet::new();
    for i in 0..col.len() {
        let Some(token) = value_token(col, i) else {
            continue;
        };
        exact.insert(token);
        if exact.len() > EXACT_UNIQUE_LIMIT {
            return approximate_unique(col);
        }
    }
    Some(UniqueCount::Precise(exact.len() as u64))
}

fn approximate_unique(col: &Column) -> Option<UniqueCount> {
    let Ok(mut hll) = HyperLogLogPlus::<u64, _>::new(HLL_PRECISION, RandomState::new()) else {
        return None;
    };
    for i in 0..col.len() {
        if let Some(token) = value_token(col, i) {
            hll.insert(&token);
        }
    }
    Some(UniqueCount::Approximate(hll.count().round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DType;
    use roaring::RoaringBitmap;

    #[test]
    fn stats_skip_nulls_and_record_bounds() {
        let present: RoaringBitmap = [0u32, 2, 3].into_iter().collect();
        let col = Column::from_i64(DType::Int64, vec![5, 0, -2, 5]).with_present(present);
        let stats = FieldStats::from_column(&col);
        assert_eq!(stats.min, Some(Scalar::I64(-2)));
        assert_eq!(stats.max, Some(Scalar::I64(5)));
        assert_eq!(stats.unique, Some(UniqueCount::Precise(2)));
        assert_eq!(stats.present_rows, Some(3));
    }

    #[test]
    fn large_cardinality_degrades_to_estimate() {
        let col = Column::from_i64(DType::Int64, (0..5_000).collect());
        let stats = FieldStats::from_column(&col);
        match stats.unique {
            Some(UniqueCount::Approximate(n)) => {
                // HLL at precision 14 is well within 5% here.
                assert!((4_500..=5_500).contains(&n), "estimate {n}");
            }
            other => panic!("expected approximate count, got {other:?}"),
        }
    }

    #[test]
    fn may_intersect_is_conservative() {
        let col = Column::from_i64(DType::Int64, vec![10, 20, 30]);
        let stats = FieldStats::from_column(&col);
        assert!(stats.may_intersect(&Scalar::I64(25), &Scalar::I64(40)));
        assert!(!stats.may_intersect(&Scalar::I64(31), &Scalar::I64(99)));
        assert!(!stats.may_intersect(&Scalar::I64(0), &Scalar::I64(9)));
        assert!(FieldStats::default().may_intersect(&Scalar::I64(0), &Scalar::I64(1)));
    }
}
