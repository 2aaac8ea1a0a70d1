//! Reduction kernels shared by the aggregation and resample clauses.
//!
//! Null policy, everywhere: nulls are skipped by every reduction, and
//! `count` counts non-null rows. Numeric promotion follows the schema
//! rules; integer sums stay 64-bit integers, anything touching a float
//! (and every `mean`) yields `Float64`.

use serde::{Deserialize, Serialize};

use crate::frame::{Column, DType, Scalar};

/// Reduction operators.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AggOp {
    /// Sum of present values.
    Sum,
    /// Minimum present value.
    Min,
    /// Maximum present value.
    Max,
    /// Mean of present values.
    Mean,
    /// Count of present values.
    Count,
    /// First present value.
    First,
    /// Last present value.
    Last,
}

impl AggOp {
    /// Output dtype for an input column dtype.
    pub fn output_dtype(self, input: DType) -> DType {
        match self {
            AggOp::Count => DType::UInt64,
            AggOp::Mean => DType::Float64,
            AggOp::Sum => {
                if input.is_float() {
                    DType::Float64
                } else {
                    DType::Int64
                }
            }
            AggOp::Min | AggOp::Max | AggOp::First | AggOp::Last => input.widened(),
        }
    }
}

/// One requested aggregation: operator, input column, output name.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NamedAggregator {
    /// Reduction operator.
    pub op: AggOp,
    /// Input column name.
    pub input: String,
    /// Output column name.
    pub output: String,
}

impl NamedAggregator {
    /// Convenience constructor.
    pub fn new(op: AggOp, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            op,
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Reduce the given rows of a column to one scalar.
///
/// Returns `Scalar::Null` when no present rows fall in range (except
/// `count`, which returns zero).
pub fn reduce(op: AggOp, col: &Column, rows: impl Iterator<Item = usize>) -> Scalar {
    let mut count: u64 = 0;
    let mut sum_i: i64 = 0;
    let mut sum_f: f64 = 0.0;
    let mut float_seen = col.dtype().is_float();
    let mut min: Option<Scalar> = None;
    let mut max: Option<Scalar> = None;
    let mut first: Option<Scalar> = None;
    let mut last: Option<Scalar> = None;

    for i in rows {
        let v = match col.scalar_at(i) {
            Some(Scalar::Null) | None => continue,
            Some(v) => v,
        };
        count += 1;
        if first.is_none() {
            first = Some(v.clone());
        }
        last = Some(v.clone());
        match &v {
            Scalar::F64(x) => {
                float_seen = true;
                sum_f += x;
            }
            Scalar::I64(x) => {
                sum_i = sum_i.wrapping_add(*x);
                sum_f += *x as f64;
            }
            Scalar::U64(x) => {
                sum_i = sum_i.wrapping_add(*x as i64);
                sum_f += *x as f64;
            }
            _ => {}
        }
        let lower = min
            .as_ref()
            .map(|m| matches!(v.partial_cmp_value(m), Some(std::cmp::Ordering::Less)))
            .unwrap_or(true);
        if lower {
            min = Some(v.clone());
        }
        let higher = max
            .as_ref()
            .map(|m| matches!(v.partial_cmp_value(m), Some(std::cmp::Ordering::Greater)))
            .unwrap_or(true);
        if higher {
            max = Some(v);
        }
    }

    match op {
        AggOp::Count => Scalar::U64(count),
        AggOp::Sum => {
            if count == 0 {
                Scalar::Null
            } else if float_seen {
                Scalar::F64(sum_f)
            } else {
                Scalar::I64(sum_i)
            }
        }
        AggOp::Mean => {
            if count == 0 {
                Scalar::Null
            } else {
                Scalar::F64(sum_f / count as f64)
            }
        }
        AggOp::Min => min.unwrap_or(Scalar::Null),
        AggOp::Max => max.unwrap_or(Scalar::Null),
        AggOp::First => first.unwrap_or(Scalar::Null),
        AggOp::Last => last.unwrap_or(Scalar::Null),
    }
}

/// Assemble a column of one output dtype from per-group scalars.
pub fn column_from_scalars(dtype: DType, values: &[Scalar]) -> Column {
    let mut present = roaring::RoaringBitmap::new();
    match dtype.widened() {
        DType::Float64 => {
            let mut out = Vec::with_capacity(values.len());
            for (i, v) in values.iter().enumerate() {
                match v.as_f64() {
                    Some(x) => {
                        present.insert(i as u32);
                        out.push(x);
                    }
                    None => out.push(f64::NAN),
                }
            }
            Column::from_f64(out).with_present(present)
        }
        DType::UInt64 => {
            let mut out = Vec::with_capacity(values.len());
            for (i, v) in values.iter().enumerate() {
                match v {
                    Scalar::U64(x) => {
                        present.insert(i as u32);
                        out.push(*x);
                    }
                    _ => match v.as_i64() {
                        Some(x) if x >= 0 => {
                            present.insert(i as u32);
                            out.push(x as u64);
                        }
                        _ => out.push(0),
                    },
                }
            }
            Column::from_u64(DType::UInt64, out).with_present(present)
        }
        DType::Utf8 => {
            let mut out = Vec::with_capacity(values.len());
            for (i, v) in values.iter().enumerate() {
                match v {
                    Scalar::Utf8(s) => {
                        present.insert(i as u32);
                        out.push(s.clone());
                    }
                    _ => out.push(String::new()),
                }
            }
            Column::from_utf8(out).with_present(present)
        }
        DType::Bool => {
            let mut out = Vec::with_capacity(values.len());
            for (i, v) in values.iter().enumerate() {
                match v {
                    Scalar::Bool(x) => {
                        present.insert(i as u32);
                        out.push(*x);
                    }
                    _ => out.push(false),
                }
            }
            Column::from_bool(out).with_present(present)
        }
        other => {
            let mut out = Vec::with_capacity(values.len());
            for (i, v) in values.iter().enumerate() {
                match v.as_i64() {
                    Some(x) => {
                        present.insert(i as u32);
                        out.push(x);
                    }
                    None => out.push(0),
                }
            }
            Column::from_i64(other, out).with_present(present)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roaring::RoaringBitmap;

    fn nullable() -> Column {
        let present: RoaringBitmap = [0u32, 2, 3].into_iter().collect();
        Column::from_i64(DType::Int64, vec![10, 0, 30, 20]).with_present(present)
    }

    #[test]
    fn reductions_skip_nulls() {
        let col = nullable();
        let rows = || 0..col.len();
        assert_eq!(reduce(AggOp::Sum, &col, rows()), Scalar::I64(60));
        assert_eq!(reduce(AggOp::Count, &col, rows()), Scalar::U64(3));
        assert_eq!(reduce(AggOp::Mean, &col, rows()), Scalar::F64(20.0));
        assert_eq!(reduce(AggOp::Min, &col, rows()), Scalar::I64(10));
        assert_eq!(reduce(AggOp::Max, &col, rows()), Scalar::I64(30));
        assert_eq!(reduce(AggOp::First, &col, rows()), Scalar::I64(10));
        assert_eq!(reduce(AggOp::Last, &col, rows()), Scalar::I64(20));
    }

    #[test]
    fn empty_input_yields_null_except_count() {
        let col = Column::from_i64(DType::Int64, vec![]);
        assert_eq!(reduce(AggOp::Sum, &col, 0..0), Scalar::Null);
        assert_eq!(reduce(AggOp::Count, &col, 0..0), Scalar::U64(0));
        assert_eq!(reduce(AggOp::Mean, &col, 0..0), Scalar::Null);
    }

    #[test]
    fn float_input_promotes_sum() {
        let col = Column::from_f64(vec![0.5, 1.25]);
        assert_eq!(reduce(AggOp::Sum, &col, 0..2), Scalar::F64(1.75));
        assert_eq!(AggOp::Sum.output_dtype(DType::Int32), DType::Int64);
        assert_eq!(AggOp::Sum.output_dtype(DType::Float32), DType::Float64);
        assert_eq!(AggOp::Mean.output_dtype(DType::Int64), DType::Float64);
    }

    #[test]
    fn scalar_column_assembly_preserves_nulls() {
        let col = column_from_scalars(
            DType::Int64,
            &[Scalar::I64(1), Scalar::Null, Scalar::I64(3)],
        );
        assert_eq!(col.scalar_at(1), Some(Scalar::Null));
        assert_eq!(col.scalar_at(2), Some(Scalar::I64(3)));
    }
}
