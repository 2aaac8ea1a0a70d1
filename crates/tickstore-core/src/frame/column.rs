//! Materialized columns and scalar values.
//!
//! A [`Column`] is a typed value buffer plus an optional presence bitmap.
//! Positions absent from the bitmap are logically null and hold the type's
//! null sentinel in the buffer (`0` for integers, `NaN` for floats, the
//! empty string for `Utf8`, `false` for `Bool`). A column with no bitmap is
//! fully populated.

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::frame::schema::DType;

/// A single value, or null.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Scalar {
    /// Signed 64-bit integer (also carries `Timestamp` values).
    I64(i64),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// 64-bit float.
    F64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Absent value.
    Null,
}

impl Scalar {
    /// Numeric view as `f64`, if this scalar is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::I64(v) => Some(*v as f64),
            Scalar::U64(v) => Some(*v as f64),
            Scalar::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view as `i64`, if this scalar is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::I64(v) => Some(*v),
            Scalar::U64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Total-order comparison across numeric scalars, lexicographic for
    /// strings. Mixed numeric kinds compare through `f64`. Returns `None`
    /// for incomparable kinds or nulls.
    pub fn partial_cmp_value(&self, other: &Scalar) -> Option<std::cmp::Ordering> {
        use Scalar::*;
        match (self, other) {
            (Null, _) | (_, Null) => None,
            (I64(a), I64(b)) => Some(a.cmp(b)),
            (U64(a), U64(b)) => Some(a.cmp(b)),
            (Utf8(a), Utf8(b)) => Some(a.cmp(b)),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }
}

/// Typed value buffer of a column.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    /// Signed integers and timestamps.
    Int64(Vec<i64>),
    /// Unsigned integers.
    UInt64(Vec<u64>),
    /// Floats.
    Float64(Vec<f64>),
    /// Booleans.
    Bool(Vec<bool>),
    /// Strings.
    Utf8(Vec<String>),
}

impl ColumnData {
    fn len(&self) -> usize {
        match self {
            ColumnData::Int64(v) => v.len(),
            ColumnData::UInt64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
        }
    }

    /// The dtype this buffer materializes.
    fn materialized_dtype(&self) -> DType {
        match self {
            ColumnData::Int64(_) => DType::Int64,
            ColumnData::UInt64(_) => DType::UInt64,
            ColumnData::Float64(_) => DType::Float64,
            ColumnData::Bool(_) => DType::Bool,
            ColumnData::Utf8(_) => DType::Utf8,
        }
    }
}

/// A typed column with optional presence bitmap.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    dtype: DType,
    data: ColumnData,
    /// Bit set for every *present* row; `None` means fully populated.
    present: Option<RoaringBitmap>,
}

impl Column {
    /// Signed-integer column (also used for `Timestamp` and widened `Int32`).
    pub fn from_i64(dtype: DType, values: Vec<i64>) -> Self {
        debug_assert!(matches!(
            dtype.widened(),
            DType::Int64 | DType::Timestamp
        ));
        Self {
            dtype,
            data: ColumnData::Int64(values),
            present: None,
        }
    }

    /// Unsigned-integer column.
    pub fn from_u64(dtype: DType, values: Vec<u64>) -> Self {
        debug_assert!(matches!(dtype.widened(), DType::UInt64));
        Self {
            dtype,
            data: ColumnData::UInt64(values),
            present: None,
        }
    }

    /// Float column.
    pub fn from_f64(values: Vec<f64>) -> Self {
        Self {
            dtype: DType::Float64,
            data: ColumnData::Float64(values),
            present: None,
        }
    }

    /// Boolean column.
    pub fn from_bool(values: Vec<bool>) -> Self {
        Self {
            dtype: DType::Bool,
            data: ColumnData::Bool(values),
            present: None,
        }
    }

    /// String column.
    pub fn from_utf8(values: Vec<String>) -> Self {
        Self {
            dtype: DType::Utf8,
            data: ColumnData::Utf8(values),
            present: None,
        }
    }

    /// Assemble a column from raw parts; used by the segment decoder.
    pub fn from_parts(dtype: DType, data: ColumnData, present: Option<RoaringBitmap>) -> Self {
        Self {
            dtype,
            data,
            present,
        }
    }

    /// Attach a presence bitmap. Positions outside the bitmap are null;
    /// their buffer slots should already hold the null sentinel.
    pub fn with_present(mut self, present: RoaringBitmap) -> Self {
        self.present = if present.len() == self.len() as u64 {
            None
        } else {
            Some(present)
        };
        self
    }

    /// Declared dtype.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Raw data buffer.
    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    /// Presence bitmap, if the column has nulls.
    pub fn present(&self) -> Option<&RoaringBitmap> {
        self.present.as_ref()
    }

    /// Row count.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-null rows.
    pub fn present_count(&self) -> usize {
        match &self.present {
            Some(p) => p.len() as usize,
            None => self.len(),
        }
    }

    /// True when row `i` is null.
    pub fn is_null(&self, i: usize) -> bool {
        match &self.present {
            Some(p) => !p.contains(i as u32),
            None => false,
        }
    }

    /// Value at row `i`, `Scalar::Null` for absent positions, `None` when
    /// out of bounds.
    pub fn scalar_at(&self, i: usize) -> Option<Scalar> {
        if i >= self.len() {
            return None;
        }
        if self.is_null(i) {
            return Some(Scalar::Null);
        }
        Some(match &self.data {
            ColumnData::Int64(v) => Scalar::I64(v[i]),
            ColumnData::UInt64(v) => Scalar::U64(v[i]),
            ColumnData::Float64(v) => Scalar::F64(v[i]),
            ColumnData::Bool(v) => Scalar::Bool(v[i]),
            ColumnData::Utf8(v) => Scalar::Utf8(v[i].clone()),
        })
    }

    /// Typed view of the signed-integer buffer.
    pub fn i64_values(&self) -> Option<&[i64]> {
        match &self.data {
            ColumnData::Int64(v) => Some(v),
            _ => None,
        }
    }

    /// Typed view of the float buffer.
    pub fn f64_values(&self) -> Option<&[f64]> {
        match &self.data {
            ColumnData::Float64(v) => Some(v),
            _ => None,
        }
    }

    /// Copy rows `[start, end)` into a new column.
    pub fn slice(&self, start: usize, end: usize) -> Column {
        let end = end.min(self.len());
        let start = start.min(end);
        let data = match &self.data {
            ColumnData::Int64(v) => ColumnData::Int64(v[start..end].to_vec()),
            ColumnData::UInt64(v) => ColumnData::UInt64(v[start..end].to_vec()),
            ColumnData::Float64(v) => ColumnData::Float64(v[start..end].to_vec()),
            ColumnData::Bool(v) => ColumnData::Bool(v[start..end].to_vec()),
            ColumnData::Utf8(v) => ColumnData::Utf8(v[start..end].to_vec()),
        };
        let present = self.present.as_ref().map(|p| {
            p.iter()
                .skip_while(|&i| (i as usize) < start)
                .take_while(|&i| (i as usize) < end)
                .map(|i| i - start as u32)
                .collect()
        });
        Column {
            dtype: self.dtype,
            data,
            present,
        }
        .normalize()
    }

    /// Keep only rows whose bit is set in `mask` (positions are row offsets
    /// within this column), preserving order.
    pub fn filter(&self, mask: &RoaringBitmap) -> Column {
        let keep: Vec<usize> = mask
            .iter()
            .map(|i| i as usize)
            .filter(|&i| i < self.len())
            .collect();
        self.take(&keep)
    }

    /// Gather the given row positions, in order, into a new column.
    pub fn take(&self, rows: &[usize]) -> Column {
        let data = match &self.data {
            ColumnData::Int64(v) => ColumnData::Int64(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::UInt64(v) => ColumnData::UInt64(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Float64(v) => ColumnData::Float64(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Bool(v) => ColumnData::Bool(rows.iter().map(|&i| v[i]).collect()),
            ColumnData::Utf8(v) => {
                ColumnData::Utf8(rows.iter().map(|&i| v[i].clone()).collect())
            }
        };
        let present = self.present.as_ref().map(|p| {
            rows.iter()
                .enumerate()
                .filter(|(_, &src)| p.contains(src as u32))
                .map(|(dst, _)| dst as u32)
                .collect()
        });
        Column {
            dtype: self.dtype,
            data,
            present,
        }
        .normalize()
    }

    /// Vertically concatenate columns of one widened dtype.
    ///
    /// Integer/float mixes promote to `Float64` per the schema rules.
    pub fn concat(parts: &[&Column]) -> Option<Column> {
        let first = parts.first()?;
        let mut dtype = first.dtype.widened();
        for p in &parts[1..] {
            dtype = dtype.promote(p.dtype)?;
        }
        let total: usize = parts.iter().map(|p| p.len()).sum();
        let mut present = RoaringBitmap::new();
        let mut any_null = false;
        let mut offset = 0u32;
        for p in parts.iter() {
            match p.present() {
                Some(bm) => {
                    any_null = true;
                    for i in bm.iter() {
                        present.insert(offset + i);
                    }
                }
                None => {
                    if p.len() > 0 {
                        present.insert_range(offset..offset + p.len() as u32);
                    }
                }
            }
            offset += p.len() as u32;
        }

        let mut out = match dtype {
            DType::Float64 => {
                let mut v = Vec::with_capacity(total);
                for p in parts {
                    for i in 0..p.len() {
                        v.push(p.scalar_at(i).and_then(|s| s.as_f64()).unwrap_or(f64::NAN));
                    }
                }
                Column::from_f64(v)
            }
            DType::Utf8 => {
                let mut v = Vec::with_capacity(total);
                for p in parts {
                    match &p.data {
                        ColumnData::Utf8(s) => v.extend(s.iter().cloned()),
                        _ => return None,
                    }
                }
                Column::from_utf8(v)
            }
            DType::Bool => {
                let mut v = Vec::with_capacity(total);
                for p in parts {
                    match &p.data {
                        ColumnData::Bool(b) => v.extend_from_slice(b),
                        _ => return None,
                    }
                }
                Column::from_bool(v)
            }
            DType::UInt64 => {
                let mut v = Vec::with_capacity(total);
                for p in parts {
                    match &p.data {
                        ColumnData::UInt64(u) => v.extend_from_slice(u),
                        _ => return None,
                    }
                }
                Column::from_u64(DType::UInt64, v)
            }
            _ => {
                let mut v = Vec::with_capacity(total);
                for p in parts {
                    for i in 0..p.len() {
                        v.push(p.scalar_at(i).and_then(|s| s.as_i64()).unwrap_or(0));
                    }
                }
                Column::from_i64(dtype, v)
            }
        };
        if any_null {
            out = out.with_present(present);
        }
        Some(out)
    }

    /// An all-null column of `len` rows for dynamic-schema materialization.
    pub fn nulls(dtype: DType, len: usize) -> Column {
        let data = match dtype.widened() {
            DType::UInt64 => ColumnData::UInt64(vec![0; len]),
            DType::Float64 => ColumnData::Float64(vec![f64::NAN; len]),
            DType::Bool => ColumnData::Bool(vec![false; len]),
            DType::Utf8 => ColumnData::Utf8(vec![String::new(); len]),
            _ => ColumnData::Int64(vec![0; len]),
        };
        Column {
            dtype,
            data,
            present: Some(RoaringBitmap::new()),
        }
    }

    /// True when present values are non-decreasing.
    pub fn is_sorted(&self) -> bool {
        let mut prev: Option<Scalar> = None;
        for i in 0..self.len() {
            match self.scalar_at(i) {
                Some(Scalar::Null) | None => continue,
                Some(cur) => {
                    if let Some(p) = &prev {
                        if matches!(
                            p.partial_cmp_value(&cur),
                            Some(std::cmp::Ordering::Greater)
                        ) {
                            return false;
                        }
                    }
                    prev = Some(cur);
                }
            }
        }
        true
    }

    /// Drop a presence bitmap that marks every row.
    fn normalize(mut self) -> Column {
        if let Some(p) = &self.present {
            if p.len() == self.len() as u64 {
                self.present = None;
            }
        }
        self
    }
}
