//! Logical frames: the in-memory unit of ingest and query output.
//!
//! A [`Frame`] is a named index column plus zero or more value columns, all
//! of equal row count. Frames are what callers hand to the writer and what
//! the read pipeline assembles back together; on disk they are decomposed
//! into row-by-column tiles and encoded as segments.
//!
//! Columns materialize with 64-bit value buffers regardless of the declared
//! storage width: `Int32`/`UInt32` widen to their 64-bit counterparts and
//! `Float32` to `Float64` on decode, which is also the promotion rule applied
//! when mixed-width columns meet in arithmetic or concatenation.

pub mod column;
pub mod schema;

pub use column::{Column, ColumnData, Scalar};
pub use schema::{DType, FieldDef, Schema, SchemaError};

use snafu::prelude::*;

/// Errors raised while assembling or validating a frame.
#[derive(Debug, Snafu)]
pub enum FrameError {
    /// A value column's length differs from the index column's.
    #[snafu(display("column {column} has {rows} rows, index has {index_rows}"))]
    RaggedColumns {
        /// The offending column name.
        column: String,
        /// Rows in the offending column.
        rows: usize,
        /// Rows in the index column.
        index_rows: usize,
    },

    /// A column's materialized data does not match its declared dtype.
    #[snafu(display("column {column} declared {dtype:?} but materialized as {actual:?}"))]
    DtypeMismatch {
        /// The offending column name.
        column: String,
        /// Declared dtype from the schema.
        dtype: DType,
        /// Materialized dtype of the column data.
        actual: DType,
    },

    /// Schema-level validation failure.
    #[snafu(transparent)]
    Schema {
        /// The underlying schema error.
        source: SchemaError,
    },
}

/// An index column plus named value columns of equal row count.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    schema: Schema,
    index: Column,
    columns: Vec<Column>,
}

impl Frame {
    /// Build a frame, validating row counts and dtype agreement.
    ///
    /// `columns` must be parallel to `schema.fields()`.
    pub fn new(schema: Schema, index: Column, columns: Vec<Column>) -> Result<Self, FrameError> {
        let index_rows = index.len();
        for (def, col) in schema.fields().iter().zip(&columns) {
            ensure!(
                col.len() == index_rows,
                RaggedColumnsSnafu {
                    column: def.name.clone(),
                    rows: col.len(),
                    index_rows,
                }
            );
            ensure!(
                col.dtype().widened() == def.dtype.widened(),
                DtypeMismatchSnafu {
                    column: def.name.clone(),
                    dtype: def.dtype,
                    actual: col.dtype(),
                }
            );
        }
        Ok(Self {
            schema,
            index,
            columns,
        })
    }

    /// The frame's schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The index column.
    pub fn index(&self) -> &Column {
        &self.index
    }

    /// Value columns, parallel to `schema().fields()`.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.index.len()
    }

    /// Look up a value column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.schema
            .fields()
            .iter()
            .position(|f| f.name == name)
            .map(|i| &self.columns[i])
    }

    /// Slice rows `[start, end)` out of every column.
    pub fn slice_rows(&self, start: usize, end: usize) -> Frame {
        Frame {
            schema: self.schema.clone(),
            index: self.index.slice(start, end),
            columns: self.columns.iter().map(|c| c.slice(start, end)).collect(),
        }
    }

    /// First and last index values, if the frame is non-empty.
    pub fn index_bounds(&self) -> Option<(Scalar, Scalar)> {
        if self.num_rows() == 0 {
            return None;
        }
        let first = self.index.scalar_at(0).unwrap_or(Scalar::Null);
        let last = self
            .index
            .scalar_at(self.num_rows() - 1)
            .unwrap_or(Scalar::Null);
        Some((first, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_col_schema() -> Schema {
        Schema::new(
            FieldDef::new("ts", DType::Timestamp),
            vec![
                FieldDef::new("x", DType::Int64),
                FieldDef::new("y", DType::Float64),
            ],
        )
        .expect("valid schema")
    }

    #[test]
    fn new_frame_validates_row_counts() {
        let schema = two_col_schema();
        let index = Column::from_i64(DType::Timestamp, vec![0, 1, 2]);
        let x = Column::from_i64(DType::Int64, vec![1, 2]);
        let y = Column::from_f64(vec![1.0, 2.0, 3.0]);

        let err = Frame::new(schema, index, vec![x, y]).expect_err("ragged columns");
        assert!(matches!(err, FrameError::RaggedColumns { .. }));
    }

    #[test]
    fn new_frame_validates_dtypes() {
        let schema = two_col_schema();
        let index = Column::from_i64(DType::Timestamp, vec![0, 1]);
        let x = Column::from_f64(vec![1.0, 2.0]);
        let y = Column::from_f64(vec![1.0, 2.0]);

        let err = Frame::new(schema, index, vec![x, y]).expect_err("dtype mismatch");
        assert!(matches!(err, FrameError::DtypeMismatch { .. }));
    }

    #[test]
    fn slice_rows_keeps_schema_and_bounds() {
        let schema = two_col_schema();
        let index = Column::from_i64(DType::Timestamp, vec![10, 20, 30, 40]);
        let x = Column::from_i64(DType::Int64, vec![1, 2, 3, 4]);
        let y = Column::from_f64(vec![0.1, 0.2, 0.3, 0.4]);
        let frame = Frame::new(schema, index, vec![x, y]).expect("valid frame");

        let mid = frame.slice_rows(1, 3);
        assert_eq!(mid.num_rows(), 2);
        assert_eq!(
            mid.index_bounds(),
            Some((Scalar::I64(20), Scalar::I64(30)))
        );
        assert_eq!(mid.column("x").and_then(|c| c.scalar_at(0)), Some(Scalar::I64(2)));
    }
}
