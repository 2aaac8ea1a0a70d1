//! Column dtypes and schema descriptors.
//!
//! [`Schema`] pairs an index field with named value fields and rejects
//! duplicate column names at construction, so everything downstream can
//! assume name uniqueness. Dtypes record the declared storage width;
//! [`DType::widened`] gives the width a column materializes at in memory.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Declared value type of a column.
///
/// Narrow widths (`Int32`, `UInt32`, `Float32`) are storage-level choices:
/// segments may encode them in four bytes per value, but decoded columns
/// always materialize at the widened type.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DType {
    /// Nanosecond UTC timestamp, stored as a signed 64-bit integer.
    Timestamp,
    /// 32-bit signed integer (materializes as `Int64`).
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit unsigned integer (materializes as `UInt64`).
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 32-bit float (materializes as `Float64`).
    Float32,
    /// 64-bit float.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
}

impl DType {
    /// The type this dtype materializes at in memory.
    pub fn widened(self) -> DType {
        match self {
            DType::Int32 => DType::Int64,
            DType::UInt32 => DType::UInt64,
            DType::Float32 => DType::Float64,
            other => other,
        }
    }

    /// Bytes per value in an encoded value block.
    ///
    /// Variable-width types (`Utf8`) return `None`; their values go through
    /// the string pool instead.
    pub fn storage_width(self) -> Option<usize> {
        match self {
            DType::Int32 | DType::UInt32 | DType::Float32 => Some(4),
            DType::Timestamp | DType::Int64 | DType::UInt64 | DType::Float64 => Some(8),
            DType::Bool => Some(1),
            DType::Utf8 => None,
        }
    }

    /// True for integer dtypes (timestamps included).
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DType::Timestamp | DType::Int32 | DType::Int64 | DType::UInt32 | DType::UInt64
        )
    }

    /// True for float dtypes.
    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    /// Numeric promotion for arithmetic and concatenation.
    ///
    /// Mixed integer widths widen to 64-bit; integer plus float yields
    /// `Float64`. Non-numeric combinations have no promotion.
    pub fn promote(self, other: DType) -> Option<DType> {
        let (a, b) = (self.widened(), other.widened());
        if a == b {
            return Some(a);
        }
        match (a, b) {
            (x, y) if x.is_integer() && y.is_integer() => Some(DType::Int64),
            (x, y) if (x.is_integer() && y.is_float()) || (x.is_float() && y.is_integer()) => {
                Some(DType::Float64)
            }
            _ => None,
        }
    }
}

/// A named, typed column declaration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldDef {
    /// Column name, unique within a schema.
    pub name: String,
    /// Declared dtype.
    pub dtype: DType,
}

impl FieldDef {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// Errors raised during schema validation.
#[derive(Debug, Snafu)]
pub enum SchemaError {
    /// Two fields share a name (or a field shadows the index).
    #[snafu(display("duplicate column name: {column}"))]
    DuplicateColumn {
        /// The duplicated name.
        column: String,
    },

    /// The index field has a dtype that cannot serve as an index.
    #[snafu(display("index column {column} has non-index dtype {dtype:?}"))]
    BadIndexType {
        /// The index column name.
        column: String,
        /// The offending dtype.
        dtype: DType,
    },
}

/// An index field plus named value fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schema {
    index: FieldDef,
    fields: Vec<FieldDef>,
}

impl Schema {
    /// Build a schema, rejecting duplicate names and non-index index types.
    ///
    /// The index must be a `Timestamp`, integer, or `Utf8` column.
    pub fn new(index: FieldDef, fields: Vec<FieldDef>) -> Result<Self, SchemaError> {
        ensure!(
            matches!(
                index.dtype,
                DType::Timestamp | DType::Int64 | DType::Int32 | DType::Utf8
            ),
            BadIndexTypeSnafu {
                column: index.name.clone(),
                dtype: index.dtype,
            }
        );
        let mut seen = std::collections::HashSet::new();
        seen.insert(index.name.as_str());
        for f in &fields {
            ensure!(
                seen.insert(f.name.as_str()),
                DuplicateColumnSnafu {
                    column: f.name.clone(),
                }
            );
        }
        Ok(Self { index, fields })
    }

    /// The index field.
    pub fn index(&self) -> &FieldDef {
        &self.index
    }

    /// Value fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Find a value field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// A copy restricted to the named value columns, in this schema's order.
    ///
    /// Unknown names are ignored; the index is always retained.
    pub fn project(&self, names: &[String]) -> Schema {
        Schema {
            index: self.index.clone(),
            fields: self
                .fields
                .iter()
                .filter(|f| names.iter().any(|n| n == &f.name))
                .cloned()
                .collect(),
        }
    }

    /// Append a field, replacing any existing field of the same name.
    pub fn with_field(&self, def: FieldDef) -> Schema {
        let mut fields: Vec<FieldDef> = self
            .fields
            .iter()
            .filter(|f| f.name != def.name)
            .cloned()
            .collect();
        fields.push(def);
        Schema {
            index: self.index.clone(),
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_rejects_duplicate_columns() {
        let err = Schema::new(
            FieldDef::new("ts", DType::Timestamp),
            vec![
                FieldDef::new("x", DType::Int64),
                FieldDef::new("x", DType::Float64),
            ],
        )
        .expect_err("duplicate should be rejected");
        assert!(matches!(err, SchemaError::DuplicateColumn { column } if column == "x"));
    }

    #[test]
    fn schema_rejects_field_shadowing_index() {
        let err = Schema::new(
            FieldDef::new("ts", DType::Timestamp),
            vec![FieldDef::new("ts", DType::Int64)],
        )
        .expect_err("index shadowing should be rejected");
        assert!(matches!(err, SchemaError::DuplicateColumn { .. }));
    }

    #[test]
    fn schema_rejects_float_index() {
        let err = Schema::new(FieldDef::new("ts", DType::Float64), vec![])
            .expect_err("float index should be rejected");
        assert!(matches!(err, SchemaError::BadIndexType { .. }));
    }

    #[test]
    fn promotion_widens_and_floats_win() {
        assert_eq!(DType::Int32.promote(DType::Int64), Some(DType::Int64));
        assert_eq!(DType::Int64.promote(DType::Float32), Some(DType::Float64));
        assert_eq!(DType::UInt32.promote(DType::Int64), Some(DType::Int64));
        assert_eq!(DType::Utf8.promote(DType::Int64), None);
    }

    #[test]
    fn project_keeps_declaration_order() {
        let schema = Schema::new(
            FieldDef::new("ts", DType::Timestamp),
            vec![
                FieldDef::new("a", DType::Int64),
                FieldDef::new("b", DType::Float64),
                FieldDef::new("c", DType::Utf8),
            ],
        )
        .expect("valid schema");

        let projected = schema.project(&["c".to_string(), "a".to_string()]);
        let names: Vec<_> = projected.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
