//! Computed-column projection.

use snafu::prelude::*;

use crate::arena::EntityId;
use crate::clause::{insert_unit, unit_columns, BadInputSnafu, ClauseCtx, ClauseError};
use crate::expr::{BinaryOp, ExprNode, ExprTree};
use crate::frame::{DType, FieldDef, Scalar, Schema};

/// Evaluates an expression into one output column appended to the slice.
#[derive(Debug)]
pub struct ProjectClause {
    output: String,
    expr: ExprTree,
}

impl ProjectClause {
    /// Build a projection; the expression root must be an expression or
    /// value, not a bitset.
    pub fn new(output: impl Into<String>, expr: ExprTree) -> Result<ProjectClause, ClauseError> {
        ensure!(
            !expr.yields_bitset(),
            BadInputSnafu {
                clause: "Project",
                detail: "expression would produce a bitset, not a column".to_string(),
            }
        );
        Ok(ProjectClause {
            output: output.into(),
            expr,
        })
    }

    /// Columns the expression reads.
    pub fn input_columns(&self) -> Vec<String> {
        self.expr.input_columns()
    }

    /// The projected column's name.
    pub fn output_column(&self) -> &str {
        &self.output
    }

    /// Static dtype of the projected column given the input schema.
    fn output_dtype(&self, schema: &Schema) -> DType {
        // Float wins any promotion; division always floats.
        let mut float = false;
        for name in self.expr.input_columns() {
            if let Some(def) = schema.field(&name) {
                float |= def.dtype.is_float();
            }
        }
        float |= expr_has_float(&self.expr);
        if float {
            DType::Float64
        } else {
            DType::Int64
        }
    }

    pub(crate) fn modify_schema(&self, schema: Schema) -> Result<Schema, ClauseError> {
        let dtype = self.output_dtype(&schema);
        Ok(schema.with_field(FieldDef::new(self.output.clone(), dtype)))
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let unit = ctx.mgr.unit(id)?;
            let (index, mut columns) = unit_columns(ctx.mgr, &unit)?;
            let rows = index.len();
            let value = self.expr.evaluate(rows, false, |name| {
                columns
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, c)| c.clone())
            })?;
            let projected = value.into_column(rows).ok_or_else(|| ClauseError::BadInput {
                clause: "Project",
                detail: "expression evaluated to a bitset".to_string(),
            })?;
            columns.retain(|(n, _)| n != &self.output);
            columns.push((self.output.clone(), projected));
            let replacement = insert_unit(ctx.mgr, unit.row_range, index, columns, unit.bucket);
            ctx.mgr.release(id);
            out.push(replacement);
        }
        Ok(out)
    }
}

fn expr_has_float(expr: &ExprTree) -> bool {
    expr.nodes().iter().any(|node| match node {
        ExprNode::Value(Scalar::F64(_)) => true,
        ExprNode::Binary { op, .. } => *op == BinaryOp::Div,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ComponentManager;
    use crate::clause::{Clause, ClauseKind, ProcessingConfig};
    use crate::frame::Column;
    use crate::index::RowRange;
    use std::sync::Arc;

    fn doubled(output: &str, input: &str) -> ProjectClause {
        let mut b = ExprTree::builder();
        let x = b.column(input);
        let two = b.value(Scalar::I64(2));
        let root = b.binary(BinaryOp::Mul, x, two);
        ProjectClause::new(output, b.build(root).expect("tree")).expect("project")
    }

    #[test]
    fn projection_appends_output_column() {
        let mgr = Arc::new(ComponentManager::new());
        let unit = crate::clause::insert_unit(
            &mgr,
            RowRange { start: 0, end: 3 },
            Column::from_i64(DType::Timestamp, vec![0, 1, 2]),
            vec![(
                "x".to_string(),
                Column::from_i64(DType::Int64, vec![1, 2, 3]),
            )],
            None,
        );

        let mut clause = Clause::new(ClauseKind::Project(doubled("y", "x")));
        clause
            .set_processing_config(&ProcessingConfig::default())
            .expect("config");
        clause.set_component_manager(Arc::clone(&mgr)).expect("mgr");

        let out = clause.process(vec![unit]).expect("process");
        let result = mgr.unit(out[0]).expect("unit");
        let (_, columns) = unit_columns(&mgr, &result).expect("columns");
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].0, "y");
        assert_eq!(columns[1].1.i64_values(), Some(&[2i64, 4, 6][..]));
    }

    #[test]
    fn schema_effect_adds_typed_field() {
        let schema = Schema::new(
            FieldDef::new("ts", DType::Timestamp),
            vec![FieldDef::new("x", DType::Int64)],
        )
        .expect("schema");
        let clause = doubled("y", "x");
        let out = clause.modify_schema(schema).expect("schema");
        assert_eq!(
            out.field("y").map(|f| f.dtype),
            Some(DType::Int64)
        );

        let float_schema = Schema::new(
            FieldDef::new("ts", DType::Timestamp),
            vec![FieldDef::new("x", DType::Float64)],
        )
        .expect("schema");
        let out = doubled("y", "x").modify_schema(float_schema).expect("schema");
        assert_eq!(out.field("y").map(|f| f.dtype), Some(DType::Float64));
    }

    #[test]
    fn bitset_root_is_rejected() {
        let mut b = ExprTree::builder();
        let x = b.column("x");
        let v = b.value(Scalar::I64(0));
        let root = b.binary(BinaryOp::Gt, x, v);
        let err =
            ProjectClause::new("y", b.build(root).expect("tree")).expect_err("bitset root");
        assert!(matches!(err, ClauseError::BadInput { .. }));
    }
}
