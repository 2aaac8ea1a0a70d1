//! Row filtering by expression bitset.

use crate::arena::EntityId;
use crate::clause::{
    filter_unit, BadInputSnafu, ClauseCtx, ClauseError, OptimizationTarget,
};
use crate::expr::ExprTree;
use snafu::prelude::*;

/// Drops rows whose filter bit is zero.
#[derive(Debug)]
pub struct FilterClause {
    expr: ExprTree,
}

impl FilterClause {
    /// Build a filter; the expression root must yield a bitset.
    pub fn new(expr: ExprTree) -> Result<FilterClause, ClauseError> {
        ensure!(
            expr.yields_bitset(),
            BadInputSnafu {
                clause: "Filter",
                detail: "expression would produce a column, not a bitset".to_string(),
            }
        );
        Ok(FilterClause { expr })
    }

    /// Columns the expression reads.
    pub fn input_columns(&self) -> Vec<String> {
        self.expr.input_columns()
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        let compact = ctx.cfg.optimization == OptimizationTarget::Memory;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let unit = ctx.mgr.unit(id)?;
            let (index, columns) = crate::clause::unit_columns(ctx.mgr, &unit)?;
            let rows = index.len();
            let mask = self
                .expr
                .evaluate(rows, compact, |name| {
                    columns
                        .iter()
                        .find(|(n, _)| n == name)
                        .map(|(_, c)| c.clone())
                })?
                .into_bitset()
                .ok_or_else(|| ClauseError::BadInput {
                    clause: "Filter",
                    detail: "expression did not evaluate to a bitset".to_string(),
                })?;
            let filtered = filter_unit(ctx.mgr, &unit, &mask)?;
            ctx.mgr.release(id);
            out.push(filtered);
        }
        Ok(out)
    }
}
