//! Per-column statistics emission.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::arena::EntityId;
use crate::clause::{unit_columns, ClauseCtx, ClauseError};
use crate::segment::FieldStats;

/// Collected statistics, keyed by column name; one entry per column per
/// processing unit.
pub type StatsCollector = Arc<Mutex<Vec<(String, FieldStats)>>>;

/// Passes units through unchanged while recording per-column summary
/// statistics into a shared collector. The store persists the collected
/// artifact after the pipeline drains.
#[derive(Debug)]
pub struct ColumnStatsClause {
    columns: Option<Vec<String>>,
    collected: StatsCollector,
}

impl ColumnStatsClause {
    /// Record stats for `columns`, or every column when `None`.
    pub fn new(columns: Option<Vec<String>>) -> ColumnStatsClause {
        ColumnStatsClause {
            columns,
            collected: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The clause's required inputs.
    pub fn input_columns(&self) -> Option<Vec<String>> {
        self.columns.clone()
    }

    /// Shared handle to the collected statistics.
    pub fn collector(&self) -> StatsCollector {
        Arc::clone(&self.collected)
    }

    pub(crate) fn process(
        &self,
        ctx: &ClauseCtx<'_>,
        ids: Vec<EntityId>,
    ) -> Result<Vec<EntityId>, ClauseError> {
        for &id in &ids {
            let unit = ctx.mgr.unit(id)?;
            let (_, columns) = unit_columns(ctx.mgr, &unit)?;
            let mut collected = self.collected.lock();
            for (name, col) in &columns {
                let wanted = self
                    .columns
                    .as_ref()
                    .map_or(true, |names| names.iter().any(|n| n == name));
                if wanted {
                    collected.push((name.clone(), FieldStats::from_column(col)));
                }
            }
        }
        Ok(ids)
    }
}
