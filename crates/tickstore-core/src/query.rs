//! Read-request planning: from a declarative request to a clause
//! sequence and a pruned initial key set.
//!
//! The emitted order is fixed:
//!
//! ```text
//! [DateRange?] [RowRange?] [Filter?] [Project*] [Partition Aggregation?]
//! [Resample?] [Sort?]
//! ```
//!
//! Impossible combinations fail with `InvalidPlan` before anything is
//! fetched: aggregation and resample are mutually exclusive, row ranges
//! cannot combine with date ranges (each must open the pipeline),
//! referenced columns must exist, and resampling needs a timestamp index.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::agg::NamedAggregator;
use crate::clause::{
    AggregationClause, Clause, ClauseError, ClauseKind, DateRangeClause, FilterClause,
    PartitionClause, ProjectClause, ResampleBoundary, ResampleClause, ResampleOrigin,
    ResampleRule, RowRangeClause, SortClause,
};
use crate::clause::row_range::RowRangeKind;
use crate::expr::ExprTree;
use crate::frame::{DType, Schema};
use crate::index::{IndexSegment, RangesAndKey};
use crate::keys::StreamId;

/// Errors raised while planning a read.
#[derive(Debug, Snafu)]
pub enum PlanError {
    /// The request cannot be compiled into a valid pipeline.
    #[snafu(display("invalid plan: {detail}"))]
    InvalidPlan {
        /// What was impossible.
        detail: String,
    },

    /// A clause rejected its construction parameters.
    #[snafu(transparent)]
    Clause {
        /// Underlying clause error.
        source: ClauseError,
    },
}

/// Post-filter grouping and aggregation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GroupBy {
    /// Grouping column.
    pub column: String,
    /// Reductions to apply per group.
    pub aggregators: Vec<NamedAggregator>,
}

/// Time-bucket resampling parameters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResampleSpec {
    /// Bucket rule, e.g. `"1D"`.
    pub rule: String,
    /// Closed bucket boundary.
    pub closed: ResampleBoundary,
    /// Label boundary.
    pub label: ResampleBoundary,
    /// Grid offset, nanoseconds.
    pub offset: i64,
    /// Grid origin.
    pub origin: ResampleOrigin,
    /// Reductions to apply per bucket.
    pub aggregators: Vec<NamedAggregator>,
}

/// A declarative read request.
#[derive(Clone, Debug, Default)]
pub struct ReadRequest {
    /// Version to read, else latest.
    pub as_of: Option<u64>,
    /// Column selection, else every column.
    pub columns: Option<Vec<String>>,
    /// Row-range predicate (head/tail/range). First clause only.
    pub row_range: Option<RowRangeKind>,
    /// Closed index interval, nanoseconds.
    pub date_range: Option<(i64, i64)>,
    /// Filter expression; must yield a bitset.
    pub filter: Option<ExprTree>,
    /// Projections applied in order: output name and expression.
    pub projections: Vec<(String, ExprTree)>,
    /// Post-filter aggregation.
    pub group_by: Option<GroupBy>,
    /// Time-bucket resampling.
    pub resample: Option<ResampleSpec>,
    /// Final stable sort column.
    pub sort_by: Option<String>,
    /// Speed/memory preference for intermediate bitsets.
    pub optimization: crate::clause::OptimizationTarget,
}

impl ReadRequest {
    /// An empty request: full latest read.
    pub fn new() -> ReadRequest {
        ReadRequest::default()
    }

    /// Read as of a version id.
    pub fn as_of(mut self, version: u64) -> Self {
        self.as_of = Some(version);
        self
    }

    /// Restrict to the named columns.
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    /// Keep rows in the closed index interval.
    pub fn with_date_range(mut self, start: i64, end: i64) -> Self {
        self.date_range = Some((start, end));
        self
    }

    /// Keep rows per the row-range predicate.
    pub fn with_row_range(mut self, kind: RowRangeKind) -> Self {
        self.row_range = Some(kind);
        self
    }

    /// Apply a filter expression.
    pub fn with_filter(mut self, filter: ExprTree) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Append a projection.
    pub fn with_projection(mut self, output: impl Into<String>, expr: ExprTree) -> Self {
        self.projections.push((output.into(), expr));
        self
    }

    /// Group and aggregate.
    pub fn with_group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = Some(group_by);
        self
    }

    /// Resample into time buckets.
    pub fn with_resample(mut self, spec: ResampleSpec) -> Self {
        self.resample = Some(spec);
        self
    }

    /// Sort the output.
    pub fn with_sort(mut self, column: impl Into<String>) -> Self {
        self.sort_by = Some(column.into());
        self
    }

    /// Trade evaluation speed for intermediate-bitset memory.
    pub fn optimize_for(mut self, target: crate::clause::OptimizationTarget) -> Self {
        self.optimization = target;
        self
    }
}

/// A compiled read: clause sequence, pruned key set, and the statically
/// known output schema.
#[derive(Debug)]
pub struct QueryPlan {
    /// Symbol under read.
    pub symbol: StreamId,
    /// Clause sequence, in execution order. Never empty.
    pub clauses: Vec<Clause>,
    /// Initial tile entries, restricted by the date/row predicate.
    pub initial: Vec<RangesAndKey>,
    /// Columns the loader must decode; `None` decodes everything.
    pub load_columns: Option<Vec<String>>,
    /// Schema of the assembled output frame.
    pub output_schema: Schema,
}

/// Compile `request` against a resolved version's index segment.
pub fn plan(
    symbol: StreamId,
    request: &ReadRequest,
    index: &IndexSegment,
) -> Result<QueryPlan, PlanError> {
    precheck(request, &index.schema)?;

    let mut clauses: Vec<Clause> = Vec::new();
    if let Some((start, end)) = request.date_range {
        ensure!(
            start <= end,
            InvalidPlanSnafu {
                detail: format!("date range [{start}, {end}] is inverted"),
            }
        );
        clauses.push(Clause::new(ClauseKind::DateRange(DateRangeClause::new(
            start, end,
        ))));
    }
    if let Some(kind) = request.row_range {
        clauses.push(Clause::new(ClauseKind::RowRange(RowRangeClause::new(kind))));
    }
    if let Some(filter) = &request.filter {
        clauses.push(Clause::new(ClauseKind::Filter(FilterClause::new(
            filter.clone(),
        )?)));
    }
    for (output, expr) in &request.projections {
        clauses.push(Clause::new(ClauseKind::Project(ProjectClause::new(
            output.clone(),
            expr.clone(),
        )?)));
    }
    if let Some(group_by) = &request.group_by {
        clauses.push(Clause::new(ClauseKind::Partition(PartitionClause::new(
            group_by.column.clone(),
        ))));
        clauses.push(Clause::new(ClauseKind::Aggregation(AggregationClause::new(
            group_by.column.clone(),
            group_by.aggregators.clone(),
        )?)));
    }
    if let Some(spec) = &request.resample {
        clauses.push(Clause::new(ClauseKind::Resample(ResampleClause::new(
            ResampleRule::parse(&spec.rule)?,
            spec.closed,
            spec.label,
            spec.offset,
            spec.origin,
            spec.aggregators.clone(),
        )?)));
    }
    if let Some(column) = &request.sort_by {
        clauses.push(Clause::new(ClauseKind::Sort(SortClause::new(
            column.clone(),
        ))));
    }
    if clauses.is_empty() {
        clauses.push(Clause::new(ClauseKind::Passthrough));
    }

    // Initial key set, restricted by the pushed-down predicates. The
    // first clause prunes again in structure_initial; this pass keeps
    // plans inspectable before execution.
    let initial = match request.date_range {
        Some((start, end)) => index.entries_for_index_range(
            &crate::keys::IndexValue::Ts(start),
            &crate::keys::IndexValue::Ts(end),
        ),
        None => index.entries.clone(),
    };

    // What the loader must decode.
    let load_columns = request.columns.as_ref().map(|requested| {
        let mut needed = requested.clone();
        let mut add_all = |names: Vec<String>| {
            for n in names {
                if !needed.contains(&n) {
                    needed.push(n);
                }
            }
        };
        for clause in &clauses {
            if let Some(inputs) = &clause.clause_info().input_columns {
                add_all(inputs.clone());
            }
        }
        needed
    });

    // Static output schema: projection of the source schema folded
    // through every clause's schema effect.
    let mut schema = match &request.columns {
        Some(names) => index.schema.project(names),
        None => index.schema.clone(),
    };
    // Clause inputs must be loadable even when projected away; schema
    // effects see them.
    if let Some(load) = &load_columns {
        let mut widened = schema.fields().to_vec();
        for name in load {
            if widened.iter().all(|f| &f.name != name) {
                if let Some(def) = index.schema.field(name) {
                    widened.push(def.clone());
                }
            }
        }
        schema = Schema::new(schema.index().clone(), widened).map_err(|e| {
            PlanError::InvalidPlan {
                detail: e.to_string(),
            }
        })?;
    }
    for clause in &clauses {
        schema = clause.modify_schema(schema)?;
    }
    // Requested projection wins for the assembled output.
    let output_schema = match &request.columns {
        Some(names) if request.group_by.is_none() && request.resample.is_none() => {
            let mut keep = names.clone();
            for (output, _) in &request.projections {
                if !keep.contains(output) {
                    keep.push(output.clone());
                }
            }
            schema.project(&keep)
        }
        _ => schema,
    };

    Ok(QueryPlan {
        symbol,
        clauses,
        initial,
        load_columns,
        output_schema,
    })
}

fn precheck(request: &ReadRequest, schema: &Schema) -> Result<(), PlanError> {
    ensure!(
        !(request.group_by.is_some() && request.resample.is_some()),
        InvalidPlanSnafu {
            detail: "aggregation and resample cannot combine in one read".to_string(),
        }
    );
    ensure!(
        !(request.row_range.is_some() && request.date_range.is_some()),
        InvalidPlanSnafu {
            detail: "row range and date range each require the first position".to_string(),
        }
    );
    if request.resample.is_some() {
        ensure!(
            schema.index().dtype != DType::Utf8,
            InvalidPlanSnafu {
                detail: "resample requires a timestamp index".to_string(),
            }
        );
    }
    if let Some(group_by) = &request.group_by {
        ensure!(
            !group_by.aggregators.is_empty(),
            InvalidPlanSnafu {
                detail: "aggregation without aggregators".to_string(),
            }
        );
    }

    // Column references must resolve, with projections visible to later
    // consumers in order.
    let mut known: Vec<String> = schema.fields().iter().map(|f| f.name.clone()).collect();
    known.push(schema.index().name.clone());
    let check = |names: &[String], known: &[String], what: &str| -> Result<(), PlanError> {
        for name in names {
            ensure!(
                known.iter().any(|k| k == name),
                InvalidPlanSnafu {
                    detail: format!("{what} references unknown column {name}"),
                }
            );
        }
        Ok(())
    };

    if let Some(columns) = &request.columns {
        check(columns, &known, "column selection")?;
    }
    if let Some(filter) = &request.filter {
        check(&filter.input_columns(), &known, "filter")?;
    }
    for (output, expr) in &request.projections {
        check(&expr.input_columns(), &known, "projection")?;
        if !known.contains(output) {
            known.push(output.clone());
        }
    }
    if let Some(group_by) = &request.group_by {
        check(
            &[group_by.column.clone()],
            &known,
            "aggregation grouping",
        )?;
        let inputs: Vec<String> = group_by
            .aggregators
            .iter()
            .map(|a| a.input.clone())
            .collect();
        check(&inputs, &known, "aggregation")?;
    }
    if let Some(spec) = &request.resample {
        let inputs: Vec<String> = spec.aggregators.iter().map(|a| a.input.clone()).collect();
        check(&inputs, &known, "resample")?;
    }
    if let Some(sort) = &request.sort_by {
        // Aggregation and resample rewrite the schema; defer their sort
        // validation to execution.
        if request.group_by.is_none() && request.resample.is_none() {
            check(&[sort.clone()], &known, "sort")?;
        }
    }
    Ok(())
}
