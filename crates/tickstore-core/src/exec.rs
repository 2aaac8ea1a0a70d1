//! Pipeline execution over processing-unit groups.
//!
//! Clause sequences run as chains of tokio tasks. The pipeline splits at
//! `All`-structure clauses: between barriers, each group's chain runs
//! independently; a downstream clause starts on a row slice as soon as
//! that slice's upstream finished, without waiting for siblings. At a
//! barrier every chain joins, the barrier clause restructures the groups,
//! and its units process concurrently before the next stretch begins.
//!
//! A semaphore bounds in-flight groups per stage; upstream tasks suspend
//! on it when the high-water mark is reached. Cancellation is
//! cooperative: every chain observes the token at its suspension points
//! (before loads and between clauses) and fails with `Cancelled`;
//! entities already materialized drain through the arena's reference
//! counts when the query's arena is dropped. Timeouts are modelled as a
//! cancellation source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use snafu::prelude::*;
use tokio::sync::Semaphore;

use crate::arena::{ComponentManager, EntityId};
use crate::clause::{Clause, ClauseError, ProcessingStructure};
use crate::index::{RangesAndKey, RowRange};
use crate::segment::{self, CodecError};
use crate::version::{VersionError, VersionStore};

/// Errors raised by pipeline execution.
#[derive(Debug, Snafu)]
pub enum ExecError {
    /// The query's cancellation token tripped.
    #[snafu(display("query cancelled{}", location_suffix(clause, slice)))]
    Cancelled {
        /// Clause in flight, if any.
        clause: Option<&'static str>,
        /// Slice ordinal in flight, if any.
        slice: Option<usize>,
    },

    /// A clause failed; tagged with clause and slice identity.
    #[snafu(display("clause {clause} failed on slice {slice}: {source}"))]
    ClauseFailed {
        /// The failing clause.
        clause: &'static str,
        /// Slice ordinal.
        slice: usize,
        /// Underlying clause error.
        source: ClauseError,
    },

    /// A data segment failed to load or decode.
    #[snafu(display("failed to load segment {key}: {source}"))]
    SegmentLoad {
        /// The key being loaded.
        key: String,
        /// Underlying version/storage error.
        source: VersionError,
    },

    /// A data segment failed to decode.
    #[snafu(display("failed to decode segment {key}: {source}"))]
    SegmentDecode {
        /// The key being decoded.
        key: String,
        /// Underlying codec error.
        source: CodecError,
    },

    /// A worker task aborted.
    #[snafu(display("pipeline worker panicked: {detail}"))]
    WorkerLost {
        /// Join error rendering.
        detail: String,
    },
}

fn location_suffix(clause: &Option<&'static str>, slice: &Option<usize>) -> String {
    match (clause, slice) {
        (Some(c), Some(s)) => format!(" (clause {c}, slice {s})"),
        (Some(c), None) => format!(" (clause {c})"),
        _ => String::new(),
    }
}

/// Cooperative cancellation handle; cloned into every chain.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    tripped: Arc<AtomicBool>,
}

impl CancelToken {
    /// Fresh untripped token.
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Trip the token; in-flight tasks observe it at their next
    /// suspension point.
    pub fn cancel(&self) {
        self.tripped.store(true, Ordering::Release);
    }

    /// True once tripped.
    pub fn is_cancelled(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Fail with `Cancelled` once tripped.
    pub fn check(
        &self,
        clause: Option<&'static str>,
        slice: Option<usize>,
    ) -> Result<(), ExecError> {
        if self.is_cancelled() {
            return CancelledSnafu { clause, slice }.fail();
        }
        Ok(())
    }

    /// Derive a cancellation source that trips after `timeout`.
    pub fn trip_after(&self, timeout: std::time::Duration) {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel();
        });
    }
}

/// Schedules clause chains over processing-unit groups.
pub struct PipelineExecutor {
    versions: VersionStore,
    mgr: Arc<ComponentManager>,
    high_water: usize,
    token: CancelToken,
}

impl PipelineExecutor {
    /// Build an executor bound to a query's arena.
    pub fn new(
        versions: VersionStore,
        mgr: Arc<ComponentManager>,
        high_water: usize,
        token: CancelToken,
    ) -> PipelineExecutor {
        PipelineExecutor {
            versions,
            mgr,
            high_water: high_water.max(1),
            token,
        }
    }

    /// Run `clauses` over the pruned initial key set, returning the final
    /// entity groups in output order.
    ///
    /// `columns` restricts what the loader decodes; the index column
    /// always decodes.
    pub async fn execute(
        &self,
        clauses: Vec<Arc<Clause>>,
        mut initial: Vec<RangesAndKey>,
        columns: Option<Vec<String>>,
    ) -> Result<Vec<Vec<EntityId>>, ExecError> {
        let Some(first) = clauses.first() else {
            return Ok(Vec::new());
        };
        let index_groups = first
            .structure_initial(&mut initial)
            .map_err(|source| ExecError::ClauseFailed {
                clause: first.clause_info().name,
                slice: 0,
                source,
            })?;
        let initial = Arc::new(initial);
        let columns = columns.map(Arc::new);
        let semaphore = Arc::new(Semaphore::new(self.high_water));

        // Kick off one chain per group: load, then run the leading
        // row-slice stretch.
        let leading = leading_stretch(&clauses);
        let mut chains: Vec<tokio::task::JoinHandle<Result<Vec<EntityId>, ExecError>>> =
            Vec::with_capacity(index_groups.len());
        for (slice, members) in index_groups.into_iter().enumerate() {
            let loader = self.chain_task(
                slice,
                members,
                Arc::clone(&initial),
                columns.clone(),
                leading.clone(),
                Arc::clone(&semaphore),
            );
            chains.push(tokio::spawn(loader));
        }

        // Walk the remaining pipeline barrier by barrier.
        let mut groups = join_chains(chains).await?;
        let mut clause_idx = leading.len();
        for clause in clauses.iter().take(clause_idx) {
            clause.mark_drained();
        }
        while clause_idx < clauses.len() {
            let barrier = Arc::clone(&clauses[clause_idx]);
            clause_idx += 1;
            self.token.check(Some(barrier.clause_info().name), None)?;

            let regrouped = barrier
                .structure_for_processing(groups)
                .map_err(|source| ExecError::ClauseFailed {
                    clause: barrier.clause_info().name,
                    slice: 0,
                    source,
                })?;

            // The barrier's own units, then the following row-slice
            // stretch, again chain per group.
            let stretch: Vec<Arc<Clause>> = {
                let mut stretch = vec![Arc::clone(&barrier)];
                while clause_idx < clauses.len()
                    && clauses[clause_idx].clause_info().structure
                        == ProcessingStructure::RowSlice
                {
                    stretch.push(Arc::clone(&clauses[clause_idx]));
                    clause_idx += 1;
                }
                stretch
            };

            let mut chains = Vec::with_capacity(regrouped.len());
            for (slice, ids) in regrouped.into_iter().enumerate() {
                let stretch = stretch.clone();
                let token = self.token.clone();
                let semaphore = Arc::clone(&semaphore);
                chains.push(tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| ExecError::WorkerLost {
                            detail: e.to_string(),
                        })?;
                    run_stretch(&stretch, ids, slice, &token)
                }));
            }
            groups = join_chains(chains).await?;
            for clause in &stretch {
                clause.mark_drained();
            }
        }

        Ok(groups)
    }

    /// The query's cancellation token.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    fn chain_task(
        &self,
        slice: usize,
        members: Vec<usize>,
        initial: Arc<Vec<RangesAndKey>>,
        columns: Option<Arc<Vec<String>>>,
        stretch: Vec<Arc<Clause>>,
        semaphore: Arc<Semaphore>,
    ) -> impl std::future::Future<Output = Result<Vec<EntityId>, ExecError>> + Send + 'static
    {
        let versions = self.versions.clone();
        let mgr = Arc::clone(&self.mgr);
        let token = self.token.clone();
        async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| ExecError::WorkerLost {
                    detail: e.to_string(),
                })?;
            token.check(None, Some(slice))?;
            let wanted = columns.as_ref().map(|c| c.as_slice());
            let ids = load_group(&versions, &mgr, &initial, &members, wanted).await?;
            run_stretch(&stretch, ids, slice, &token)
        }
    }
}

/// The row-slice clauses before the first barrier; they chain per group
/// without any synchronization point.
fn leading_stretch(clauses: &[Arc<Clause>]) -> Vec<Arc<Clause>> {
    clauses
        .iter()
        .take_while(|c| c.clause_info().structure == ProcessingStructure::RowSlice)
        .cloned()
        .collect()
}

/// Run one group through a stretch of clauses.
fn run_stretch(
    stretch: &[Arc<Clause>],
    mut ids: Vec<EntityId>,
    slice: usize,
    token: &CancelToken,
) -> Result<Vec<EntityId>, ExecError> {
    for clause in stretch {
        token.check(Some(clause.clause_info().name), Some(slice))?;
        ids = clause
            .process(ids)
            .map_err(|source| ExecError::ClauseFailed {
                clause: clause.clause_info().name,
                slice,
                source,
            })?;
    }
    Ok(ids)
}

/// Await chains in order, preserving group order in the output.
async fn join_chains(
    chains: Vec<tokio::task::JoinHandle<Result<Vec<EntityId>, ExecError>>>,
) -> Result<Vec<Vec<EntityId>>, ExecError> {
    let mut out = Vec::with_capacity(chains.len());
    for chain in chains {
        let ids = chain.await.map_err(|e| ExecError::WorkerLost {
            detail: e.to_string(),
        })??;
        out.push(ids);
    }
    Ok(out)
}

/// Fetch and decode one group's tiles into processing units, one unit per
/// row slice, tiles of the same row slice folded column-wise.
async fn load_group(
    versions: &VersionStore,
    mgr: &Arc<ComponentManager>,
    initial: &[RangesAndKey],
    members: &[usize],
    columns: Option<&[String]>,
) -> Result<Vec<EntityId>, ExecError> {
    let mut by_rows: Vec<(RowRange, Vec<&RangesAndKey>)> = Vec::new();
    for &i in members {
        let entry = &initial[i];
        match by_rows.iter_mut().find(|(r, _)| *r == entry.row_range) {
            Some((_, tiles)) => tiles.push(entry),
            None => by_rows.push((entry.row_range, vec![entry])),
        }
    }
    by_rows.sort_by_key(|(r, _)| r.start);

    let mut out = Vec::with_capacity(by_rows.len());
    for (row_range, tiles) in by_rows {
        let mut index_col = None;
        let mut unit_columns: Vec<(String, crate::frame::Column)> = Vec::new();
        for entry in tiles {
            let key_name = entry.key.object_name();
            let bytes = versions
                .get_atom(&entry.key)
                .await
                .map_err(|source| ExecError::SegmentLoad {
                    key: key_name.clone(),
                    source,
                })?;
            let segment = segment::decode_columns(&bytes, columns).map_err(|source| {
                ExecError::SegmentDecode {
                    key: key_name,
                    source,
                }
            })?;
            if index_col.is_none() {
                index_col = Some(segment.index.clone());
            }
            for (def, col) in segment.schema.fields().iter().zip(&segment.columns) {
                if !unit_columns.iter().any(|(n, _)| n == &def.name) {
                    unit_columns.push((def.name.clone(), col.clone()));
                }
            }
        }
        let Some(index) = index_col else { continue };
        out.push(crate::clause::insert_unit(
            mgr,
            row_range,
            index,
            unit_columns,
            None,
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::ClauseKind;

    #[test]
    fn cancel_token_trips_checks() {
        let token = CancelToken::new();
        assert!(token.check(None, None).is_ok());
        token.cancel();
        let err = token.check(Some("Filter"), Some(3)).expect_err("tripped");
        assert!(matches!(
            err,
            ExecError::Cancelled {
                clause: Some("Filter"),
                slice: Some(3),
            }
        ));
    }

    #[tokio::test]
    async fn timeout_is_a_cancellation_source() {
        let token = CancelToken::new();
        token.trip_after(std::time::Duration::from_millis(5));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(token.is_cancelled());
    }

    #[test]
    fn leading_stretch_stops_at_first_barrier() {
        let clauses = vec![
            Arc::new(Clause::new(ClauseKind::Passthrough)),
            Arc::new(Clause::new(ClauseKind::Sort(
                crate::clause::SortClause::new("<index>"),
            ))),
            Arc::new(Clause::new(ClauseKind::Passthrough)),
        ];
        assert_eq!(
            leading_stretch(&clauses).len(),
            1,
            "sort barrier ends the leading stretch"
        );
    }
}
