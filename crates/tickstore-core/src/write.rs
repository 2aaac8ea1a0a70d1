//! Frame slicing and tile writing.
//!
//! Incoming frames are partitioned along two axes; `row_slice_size` rows
//! by `col_slice_size` columns; and every tile becomes one segment: the
//! tile's columns plus a copy of the index column covering its rows, so a
//! tile can be range-filtered without its neighbors. Tiles encode in
//! parallel on the rayon pool and persist concurrently up to the
//! write-parallelism cap; the resulting [`RangesAndKey`] entries feed the
//! index segment the commit will reference.
//!
//! Appends reuse the same tiling with a row offset, which may produce a
//! partial row tile at the seam; the index keeps tiles sorted so seams are
//! invisible to readers.

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use rayon::prelude::*;
use snafu::prelude::*;

use crate::config::RuntimeConfig;
use crate::frame::{Frame, FrameError, Scalar, Schema};
use crate::index::{ColRange, IndexSegment, RangesAndKey, RowRange};
use crate::keys::{AtomKey, IndexValue, KeyType, StreamId};
use crate::segment::{self, CodecError, EncodeOptions, Segment};
use crate::version::node::atom_key_for;
use crate::version::{VersionError, VersionStore};

/// Errors raised on the write path.
#[derive(Debug, Snafu)]
pub enum WriteError {
    /// The frame's index column is not sorted.
    #[snafu(display("index column {column} must be sorted non-decreasing"))]
    UnsortedIndex {
        /// The index column name.
        column: String,
    },

    /// The frame's schema does not match the symbol's.
    #[snafu(display("schema mismatch: {detail}"))]
    SchemaMismatch {
        /// What differed.
        detail: String,
    },

    /// The frame's index carries nulls.
    #[snafu(display("index column {column} must not contain nulls"))]
    NullIndex {
        /// The index column name.
        column: String,
    },

    /// Frame assembly failure.
    #[snafu(transparent)]
    Frame {
        /// Underlying frame error.
        source: FrameError,
    },

    /// Segment encoding failure.
    #[snafu(display("tile encode failed: {source}"))]
    Encode {
        /// Underlying codec error.
        source: CodecError,
    },

    /// Version-chain failure.
    #[snafu(transparent)]
    Version {
        /// Underlying version error.
        source: VersionError,
    },
}

/// Tiles written for one frame, ready to index.
#[derive(Debug)]
pub struct WrittenTiles {
    /// Index entries for the new tiles, sorted by row then column start.
    pub entries: Vec<RangesAndKey>,
    /// Rows covered by the frame.
    pub rows: u64,
}

/// Slices frames into tiles and persists them.
#[derive(Clone, Debug)]
pub struct FrameWriter {
    versions: VersionStore,
    config: RuntimeConfig,
}

impl FrameWriter {
    /// Build a writer over a version store.
    pub fn new(versions: VersionStore, config: RuntimeConfig) -> Self {
        Self { versions, config }
    }

    /// Validate a frame against the symbol's committed schema.
    pub fn check_schema(expected: &Schema, frame: &Frame) -> Result<(), WriteError> {
        ensure!(
            expected == frame.schema(),
            SchemaMismatchSnafu {
                detail: format!(
                    "symbol expects {:?}, frame carries {:?}",
                    expected, frame.schema()
                ),
            }
        );
        Ok(())
    }

    /// Validate the frame's index column: present, non-null, sorted.
    pub fn check_index(frame: &Frame) -> Result<(), WriteError> {
        let name = &frame.schema().index().name;
        ensure!(
            frame.index().present_count() == frame.num_rows(),
            NullIndexSnafu {
                column: name.clone(),
            }
        );
        ensure!(
            frame.index().is_sorted(),
            UnsortedIndexSnafu {
                column: name.clone(),
            }
        );
        Ok(())
    }

    /// Slice `frame` into tiles, encode, and persist them under
    /// `version_id`, with global rows starting at `row_offset`.
    ///
    /// `key_type` is [`KeyType::TableData`] for committed writes and
    /// [`KeyType::AppendData`] for staged ones.
    pub async fn write_tiles(
        &self,
        symbol: &StreamId,
        version_id: u64,
        frame: &Frame,
        row_offset: u64,
        key_type: KeyType,
    ) -> Result<WrittenTiles, WriteError> {
        Self::check_index(frame)?;
        if frame.num_rows() == 0 {
            return Ok(WrittenTiles {
                entries: Vec::new(),
                rows: 0,
            });
        }

        let tiles = self.plan_tiles(frame, row_offset);
        let opts = EncodeOptions {
            encoding_version: self.config.encoding_version,
            ..EncodeOptions::default()
        };

        // CPU-parallel encode of every tile.
        let encoded: Vec<(TilePlan, Bytes)> = tiles
            .into_par_iter()
            .map(|plan| {
                let tile_frame = plan.materialize(frame)?;
                let segment = Segment::from_frame(&tile_frame, None);
                let bytes = segment::encode(&segment, &opts).context(EncodeSnafu)?;
                Ok((plan, bytes))
            })
            .collect::<Result<Vec<_>, WriteError>>()?;

        // Concurrent once-only puts, bounded by write parallelism.
        let entries: Vec<RangesAndKey> = stream::iter(encoded.into_iter().map(
            |(plan, bytes)| {
                let versions = self.versions.clone();
                let symbol = symbol.clone();
                async move {
                    let bounds = plan.index_bounds(frame)?;
                    let key = atom_key_for(
                        symbol,
                        key_type,
                        version_id,
                        &bytes,
                        Some(bounds.clone()),
                    );
                    versions.put_atom(&key, bytes).await?;
                    Ok::<RangesAndKey, WriteError>(RangesAndKey {
                        row_range: plan.rows_global,
                        col_range: plan.cols,
                        start_index: bounds.0,
                        end_index: bounds.1,
                        key,
                    })
                }
            },
        ))
        .buffered(self.config.write_parallelism.max(1))
        .try_collect()
        .await?;

        let mut entries = entries;
        entries.sort_by_key(|e| (e.row_range.start, e.col_range.start));
        Ok(WrittenTiles {
            entries,
            rows: frame.num_rows() as u64,
        })
    }

    /// Persist an index segment and return its atom key.
    pub async fn write_index(
        &self,
        symbol: &StreamId,
        version_id: u64,
        index: &IndexSegment,
    ) -> Result<AtomKey, WriteError> {
        let payload = index
            .to_bytes()
            .map_err(|e| WriteError::SchemaMismatch {
                detail: format!("index serialize: {e}"),
            })?;
        let key = atom_key_for(
            symbol.clone(),
            KeyType::TableIndex,
            version_id,
            &payload,
            index.index_bounds(),
        );
        self.versions.put_atom(&key, payload).await?;
        Ok(key)
    }

    /// Row×column tiling of a frame.
    fn plan_tiles(&self, frame: &Frame, row_offset: u64) -> Vec<TilePlan> {
        let rows = frame.num_rows();
        let cols = frame.schema().fields().len();
        let row_step = self.config.row_slice_size.max(1);
        let col_step = self.config.col_slice_size.max(1);

        let mut plans = Vec::new();
        let mut r = 0usize;
        while r < rows.max(1) {
            let r_end = r.saturating_add(row_step).min(rows);
            let mut c = 0usize;
            loop {
                let c_end = c.saturating_add(col_step).min(cols);
                plans.push(TilePlan {
                    rows_local: RowRange {
                        start: r as u64,
                        end: r_end as u64,
                    },
                    rows_global: RowRange {
                        start: row_offset + r as u64,
                        end: row_offset + r_end as u64,
                    },
                    cols: ColRange {
                        start: c as u64,
                        end: c_end as u64,
                    },
                });
                if c_end >= cols {
                    break;
                }
                c = c_end;
            }
            if r_end >= rows {
                break;
            }
            r = r_end;
        }
        plans
    }
}

/// One tile's coordinates before materialization.
#[derive(Clone, Copy, Debug)]
struct TilePlan {
    rows_local: RowRange,
    rows_global: RowRange,
    cols: ColRange,
}

impl TilePlan {
    /// Cut the tile's rows and columns out of the source frame.
    fn materialize(&self, frame: &Frame) -> Result<Frame, WriteError> {
        let sliced = frame.slice_rows(self.rows_local.start as usize, self.rows_local.end as usize);
        let names: Vec<String> = sliced.schema().fields()
            [self.cols.start as usize..self.cols.end as usize]
            .iter()
            .map(|f| f.name.clone())
            .collect();
        let schema = sliced.schema().project(&names);
        let columns = schema
            .fields()
            .iter()
            .filter_map(|f| sliced.column(&f.name).cloned())
            .collect();
        Ok(Frame::new(schema, sliced.index().clone(), columns)?)
    }

    /// First/last index values of the tile's rows.
    fn index_bounds(&self, frame: &Frame) -> Result<(IndexValue, IndexValue), WriteError> {
        let to_index = |s: Option<Scalar>| match s {
            Some(Scalar::I64(v)) => Ok(IndexValue::Ts(v)),
            Some(Scalar::Utf8(v)) => Ok(IndexValue::Str(v)),
            other => Err(WriteError::SchemaMismatch {
                detail: format!("index value {other:?} is not indexable"),
            }),
        };
        let lo = to_index(frame.index().scalar_at(self.rows_local.start as usize))?;
        let hi = to_index(
            frame
                .index()
                .scalar_at((self.rows_local.end as usize).saturating_sub(1).max(self.rows_local.start as usize)),
        )?;
        Ok((lo, hi))
    }
}
