//! Index segments: the tile→key map of a committed version.
//!
//! Each version's index root is an atom key whose payload is an
//! [`IndexSegment`]: the symbol's schema, total row count, and one
//! [`RangesAndKey`] entry per data tile giving its row range, column
//! range, index bounds, and data key. Entries are sorted by row start and
//! then column start; for append-only symbols the index bounds of
//! successive row slices are non-overlapping and sorted.
//!
//! Index payloads stay JSON so a chain can be audited with basic tools,
//! matching the version-node convention.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::frame::Schema;
use crate::keys::{AtomKey, IndexValue};

/// Errors raised while reading index segments.
#[derive(Debug, Snafu)]
pub enum IndexError {
    /// The payload failed to parse.
    #[snafu(display("corrupt index segment: {detail}"))]
    CorruptIndex {
        /// Parser diagnostic.
        detail: String,
    },
}

/// Half-open global row interval `[start, end)`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RowRange {
    /// First row (inclusive).
    pub start: u64,
    /// One past the last row.
    pub end: u64,
}

impl RowRange {
    /// Rows covered.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// True when the range covers no rows.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True when `[start, end)` intersects `other`.
    pub fn intersects(&self, other: &RowRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Half-open column interval `[start, end)` over the schema's value
/// columns.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ColRange {
    /// First column (inclusive).
    pub start: u64,
    /// One past the last column.
    pub end: u64,
}

/// One data tile: where it sits and which key holds it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RangesAndKey {
    /// Global row interval of the tile.
    pub row_range: RowRange,
    /// Column interval of the tile.
    pub col_range: ColRange,
    /// Lowest index value in the tile.
    pub start_index: IndexValue,
    /// Highest index value in the tile.
    pub end_index: IndexValue,
    /// Data segment key.
    pub key: AtomKey,
}

impl RangesAndKey {
    /// True when the tile's closed index interval could intersect the
    /// closed probe interval `[lo, hi]`. Incomparable bounds (mixed
    /// numeric/string indexes) stay conservative.
    pub fn may_intersect_index(&self, lo: &IndexValue, hi: &IndexValue) -> bool {
        use std::cmp::Ordering;
        let disjoint_low = matches!(
            self.end_index.partial_cmp(lo),
            Some(Ordering::Less)
        );
        let disjoint_high = matches!(
            self.start_index.partial_cmp(hi),
            Some(Ordering::Greater)
        );
        !(disjoint_low || disjoint_high)
    }
}

/// The persisted tile map of one committed version.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IndexSegment {
    /// Schema of the version.
    pub schema: Schema,
    /// Total logical rows in the version.
    pub total_rows: u64,
    /// Tile entries, sorted by `(row_range.start, col_range.start)`.
    pub entries: Vec<RangesAndKey>,
}

impl IndexSegment {
    /// Serialize to the canonical JSON payload.
    pub fn to_bytes(&self) -> Result<Bytes, IndexError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| IndexError::CorruptIndex {
                detail: format!("serialize: {e}"),
            })
    }

    /// Parse the canonical JSON payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<IndexSegment, IndexError> {
        serde_json::from_slice(bytes).map_err(|e| IndexError::CorruptIndex {
            detail: format!("parse: {e}"),
        })
    }

    /// Entries restricted to tiles that could carry index values in the
    /// closed interval `[lo, hi]`. Tiles entirely outside never surface,
    /// so they are never fetched or decoded.
    pub fn entries_for_index_range(
        &self,
        lo: &IndexValue,
        hi: &IndexValue,
    ) -> Vec<RangesAndKey> {
        self.entries
            .iter()
            .filter(|e| e.may_intersect_index(lo, hi))
            .cloned()
            .collect()
    }

    /// Entries restricted to tiles intersecting the global row interval.
    pub fn entries_for_row_range(&self, rows: &RowRange) -> Vec<RangesAndKey> {
        self.entries
            .iter()
            .filter(|e| e.row_range.intersects(rows))
            .cloned()
            .collect()
    }

    /// The overall index bounds of the version, if any rows exist.
    pub fn index_bounds(&self) -> Option<(IndexValue, IndexValue)> {
        let first = self.entries.first()?.start_index.clone();
        let last = self
            .entries
            .iter()
            .map(|e| &e.end_index)
            .max_by(|a, b| {
                a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
            })?
            .clone();
        Some((first, last))
    }
}
