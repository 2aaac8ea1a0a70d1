//! Convenience imports for typical store usage.
//!
//! ```no_run
//! use tickstore::prelude::*;
//! ```

pub use tickstore_core::agg::{AggOp, NamedAggregator};
pub use tickstore_core::clause::row_range::RowRangeKind;
pub use tickstore_core::clause::{
    JoinType, OptimizationTarget, ResampleBoundary, ResampleOrigin,
};
pub use tickstore_core::config::RuntimeConfig;
pub use tickstore_core::error::{ErrorKind, StoreError, StoreResult};
pub use tickstore_core::exec::CancelToken;
pub use tickstore_core::expr::{BinaryOp, ExprTree, UnaryOp};
pub use tickstore_core::frame::{Column, DType, FieldDef, Frame, Scalar, Schema};
pub use tickstore_core::keys::StreamId;
pub use tickstore_core::query::{GroupBy, ReadRequest, ResampleSpec};
pub use tickstore_core::storage::{Backend, LocalBackend, MemoryBackend};
pub use tickstore_core::store::TickStore;
