//! Core engine for a versioned, columnar time-series object store.
//!
//! A symbol (named dataset) is written, appended, updated, read back,
//! filtered, projected, grouped, resampled, and merged; every successful
//! mutation produces a new version, and previous versions stay readable
//! until garbage-collected. On disk the store is a content-addressed
//! object namespace of immutable segments; in memory the read path is a
//! staged clause pipeline over column slices.
//!
//! Layers, leaves first:
//!
//! - [`segment`]: the self-describing binary container with per-block
//!   integrity hashes and codec selection.
//! - [`keys`]: typed atom/ref keys and their bijective textual form.
//! - [`storage`]: the pluggable key→bytes backend adapter (filesystem,
//!   in-memory, object stores) with ref-key compare-and-swap.
//! - [`version`]: per-symbol version chains, snapshots, head caching,
//!   and mark-and-sweep garbage collection.
//! - [`write`]: frame slicing into row×column tiles and parallel tile
//!   persistence.
//! - [`arena`]: the reference-counted entity arena queries run in.
//! - [`expr`] / [`agg`] / [`clause`]: the transformation operators.
//! - [`exec`]: the work-stealing pipeline executor with backpressure and
//!   cooperative cancellation.
//! - [`query`]: request planning into clause sequences.
//! - [`store`]: the public [`TickStore`] surface.
//!
//! Embedding applications install their own `log` backend; the engine
//! only emits through the facade.

pub mod agg;
pub mod arena;
pub mod clause;
pub mod config;
pub mod error;
pub mod exec;
pub mod expr;
pub mod frame;
pub mod index;
pub mod keys;
pub mod query;
pub mod segment;
pub mod storage;
pub mod store;
pub mod version;
pub mod write;

pub use config::RuntimeConfig;
pub use error::{ErrorKind, StoreError, StoreResult};
pub use frame::{Column, DType, FieldDef, Frame, Scalar, Schema};
pub use keys::{AtomKey, IndexValue, KeyType, RefKey, StreamId};
pub use query::ReadRequest;
pub use store::TickStore;
