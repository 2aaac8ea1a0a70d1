//! Facade crate for the tickstore engine.
//!
//! Downstream users depend on this crate; it re-exports the core engine
//! and bundles the common imports into a [`prelude`]. The engine itself
//! lives in `tickstore-core`.

pub use tickstore_core::*;

pub mod prelude;
