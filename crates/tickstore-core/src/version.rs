//! Per-symbol version chains over the storage adapter.
//!
//! Each symbol has a singly linked chain of [`VersionNode`] records, every
//! node an immutable atom key, with the head pointed to by the symbol's
//! `VersionRef` key. Mutations append a node and advance the ref via
//! compare-and-swap; losers of the race reload, revalidate, and retry up to
//! a bounded budget. Readers resolve a head once and then see a frozen,
//! acyclic prefix of the chain; concurrent writers never mutate an
//! already-written node.
//!
//! Orphans (atoms written by losing writers or interrupted commits) stay
//! content-addressed and unreferenced until [`gc`] reclaims them after a
//! grace interval.

pub mod cache;
pub mod gc;
pub mod node;
pub mod store;

pub use cache::HeadCache;
pub use gc::{collect_garbage, GcReport};
pub use node::{AuditRecord, SnapshotRecord, VersionNode};
pub use store::{CommitRequest, VersionStore};

use snafu::{Backtrace, prelude::*};

use crate::keys::KeyError;
use crate::storage::StorageError;

/// Errors raised by version-chain operations.
#[derive(Debug, Snafu)]
pub enum VersionError {
    /// The symbol has no committed versions.
    #[snafu(display("symbol {symbol} not found"))]
    SymbolNotFound {
        /// The missing symbol.
        symbol: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// The requested version id is not on the chain.
    #[snafu(display("version {version} of symbol {symbol} not found"))]
    VersionNotFound {
        /// The symbol.
        symbol: String,
        /// The requested version id.
        version: u64,
    },

    /// CAS retries exhausted.
    #[snafu(display(
        "write conflict on {symbol}: lost {attempts} compare-and-swap rounds"
    ))]
    WriteConflict {
        /// The contended symbol.
        symbol: String,
        /// Rounds attempted.
        attempts: u32,
    },

    /// The chain contradicts its own invariants.
    #[snafu(display("corrupt version chain for {symbol}: {detail}"))]
    CorruptChain {
        /// The symbol.
        symbol: String,
        /// What was inconsistent.
        detail: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A persisted key failed to parse.
    #[snafu(display("corrupt key reference: {source}"))]
    CorruptKey {
        /// Underlying key error.
        source: KeyError,
    },

    /// Storage failure underneath the chain.
    #[snafu(display("storage error in version index: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(backtrace)]
        source: StorageError,
    },
}
