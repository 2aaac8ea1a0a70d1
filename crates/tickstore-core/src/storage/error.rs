//! Storage-layer error types.

use snafu::{Backtrace, Snafu};
use std::io;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Operations the failure-simulation hooks can target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOp {
    /// `get` / `list` / `exists`.
    Read,
    /// `put` / `atomic_replace`.
    Write,
    /// `delete`.
    Delete,
}

/// Errors raised by storage backends.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// No object stored under the key.
    #[snafu(display("key not found: {key}"))]
    NotFound {
        /// The missing key.
        key: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A once-only put observed an existing object.
    #[snafu(display("key already exists: {key}"))]
    AlreadyExists {
        /// The occupied key.
        key: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Local filesystem failure.
    #[snafu(display("i/o error at {key}: {source}"))]
    Io {
        /// The key being accessed.
        key: String,
        /// Underlying error.
        source: io::Error,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Backend-specific failure that is not expected to clear on retry.
    #[snafu(display("backend error at {key}: {detail}"))]
    Backend {
        /// The key being accessed.
        key: String,
        /// Backend diagnostic.
        detail: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Timeout or throttling; safe to retry with backoff.
    #[snafu(display("transient backend error at {key}: {detail}"))]
    Transient {
        /// The key being accessed.
        key: String,
        /// Backend diagnostic.
        detail: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A test failure hook tripped.
    #[snafu(display("simulated {op:?} failure at {key}"))]
    Simulated {
        /// The operation that was failed.
        op: FailureOp,
        /// The key being accessed.
        key: String,
    },
}

impl StorageError {
    /// True when a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient { .. })
    }
}
