//! Store-level error type and the engine-wide failure taxonomy.
//!
//! Module errors stay precise; [`StoreError`] wraps them at the public
//! surface and classifies every failure into an [`ErrorKind`] so callers
//! can decide on retry/report behavior without matching variants:
//!
//! - `UserInput`: malformed request, invalid plan. Never retried.
//! - `NotFound`: symbol, version, or key absent; may be expected.
//! - `Corrupt`: hash mismatch, truncated segment, unknown codec tag.
//! - `Conflict`: CAS lost beyond the retry budget.
//! - `Transient`: backend timeout or throttling, surfaced after the
//!   backoff budget.
//! - `Cancelled`: cooperative cancellation. Never retried.
//! - `Internal`: a bug; always surfaced.

use snafu::prelude::*;

use crate::clause::ClauseError;
use crate::exec::ExecError;
use crate::frame::FrameError;
use crate::index::IndexError;
use crate::keys::KeyError;
use crate::query::PlanError;
use crate::segment::CodecError;
use crate::storage::StorageError;
use crate::version::VersionError;
use crate::write::WriteError;

/// Result alias for public store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure classification; see the module docs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller error; report, do not retry.
    UserInput,
    /// Something requested does not exist.
    NotFound,
    /// Persisted state failed integrity or parsing.
    Corrupt,
    /// Optimistic concurrency lost beyond its budget.
    Conflict,
    /// Backend pressure; retrying later may succeed.
    Transient,
    /// The operation was cooperatively cancelled.
    Cancelled,
    /// A bug in the engine.
    Internal,
}

/// Top-level error of every public store operation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StoreError {
    /// Request rejected before any work happened.
    #[snafu(display("{msg}"))]
    UserInput {
        /// What was wrong.
        msg: String,
    },

    /// Write-path failure.
    #[snafu(transparent)]
    Write {
        /// Underlying write error.
        source: WriteError,
    },

    /// Version-chain failure.
    #[snafu(transparent)]
    Version {
        /// Underlying version error.
        source: VersionError,
    },

    /// Planning failure.
    #[snafu(transparent)]
    Plan {
        /// Underlying plan error.
        source: PlanError,
    },

    /// Pipeline failure.
    #[snafu(transparent)]
    Exec {
        /// Underlying executor error.
        source: ExecError,
    },

    /// Segment codec failure outside the pipeline.
    #[snafu(transparent)]
    Codec {
        /// Underlying codec error.
        source: CodecError,
    },

    /// Storage failure outside the version layer.
    #[snafu(transparent)]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// Key parsing/validation failure.
    #[snafu(transparent)]
    Key {
        /// Underlying key error.
        source: KeyError,
    },

    /// Frame assembly failure.
    #[snafu(transparent)]
    Frame {
        /// Underlying frame error.
        source: FrameError,
    },

    /// Index-segment failure.
    #[snafu(transparent)]
    Index {
        /// Underlying index error.
        source: IndexError,
    },
}

impl StoreError {
    /// Classify this error into the engine-wide taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::UserInput { .. } => ErrorKind::UserInput,
            StoreError::Write { source } => match source {
                WriteError::UnsortedIndex { .. }
                | WriteError::SchemaMismatch { .. }
                | WriteError::NullIndex { .. }
                | WriteError::Frame { .. } => ErrorKind::UserInput,
                WriteError::Encode { .. } => ErrorKind::Internal,
                WriteError::Version { source } => version_kind(source),
            },
            StoreError::Version { source } => version_kind(source),
            StoreError::Plan { source } => match source {
                PlanError::InvalidPlan { .. } => ErrorKind::UserInput,
                PlanError::Clause { .. } => ErrorKind::UserInput,
            },
            StoreError::Exec { source } => match source {
                ExecError::Cancelled { .. } => ErrorKind::Cancelled,
                ExecError::SegmentDecode { .. } => ErrorKind::Corrupt,
                ExecError::SegmentLoad { source, .. } => version_kind(source),
                ExecError::ClauseFailed { source, .. } => clause_kind(source),
                ExecError::WorkerLost { .. } => ErrorKind::Internal,
            },
            StoreError::Codec { .. } => ErrorKind::Corrupt,
            StoreError::Storage { source } => storage_kind(source),
            StoreError::Key { .. } => ErrorKind::UserInput,
            StoreError::Frame { .. } => ErrorKind::UserInput,
            StoreError::Index { .. } => ErrorKind::Corrupt,
        }
    }
}

fn version_kind(err: &VersionError) -> ErrorKind {
    match err {
        VersionError::SymbolNotFound { .. } | VersionError::VersionNotFound { .. } => {
            ErrorKind::NotFound
        }
        VersionError::WriteConflict { .. } => ErrorKind::Conflict,
        VersionError::CorruptChain { .. } | VersionError::CorruptKey { .. } => ErrorKind::Corrupt,
        VersionError::Storage { source } => storage_kind(source),
    }
}

fn storage_kind(err: &StorageError) -> ErrorKind {
    match err {
        StorageError::NotFound { .. } => ErrorKind::NotFound,
        StorageError::AlreadyExists { .. } => ErrorKind::Conflict,
        StorageError::Transient { .. } => ErrorKind::Transient,
        StorageError::Simulated { .. } => ErrorKind::Transient,
        StorageError::Io { .. } | StorageError::Backend { .. } => ErrorKind::Internal,
    }
}

fn clause_kind(err: &ClauseError) -> ErrorKind {
    match err {
        ClauseError::Misuse { .. } => ErrorKind::Internal,
        ClauseError::NotFirst { .. } => ErrorKind::UserInput,
        ClauseError::BadInput { .. } => ErrorKind::UserInput,
        ClauseError::Expr { .. } => ErrorKind::UserInput,
        ClauseError::Arena { .. } => ErrorKind::Internal,
    }
}
