//! Runtime configuration and recognized environment knobs.
//!
//! Every knob has a default chosen so an unconfigured store behaves well;
//! `from_env` overlays recognized `TICKSTORE_*` variables on top of those
//! defaults. Logging verbosity follows the standard `RUST_LOG` convention
//! of whatever `log` implementation the embedding application installs.
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `TICKSTORE_BACKEND` | Storage selection: `memory` or `local:<path>` |
//! | `TICKSTORE_ROW_SLICE` | Rows per tile (R) |
//! | `TICKSTORE_COL_SLICE` | Columns per tile (K) |
//! | `TICKSTORE_READ_PARALLELISM` | Concurrent segment loads |
//! | `TICKSTORE_WRITE_PARALLELISM` | Concurrent tile writes |
//! | `TICKSTORE_INFLIGHT_LIMIT` | Backpressure high-water mark per stage |
//! | `TICKSTORE_CAS_RETRIES` | Version-commit retry budget |
//! | `TICKSTORE_GC_GRACE_SECS` | Age before unreachable keys are collected |
//! | `TICKSTORE_FAIL_READ` / `_WRITE` / `_DELETE` | Failure hooks (tests only) |

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::{BackendRef, LocalBackend, MemoryBackend, RetryConfig};

/// Engine-wide knobs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Rows per tile (the row-slice size R).
    pub row_slice_size: usize,
    /// Columns per tile (the column-slice size K).
    pub col_slice_size: usize,
    /// Concurrent segment loads on the read path.
    pub read_parallelism: usize,
    /// Concurrent tile encodes/writes on the write path.
    pub write_parallelism: usize,
    /// In-flight processing units per pipeline stage before upstream tasks
    /// suspend.
    pub inflight_high_water: usize,
    /// `atomic_replace` retry budget for version commits.
    pub cas_retries: u32,
    /// Hash buckets produced by the partition clause.
    pub partition_buckets: usize,
    /// Unreachable keys younger than this survive garbage collection.
    #[serde(with = "grace_secs")]
    pub gc_grace: Duration,
    /// Backoff schedule for transient storage errors.
    #[serde(skip, default)]
    pub retry: RetryConfig,
    /// Segment framing version to write.
    pub encoding_version: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            row_slice_size: 100_000,
            col_slice_size: 127,
            read_parallelism: 8,
            write_parallelism: 8,
            inflight_high_water: 32,
            cas_retries: 5,
            partition_buckets: 16,
            gc_grace: Duration::from_secs(24 * 60 * 60),
            retry: RetryConfig::default(),
            encoding_version: crate::segment::ENCODING_V1,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with recognized `TICKSTORE_*` variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_usize("TICKSTORE_ROW_SLICE") {
            cfg.row_slice_size = v.max(1);
        }
        if let Some(v) = env_usize("TICKSTORE_COL_SLICE") {
            cfg.col_slice_size = v.max(1);
        }
        if let Some(v) = env_usize("TICKSTORE_READ_PARALLELISM") {
            cfg.read_parallelism = v.max(1);
        }
        if let Some(v) = env_usize("TICKSTORE_WRITE_PARALLELISM") {
            cfg.write_parallelism = v.max(1);
        }
        if let Some(v) = env_usize("TICKSTORE_INFLIGHT_LIMIT") {
            cfg.inflight_high_water = v.max(1);
        }
        if let Some(v) = env_usize("TICKSTORE_CAS_RETRIES") {
            cfg.cas_retries = v as u32;
        }
        if let Some(v) = env_usize("TICKSTORE_GC_GRACE_SECS") {
            cfg.gc_grace = Duration::from_secs(v as u64);
        }
        cfg
    }

    /// Build the backend selected by `TICKSTORE_BACKEND` (default: memory).
    ///
    /// Failure hooks (`TICKSTORE_FAIL_*`) arm the memory backend only; they
    /// exist for tests and must never be set in production environments.
    pub fn backend_from_env() -> BackendRef {
        match std::env::var("TICKSTORE_BACKEND").ok().as_deref() {
            Some(spec) if spec.starts_with("local:") => {
                Arc::new(LocalBackend::new(spec.trim_start_matches("local:")))
            }
            _ => {
                let backend = MemoryBackend::new();
                if let Some(n) = env_usize("TICKSTORE_FAIL_READ") {
                    backend.failures().fail_reads(n);
                }
                if let Some(n) = env_usize("TICKSTORE_FAIL_WRITE") {
                    backend.failures().fail_writes(n);
                }
                if let Some(n) = env_usize("TICKSTORE_FAIL_DELETE") {
                    backend.failures().fail_deletes(n);
                }
                Arc::new(backend)
            }
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("ignoring {name}={raw:?}: {e}");
            None
        }
    }
}

mod grace_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
