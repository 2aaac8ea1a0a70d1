//! In-memory arena of live query entities.
//!
//! Every intermediate a clause produces; decoded column chunks, row and
//! column ranges, filter bitsets, processing-unit bundles; lives in the
//! arena under an opaque [`EntityId`]. Ownership is reference counting
//! only: counts are atomic, the id→payload maps are sharded by id hash,
//! and nothing holds a shard lock while touching another shard. Payloads
//! are immutable once inserted (clauses build replacements rather than
//! mutating), so lookups hand out cheap `Arc` clones.
//!
//! Releasing a processing unit cascades into the entities it bundles,
//! which is how slices materialized for a cancelled or completed query
//! drain without any back-references from entities to clauses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use roaring::RoaringBitmap;
use snafu::prelude::*;

use crate::frame::Column;
use crate::index::{ColRange, RowRange};

const SHARD_COUNT: usize = 16;

/// Opaque handle to an arena entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Errors raised by arena lookups.
#[derive(Debug, Snafu)]
pub enum ArenaError {
    /// The id is not (or no longer) live.
    #[snafu(display("entity {id} not found in arena"))]
    EntityNotFound {
        /// The missing id.
        id: EntityId,
    },

    /// The id resolves to a different payload kind.
    #[snafu(display("entity {id} is a {actual}, expected {expected}"))]
    WrongKind {
        /// The offending id.
        id: EntityId,
        /// Payload kind found.
        actual: &'static str,
        /// Payload kind wanted.
        expected: &'static str,
    },
}

/// A decoded column chunk.
#[derive(Clone, Debug)]
pub struct ColumnSegment {
    /// Column name.
    pub name: String,
    /// Materialized values.
    pub column: Column,
}

/// One row-aligned slice across the chosen columns: the operand of a
/// clause.
#[derive(Clone, Debug)]
pub struct ProcessingUnit {
    /// Global row interval this unit covers.
    pub row_range: RowRange,
    /// Index column entity.
    pub index: EntityId,
    /// Named value-column entities.
    pub columns: Vec<(String, EntityId)>,
    /// Partition bucket tag, set by the partition clause.
    pub bucket: Option<u64>,
}

impl ProcessingUnit {
    /// Entity ids bundled by this unit.
    pub fn bundled(&self) -> Vec<EntityId> {
        let mut ids = vec![self.index];
        ids.extend(self.columns.iter().map(|(_, id)| *id));
        ids
    }

    /// Find a column entity by name.
    pub fn column(&self, name: &str) -> Option<EntityId> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }
}

/// Arena payload kinds.
#[derive(Clone, Debug)]
pub enum EntityPayload {
    /// A decoded column chunk.
    Column(ColumnSegment),
    /// A row-range descriptor.
    RowRange(RowRange),
    /// A column-range descriptor.
    ColRange(ColRange),
    /// An auxiliary bitset (filter masks).
    Bitset(RoaringBitmap),
    /// A processing-unit bundle.
    Unit(ProcessingUnit),
}

impl EntityPayload {
    fn kind(&self) -> &'static str {
        match self {
            EntityPayload::Column(_) => "column",
            EntityPayload::RowRange(_) => "row-range",
            EntityPayload::ColRange(_) => "col-range",
            EntityPayload::Bitset(_) => "bitset",
            EntityPayload::Unit(_) => "unit",
        }
    }
}

struct Entry {
    payload: Arc<EntityPayload>,
    refs: AtomicUsize,
}

/// Sharded id→payload arena with atomic reference counts.
pub struct ComponentManager {
    shards: Vec<RwLock<HashMap<u64, Entry>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ComponentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentManager")
            .field("live", &self.live_count())
            .finish()
    }
}

impl Default for ComponentManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentManager {
    /// Fresh empty arena.
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            next_id: AtomicU64::new(1),
        }
    }

    fn shard(&self, id: EntityId) -> &RwLock<HashMap<u64, Entry>> {
        &self.shards[(id.0 as usize) % SHARD_COUNT]
    }

    /// Insert a payload with an initial reference count of one.
    pub fn insert(&self, payload: EntityPayload) -> EntityId {
        let id = EntityId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.shard(id).write().insert(
            id.0,
            Entry {
                payload: Arc::new(payload),
                refs: AtomicUsize::new(1),
            },
        );
        id
    }

    /// Fetch a payload.
    pub fn get(&self, id: EntityId) -> Result<Arc<EntityPayload>, ArenaError> {
        self.shard(id)
            .read()
            .get(&id.0)
            .map(|e| Arc::clone(&e.payload))
            .context(EntityNotFoundSnafu { id })
    }

    /// Typed fetch of a column chunk.
    pub fn column(&self, id: EntityId) -> Result<Arc<EntityPayload>, ArenaError> {
        self.expect_kind(id, "column")
    }

    /// Typed fetch of a processing unit (cloned out of the arc).
    pub fn unit(&self, id: EntityId) -> Result<ProcessingUnit, ArenaError> {
        match self.get(id)?.as_ref() {
            EntityPayload::Unit(u) => Ok(u.clone()),
            other => WrongKindSnafu {
                id,
                actual: other.kind(),
                expected: "unit",
            }
            .fail(),
        }
    }

    /// Typed fetch of a column chunk's materialized column.
    pub fn column_data(&self, id: EntityId) -> Result<Column, ArenaError> {
        match self.get(id)?.as_ref() {
            EntityPayload::Column(seg) => Ok(seg.column.clone()),
            other => WrongKindSnafu {
                id,
                actual: other.kind(),
                expected: "column",
            }
            .fail(),
        }
    }

    fn expect_kind(
        &self,
        id: EntityId,
        expected: &'static str,
    ) -> Result<Arc<EntityPayload>, ArenaError> {
        let payload = self.get(id)?;
        ensure!(
            payload.kind() == expected,
            WrongKindSnafu {
                id,
                actual: payload.kind(),
                expected,
            }
        );
        Ok(payload)
    }

    /// Bump an entity's reference count.
    pub fn retain(&self, id: EntityId) -> Result<(), ArenaError> {
        let shard = self.shard(id).read();
        let entry = shard.get(&id.0).context(EntityNotFoundSnafu { id })?;
        entry.refs.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Drop one reference; frees the payload at zero, cascading into the
    /// entities a processing unit bundles.
    pub fn release(&self, id: EntityId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let dropped = {
                let shard = self.shard(id).read();
                match shard.get(&id.0) {
                    Some(entry) => entry.refs.fetch_sub(1, Ordering::AcqRel) == 1,
                    None => false,
                }
            };
            if !dropped {
                continue;
            }
            let removed = {
                let mut shard = self.shard(id).write();
                match shard.get(&id.0) {
                    // Re-check under the write lock; a racing retain wins.
                    Some(entry) if entry.refs.load(Ordering::Acquire) == 0 => {
                        shard.remove(&id.0)
                    }
                    _ => None,
                }
            };
            if let Some(entry) = removed {
                if let EntityPayload::Unit(unit) = entry.payload.as_ref() {
                    pending.extend(unit.bundled());
                }
            }
        }
    }

    /// Release every entity a group of units transitively bundles.
    pub fn release_groups(&self, groups: &[Vec<EntityId>]) {
        for group in groups {
            for &id in group {
                self.release(id);
            }
        }
    }

    /// Number of live entities (test observability).
    pub fn live_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DType;

    fn column_entity(mgr: &ComponentManager, name: &str) -> EntityId {
        mgr.insert(EntityPayload::Column(ColumnSegment {
            name: name.to_string(),
            column: Column::from_i64(DType::Int64, vec![1, 2, 3]),
        }))
    }

    #[test]
    fn insert_get_release_lifecycle() {
        let mgr = ComponentManager::new();
        let id = column_entity(&mgr, "x");
        assert_eq!(mgr.live_count(), 1);

        let payload = mgr.get(id).expect("live");
        assert!(matches!(payload.as_ref(), EntityPayload::Column(_)));

        mgr.release(id);
        assert_eq!(mgr.live_count(), 0);
        assert!(matches!(
            mgr.get(id),
            Err(ArenaError::EntityNotFound { .. })
        ));
    }

    #[test]
    fn retain_delays_release() {
        let mgr = ComponentManager::new();
        let id = column_entity(&mgr, "x");
        mgr.retain(id).expect("retain");

        mgr.release(id);
        assert_eq!(mgr.live_count(), 1, "still retained once");
        mgr.release(id);
        assert_eq!(mgr.live_count(), 0);
    }

    #[test]
    fn releasing_unit_cascades_into_bundle() {
        let mgr = ComponentManager::new();
        let index = column_entity(&mgr, "ts");
        let x = column_entity(&mgr, "x");
        let unit = mgr.insert(EntityPayload::Unit(ProcessingUnit {
            row_range: RowRange { start: 0, end: 3 },
            index,
            columns: vec![("x".to_string(), x)],
            bucket: None,
        }));
        assert_eq!(mgr.live_count(), 3);

        mgr.release(unit);
        assert_eq!(mgr.live_count(), 0);
    }

    #[test]
    fn shared_column_survives_one_units_release() {
        let mgr = ComponentManager::new();
        let index = column_entity(&mgr, "ts");
        let shared = column_entity(&mgr, "x");
        mgr.retain(index).expect("retain");
        mgr.retain(shared).expect("retain");

        let a = mgr.insert(EntityPayload::Unit(ProcessingUnit {
            row_range: RowRange { start: 0, end: 3 },
            index,
            columns: vec![("x".to_string(), shared)],
            bucket: None,
        }));
        let b = mgr.insert(EntityPayload::Unit(ProcessingUnit {
            row_range: RowRange { start: 0, end: 3 },
            index,
            columns: vec![("x".to_string(), shared)],
            bucket: None,
        }));

        mgr.release(a);
        assert!(mgr.get(shared).is_ok(), "second unit still holds it");
        mgr.release(b);
        assert_eq!(mgr.live_count(), 0);
    }

    #[test]
    fn wrong_kind_lookup_is_typed_error() {
        let mgr = ComponentManager::new();
        let id = mgr.insert(EntityPayload::Bitset(RoaringBitmap::new()));
        let err = mgr.unit(id).expect_err("not a unit");
        assert!(matches!(err, ArenaError::WrongKind { .. }));
    }
}
