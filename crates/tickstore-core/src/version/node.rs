//! Version nodes and the small JSON records that ride the chain.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keys::{now_nanos, AtomKey, IndexValue, KeyType, StreamId};
use crate::storage::payload_hash;

/// One link in a symbol's version chain.
///
/// Persisted as the JSON payload of a `Version` atom key so chains stay
/// inspectable with basic tools.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VersionNode {
    /// Monotone version id, starting from 1.
    pub version_id: u64,
    /// Atom key of the predecessor node; `None` for the first version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<AtomKey>,
    /// Atom key of the index segment describing this version's data keys;
    /// `None` marks the symbol deleted as of this version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_root: Option<AtomKey>,
    /// Atom keys superseded by this version. Tombstones may only name keys
    /// that existed prior to this node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tombstones: Vec<AtomKey>,
    /// Commit wall-clock timestamp.
    pub timestamp: DateTime<Utc>,
}

impl VersionNode {
    /// Serialize to the canonical JSON payload.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    /// Parse the canonical JSON payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<VersionNode, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Named snapshot: a pinned set of version-node keys, one per symbol.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SnapshotRecord {
    /// Snapshot name.
    pub name: String,
    /// Pinned version-node keys.
    pub versions: Vec<AtomKey>,
    /// Creation wall-clock timestamp.
    pub created_at: DateTime<Utc>,
}

/// Write-audit record persisted under a `Log` atom key per mutation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    /// Operation name (`write`, `append`, `update`, `delete`, ...).
    pub op: String,
    /// Version committed by the operation.
    pub version_id: u64,
    /// Rows touched, when meaningful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u64>,
    /// Operation wall-clock timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Allocate an atom key for `payload` written under `version_id`.
///
/// The content hash is the xxh3-64 of the payload; the creation timestamp
/// breaks ties when identical content is written twice.
pub fn atom_key_for(
    stream_id: StreamId,
    key_type: KeyType,
    version_id: u64,
    payload: &[u8],
    bounds: Option<(IndexValue, IndexValue)>,
) -> AtomKey {
    let (start_index, end_index) = match bounds {
        Some((lo, hi)) => (Some(lo), Some(hi)),
        None => (None, None),
    };
    AtomKey {
        stream_id,
        key_type,
        version_id,
        creation_ts: now_nanos(),
        content_hash: payload_hash(payload),
        start_index,
        end_index,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_node_json_roundtrip() {
        let prev = atom_key_for(
            StreamId::Name("sym".to_string()),
            KeyType::Version,
            1,
            b"prior",
            None,
        );
        let node = VersionNode {
            version_id: 2,
            previous: Some(prev),
            index_root: None,
            tombstones: vec![],
            timestamp: Utc::now(),
        };
        let bytes = node.to_bytes().expect("serialize");
        let back = VersionNode::from_bytes(&bytes).expect("deserialize");
        assert_eq!(back, node);
    }

    #[test]
    fn atom_key_hash_tracks_payload() {
        let a = atom_key_for(
            StreamId::Num(7),
            KeyType::Version,
            1,
            b"payload-a",
            None,
        );
        let b = atom_key_for(
            StreamId::Num(7),
            KeyType::Version,
            1,
            b"payload-b",
            None,
        );
        assert_ne!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash, payload_hash(b"payload-a"));
    }
}
