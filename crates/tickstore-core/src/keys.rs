//! Typed storage keys: immutable atom keys and mutable ref anchors.
//!
//! Every persisted object is named by either an [`AtomKey`] (immutable,
//! content-addressed, written exactly once) or a [`RefKey`] (a mutable
//! anchor advanced by compare-and-swap). Both render to a textual form
//! suitable for flat object-store namespaces:
//!
//! ```text
//! <type>/<stream_id>/<version_id>/<creation_ts>/<content_hash>[/<start>/<end>]
//! <type>/<stream_id>                                   (ref keys)
//! ```
//!
//! The rendering is a bijection: `parse_atom(format(k)) == k` for every
//! atom key. Stream names are percent-escaped so arbitrary UTF-8 symbols
//! round-trip; numeric stream ids render with a `#` prefix.

use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

/// Errors raised while parsing or validating keys.
#[derive(Debug, Snafu)]
pub enum KeyError {
    /// The textual form has the wrong number of `/` segments.
    #[snafu(display("malformed key {text:?}: expected {expected} segments, got {got}"))]
    SegmentCount {
        /// The offending text.
        text: String,
        /// Expected segment count.
        expected: usize,
        /// Actual segment count.
        got: usize,
    },

    /// A segment failed to parse.
    #[snafu(display("malformed key segment {segment:?} in {text:?}: {detail}"))]
    BadSegment {
        /// The offending segment.
        segment: String,
        /// The whole key text.
        text: String,
        /// What went wrong.
        detail: String,
    },

    /// Unknown key-type tag.
    #[snafu(display("unknown key type tag {tag:?}"))]
    UnknownType {
        /// The offending tag.
        tag: String,
    },

    /// A stream name failed validation.
    #[snafu(display("invalid stream name {name:?}: {detail}"))]
    InvalidStreamName {
        /// The offending name.
        name: String,
        /// What went wrong.
        detail: String,
    },
}

/// Symbol identifier: a UTF-8 name or a signed 64-bit id, fixed at symbol
/// creation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamId {
    /// Named symbol.
    Name(String),
    /// Numeric symbol.
    Num(i64),
}

impl StreamId {
    /// Validate a name for use as a stream id.
    ///
    /// Names must be non-empty and must not start with `#` (reserved for
    /// the numeric rendering).
    pub fn name(name: impl Into<String>) -> Result<StreamId, KeyError> {
        let name = name.into();
        ensure!(
            !name.is_empty(),
            InvalidStreamNameSnafu {
                name: name.clone(),
                detail: "empty name".to_string(),
            }
        );
        ensure!(
            !name.starts_with('#'),
            InvalidStreamNameSnafu {
                name: name.clone(),
                detail: "names starting with '#' are reserved".to_string(),
            }
        );
        Ok(StreamId::Name(name))
    }

    fn render(&self) -> String {
        match self {
            StreamId::Name(n) => escape_segment(n),
            StreamId::Num(n) => format!("#{n}"),
        }
    }

    fn parse(seg: &str, text: &str) -> Result<StreamId, KeyError> {
        if let Some(rest) = seg.strip_prefix('#') {
            let n = rest.parse::<i64>().map_err(|e| KeyError::BadSegment {
                segment: seg.to_string(),
                text: text.to_string(),
                detail: format!("numeric stream id: {e}"),
            })?;
            Ok(StreamId::Num(n))
        } else {
            Ok(StreamId::Name(unescape_segment(seg, text)?))
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamId::Name(n) => n.fmt(f),
            StreamId::Num(n) => write!(f, "#{n}"),
        }
    }
}

/// Atom vs ref class of a key type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyClass {
    /// Immutable, content-addressed, written once.
    Atom,
    /// Mutable anchor, replaced via CAS.
    Ref,
}

/// Closed enumeration of key types.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Column-tile data segment.
    TableData,
    /// Index segment mapping tile ranges to data keys.
    TableIndex,
    /// Version node in a symbol's chain.
    Version,
    /// Head pointer of a symbol's version chain.
    VersionRef,
    /// Symbol-list delta entry.
    SymbolList,
    /// Named snapshot anchor.
    Snapshot,
    /// Standalone tombstone record.
    Tombstone,
    /// Staged (uncommitted) data segment.
    AppendData,
    /// Write-audit log entry.
    Log,
    /// Column statistics artifact.
    Metrics,
}

impl KeyType {
    /// Atom or ref class of this type.
    pub fn class(self) -> KeyClass {
        match self {
            KeyType::VersionRef | KeyType::Snapshot => KeyClass::Ref,
            _ => KeyClass::Atom,
        }
    }

    /// True for types whose atom keys carry index bounds.
    pub fn index_bearing(self) -> bool {
        matches!(
            self,
            KeyType::TableData | KeyType::TableIndex | KeyType::AppendData
        )
    }

    /// Stable textual tag; first segment of every rendered key.
    pub fn tag(self) -> &'static str {
        match self {
            KeyType::TableData => "tdata",
            KeyType::TableIndex => "tindex",
            KeyType::Version => "ver",
            KeyType::VersionRef => "vref",
            KeyType::SymbolList => "slist",
            KeyType::Snapshot => "snap",
            KeyType::Tombstone => "tomb",
            KeyType::AppendData => "append",
            KeyType::Log => "log",
            KeyType::Metrics => "metrics",
        }
    }

    /// Inverse of [`KeyType::tag`].
    pub fn from_tag(tag: &str) -> Result<KeyType, KeyError> {
        Ok(match tag {
            "tdata" => KeyType::TableData,
            "tindex" => KeyType::TableIndex,
            "ver" => KeyType::Version,
            "vref" => KeyType::VersionRef,
            "slist" => KeyType::SymbolList,
            "snap" => KeyType::Snapshot,
            "tomb" => KeyType::Tombstone,
            "append" => KeyType::AppendData,
            "log" => KeyType::Log,
            "metrics" => KeyType::Metrics,
            other => return UnknownTypeSnafu { tag: other }.fail(),
        })
    }
}

/// One bound of an atom key's index range: a numeric timestamp or a string.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IndexValue {
    /// Nanosecond timestamp (or plain integer index).
    Ts(i64),
    /// String index.
    Str(String),
}

impl IndexValue {
    fn render(&self) -> String {
        match self {
            IndexValue::Ts(v) => format!("t:{v}"),
            IndexValue::Str(s) => format!("s:{}", escape_segment(s)),
        }
    }

    fn parse(seg: &str, text: &str) -> Result<IndexValue, KeyError> {
        if let Some(rest) = seg.strip_prefix("t:") {
            let v = rest.parse::<i64>().map_err(|e| KeyError::BadSegment {
                segment: seg.to_string(),
                text: text.to_string(),
                detail: format!("timestamp bound: {e}"),
            })?;
            Ok(IndexValue::Ts(v))
        } else if let Some(rest) = seg.strip_prefix("s:") {
            Ok(IndexValue::Str(unescape_segment(rest, text)?))
        } else {
            BadSegmentSnafu {
                segment: seg.to_string(),
                text: text.to_string(),
                detail: "index bound must start with 't:' or 's:'".to_string(),
            }
            .fail()
        }
    }
}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (IndexValue::Ts(a), IndexValue::Ts(b)) => Some(a.cmp(b)),
            (IndexValue::Str(a), IndexValue::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Immutable, content-addressed key for a persisted segment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AtomKey {
    /// Owning symbol.
    pub stream_id: StreamId,
    /// Key type (atom class).
    pub key_type: KeyType,
    /// Version the key was written under; monotone per symbol.
    pub version_id: u64,
    /// Creation timestamp in UTC nanoseconds; tie-breaker for identical
    /// content written twice.
    pub creation_ts: i64,
    /// xxh3-64 of the segment payload.
    pub content_hash: u64,
    /// Lowest index value covered, for index-bearing types.
    pub start_index: Option<IndexValue>,
    /// Highest index value covered, for index-bearing types.
    pub end_index: Option<IndexValue>,
}

impl AtomKey {
    /// Render the canonical textual form.
    pub fn object_name(&self) -> String {
        let mut s = format!(
            "{}/{}/{}/{}/{:016x}",
            self.key_type.tag(),
            self.stream_id.render(),
            self.version_id,
            self.creation_ts,
            self.content_hash,
        );
        if let (Some(start), Some(end)) = (&self.start_index, &self.end_index) {
            s.push('/');
            s.push_str(&start.render());
            s.push('/');
            s.push_str(&end.render());
        }
        s
    }

    /// Parse the canonical textual form back into a key.
    pub fn parse(text: &str) -> Result<AtomKey, KeyError> {
        let segs: Vec<&str> = text.split('/').collect();
        ensure!(
            segs.len() == 5 || segs.len() == 7,
            SegmentCountSnafu {
                text: text.to_string(),
                expected: 5usize,
                got: segs.len(),
            }
        );
        let key_type = KeyType::from_tag(segs[0])?;
        let stream_id = StreamId::parse(segs[1], text)?;
        let version_id = parse_u64(segs[2], text)?;
        let creation_ts = segs[3].parse::<i64>().map_err(|e| KeyError::BadSegment {
            segment: segs[3].to_string(),
            text: text.to_string(),
            detail: format!("creation ts: {e}"),
        })?;
        let content_hash =
            u64::from_str_radix(segs[4], 16).map_err(|e| KeyError::BadSegment {
                segment: segs[4].to_string(),
                text: text.to_string(),
                detail: format!("content hash: {e}"),
            })?;
        let (start_index, end_index) = if segs.len() == 7 {
            (
                Some(IndexValue::parse(segs[5], text)?),
                Some(IndexValue::parse(segs[6], text)?),
            )
        } else {
            (None, None)
        };
        Ok(AtomKey {
            stream_id,
            key_type,
            version_id,
            creation_ts,
            content_hash,
            start_index,
            end_index,
        })
    }
}

impl fmt::Display for AtomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object_name())
    }
}

/// Mutable anchor key, replaced atomically.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RefKey {
    /// Owning symbol (or snapshot name for `Snapshot` refs).
    pub stream_id: StreamId,
    /// Key type (ref class).
    pub key_type: KeyType,
    /// Renders in the pre-directory single-segment layout still found in
    /// stores written by old builds.
    pub old_format: bool,
}

impl RefKey {
    /// A current-format ref key.
    pub fn new(stream_id: StreamId, key_type: KeyType) -> RefKey {
        debug_assert_eq!(key_type.class(), KeyClass::Ref);
        RefKey {
            stream_id,
            key_type,
            old_format: false,
        }
    }

    /// Render the textual form.
    pub fn object_name(&self) -> String {
        if self.old_format {
            format!("{}.{}", self.key_type.tag(), self.stream_id.render())
        } else {
            format!("{}/{}", self.key_type.tag(), self.stream_id.render())
        }
    }

    /// Parse either layout back into a key.
    pub fn parse(text: &str) -> Result<RefKey, KeyError> {
        if let Some((tag, rest)) = text.split_once('/') {
            return Ok(RefKey {
                key_type: KeyType::from_tag(tag)?,
                stream_id: StreamId::parse(rest, text)?,
                old_format: false,
            });
        }
        if let Some((tag, rest)) = text.split_once('.') {
            return Ok(RefKey {
                key_type: KeyType::from_tag(tag)?,
                stream_id: StreamId::parse(rest, text)?,
                old_format: true,
            });
        }
        SegmentCountSnafu {
            text: text.to_string(),
            expected: 2usize,
            got: 1usize,
        }
        .fail()
    }
}

impl fmt::Display for RefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object_name())
    }
}

/// Listing prefix covering every atom key of one type and stream.
pub fn type_stream_prefix(key_type: KeyType, stream: &StreamId) -> String {
    format!("{}/{}/", key_type.tag(), stream.render())
}

/// Current UTC time in nanoseconds, for key creation timestamps.
///
/// Saturates at the chrono range limit far beyond any plausible clock.
pub fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn parse_u64(seg: &str, text: &str) -> Result<u64, KeyError> {
    seg.parse::<u64>().map_err(|e| KeyError::BadSegment {
        segment: seg.to_string(),
        text: text.to_string(),
        detail: format!("version id: {e}"),
    })
}

/// Percent-escape `/`, `%`, `.`, and every non-ASCII byte so arbitrary
/// names survive as one path segment and round-trip byte-exactly.
fn escape_segment(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b == b'/' || b == b'%' || b == b'.' || !b.is_ascii() {
            out.push_str(&format!("%{b:02x}"));
        } else {
            out.push(b as char);
        }
    }
    out
}

fn unescape_segment(s: &str, text: &str) -> Result<String, KeyError> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            ensure!(
                i + 3 <= bytes.len(),
                BadSegmentSnafu {
                    segment: s.to_string(),
                    text: text.to_string(),
                    detail: "truncated percent escape".to_string(),
                }
            );
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            let byte = hex.and_then(|h| u8::from_str_radix(h, 16).ok());
            match byte {
                Some(b) => out.push(b),
                None => {
                    return BadSegmentSnafu {
                        segment: s.to_string(),
                        text: text.to_string(),
                        detail: "invalid percent escape".to_string(),
                    }
                    .fail();
                }
            }
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| KeyError::BadSegment {
        segment: s.to_string(),
        text: text.to_string(),
        detail: format!("utf-8: {e}"),
    })
}
