//! Self-describing segment container: the unit of storage I/O.
//!
//! Wire layout (encoding version 1):
//!
//! ```text
//! MAGIC(8) | ENC_VER(u32 LE) | HDR_LEN(u32 LE) | HDR | BODY
//! ```
//!
//! Encoding version 2 places the header length immediately after the magic
//! (`MAGIC | HDR_LEN | ENC_VER | ...`) and rejects the reserved header
//! fields 6 and 10–12. Decoders accept both layouts; the writer's version
//! comes from [`EncodeOptions`].
//!
//! The header region is itself one encoded block: a codec discriminant
//! byte, the xxh3-64 of the raw header JSON, then the (possibly
//! compressed) JSON bytes. The JSON header enumerates every body region -
//! the field table (offset, length, block metadata, integrity hashes,
//! per-field statistics), the optional metadata field, and the optional
//! string pool; so decode can verify that regions tile the body exactly,
//! with no trailing bytes.

pub mod block;
pub mod field;
pub mod stats;

pub use block::{BlockError, Codec, PforSub};
pub use field::{EncodedField, FieldError, NdArrayField, PoolBuilder};
pub use stats::{FieldStats, UniqueCount};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::frame::{Column, DType, Frame, Scalar, Schema};
use crate::keys::IndexValue;

/// Eight-byte magic prefix of every segment.
pub const MAGIC: &[u8; 8] = b"TICKSEG\0";

/// Original framing layout.
pub const ENCODING_V1: u32 = 1;

/// Length-first framing layout with reserved-field enforcement.
pub const ENCODING_V2: u32 = 2;

/// Header field numbers that v2 refuses to carry.
const RESERVED_V2: [u32; 4] = [6, 10, 11, 12];

/// Errors raised by segment encode/decode.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// The payload does not start with the segment magic.
    #[snafu(display("not a segment: bad magic"))]
    BadMagic,

    /// Encoding version outside the supported set.
    #[snafu(display("unsupported segment encoding version {version}"))]
    UnsupportedVersion {
        /// The version read from the framing.
        version: u32,
    },

    /// The payload ends before the framing says it should.
    #[snafu(display("truncated segment: {detail}"))]
    Truncated {
        /// What was missing.
        detail: String,
    },

    /// Body regions do not tile the payload exactly.
    #[snafu(display("corrupt segment: body is {actual} bytes, header enumerates {expected}"))]
    BodyMismatch {
        /// Bytes the header accounts for.
        expected: u64,
        /// Bytes actually present.
        actual: u64,
    },

    /// A v2 header carries a reserved field.
    #[snafu(display("corrupt segment: reserved header field {field} present in v2"))]
    ReservedField {
        /// The reserved field number.
        field: u32,
    },

    /// Header bytes failed integrity or JSON parsing.
    #[snafu(display("corrupt segment header: {detail}"))]
    HeaderCorrupt {
        /// Decoder diagnostic.
        detail: String,
    },

    /// A field's body region failed to decode.
    #[snafu(display("field {name}: {source}"))]
    Field {
        /// Field name.
        name: String,
        /// Underlying field error.
        source: FieldError,
    },

    /// Header block failure.
    #[snafu(transparent)]
    Block {
        /// Underlying block error.
        source: BlockError,
    },
}

/// One named entry in the header's field table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FieldEntry {
    /// Column name (the index column is listed first).
    pub name: String,
    /// Offset of this field's region within the body.
    pub offset: u64,
    /// Length of this field's region.
    pub len: u64,
    /// Field descriptor with block metadata.
    pub field: EncodedField,
    /// Write-time statistics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<FieldStats>,
}

/// An unnamed auxiliary field region (metadata, string pool).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuxEntry {
    /// Offset of the region within the body.
    pub offset: u64,
    /// Length of the region.
    pub len: u64,
    /// Field descriptor.
    pub field: NdArrayField,
}

/// The decoded segment header.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SegmentHeader {
    /// Stream descriptor.
    pub schema: Schema,
    /// Field table; index column first, then value columns in schema order.
    pub fields: Vec<FieldEntry>,
    /// Minimum index value in this segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_index: Option<IndexValue>,
    /// Maximum index value in this segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_index: Option<IndexValue>,
    /// Set when this segment was produced by compaction.
    pub compacted: bool,
    /// Optional user-metadata field reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AuxEntry>,
    /// Optional string-pool field reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_pool: Option<AuxEntry>,
    /// Encoding version the segment was written with.
    pub encoding_version: u32,
    /// Numbered header fields carried for forward compatibility.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reserved: Vec<u32>,
}

/// Writer-side knobs for segment encoding.
#[derive(Clone, Copy, Debug)]
pub struct EncodeOptions {
    /// Framing version to write.
    pub encoding_version: u32,
    /// Codec for the header region.
    pub header_codec: Codec,
    /// Mark the segment as produced by compaction.
    pub compacted: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            encoding_version: ENCODING_V1,
            header_codec: Codec::Lz4 { acceleration: 1 },
            compacted: false,
        }
    }
}

/// Pick a value-block codec for a column dtype.
///
/// Sorted timestamps delta-pack extremely well; general integers zigzag;
/// floats take the XOR/run-length path; everything else goes through LZ4.
fn codec_for(dtype: DType) -> Codec {
    match dtype.widened() {
        DType::Timestamp => Codec::TurboPfor {
            sub: PforSub::P4Delta,
        },
        DType::Int64 | DType::UInt64 => Codec::TurboPfor { sub: PforSub::P4Zz },
        DType::Float64 => Codec::TurboPfor {
            sub: PforSub::FpGorillaRle,
        },
        _ => Codec::Lz4 { acceleration: 1 },
    }
}

/// A decoded segment: a frame plus container-level attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Stream descriptor.
    pub schema: Schema,
    /// Index column.
    pub index: Column,
    /// Value columns, parallel to `schema.fields()`.
    pub columns: Vec<Column>,
    /// Minimum index value.
    pub start_index: Option<IndexValue>,
    /// Maximum index value.
    pub end_index: Option<IndexValue>,
    /// Compaction provenance flag.
    pub compacted: bool,
    /// Optional user metadata.
    pub metadata: Option<serde_json::Value>,
}

impl Segment {
    /// Wrap a frame as a segment, deriving index bounds from the frame.
    pub fn from_frame(frame: &Frame, metadata: Option<serde_json::Value>) -> Segment {
        let bounds = frame.index_bounds();
        let to_index = |s: &Scalar| match s {
            Scalar::I64(v) => Some(IndexValue::Ts(*v)),
            Scalar::Utf8(v) => Some(IndexValue::Str(v.clone())),
            _ => None,
        };
        Segment {
            schema: frame.schema().clone(),
            index: frame.index().clone(),
            columns: frame.columns().to_vec(),
            start_index: bounds.as_ref().and_then(|(lo, _)| to_index(lo)),
            end_index: bounds.as_ref().and_then(|(_, hi)| to_index(hi)),
            compacted: false,
            metadata,
        }
    }

    /// View the segment's columns as a frame.
    pub fn into_frame(self) -> Result<Frame, crate::frame::FrameError> {
        Frame::new(self.schema, self.index, self.columns)
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.index.len()
    }
}

/// Encode a segment to its wire form.
pub fn encode(segment: &Segment, opts: &EncodeOptions) -> Result<Bytes, CodecError> {
    ensure!(
        opts.encoding_version == ENCODING_V1 || opts.encoding_version == ENCODING_V2,
        UnsupportedVersionSnafu {
            version: opts.encoding_version,
        }
    );

    let mut pool = PoolBuilder::default();
    let mut body: Vec<u8> = Vec::new();
    let mut fields: Vec<FieldEntry> = Vec::new();

    let index_def = segment.schema.index().clone();
    let mut all_columns: Vec<(&str, DType, &Column)> =
        vec![(&index_def.name, index_def.dtype, &segment.index)];
    for (def, col) in segment.schema.fields().iter().zip(&segment.columns) {
        all_columns.push((&def.name, def.dtype, col));
    }

    for (name, dtype, col) in all_columns {
        let (encoded, region) =
            field::encode_column(col, dtype, codec_for(dtype), &mut pool).map_err(|source| {
                CodecError::Field {
                    name: name.to_string(),
                    source,
                }
            })?;
        fields.push(FieldEntry {
            name: name.to_string(),
            offset: body.len() as u64,
            len: region.len() as u64,
            field: encoded,
            stats: Some(FieldStats::from_column(col)),
        });
        body.extend_from_slice(&region);
    }

    let metadata = match &segment.metadata {
        Some(value) => {
            let raw = serde_json::to_vec(value).map_err(|e| CodecError::HeaderCorrupt {
                detail: format!("metadata serialize: {e}"),
            })?;
            let (f, region) = field::encode_bytes(&raw, Codec::Lz4 { acceleration: 1 })
                .map_err(|source| CodecError::Field {
                    name: "<metadata>".to_string(),
                    source,
                })?;
            let entry = AuxEntry {
                offset: body.len() as u64,
                len: region.len() as u64,
                field: f,
            };
            body.extend_from_slice(&region);
            Some(entry)
        }
        None => None,
    };

    let string_pool = if pool.is_empty() {
        None
    } else {
        let (f, region) = field::encode_pool(pool.strings(), Codec::Zstd {
            level: 3,
            streaming: false,
        })
        .map_err(|source| CodecError::Field {
            name: "<string_pool>".to_string(),
            source,
        })?;
        let entry = AuxEntry {
            offset: body.len() as u64,
            len: region.len() as u64,
            field: f,
        };
        body.extend_from_slice(&region);
        Some(entry)
    };

    let header = SegmentHeader {
        schema: segment.schema.clone(),
        fields,
        start_index: segment.start_index.clone(),
        end_index: segment.end_index.clone(),
        compacted: opts.compacted || segment.compacted,
        metadata,
        string_pool,
        encoding_version: opts.encoding_version,
        reserved: Vec::new(),
    };

    let header_json = serde_json::to_vec(&header).map_err(|e| CodecError::HeaderCorrupt {
        detail: format!("header serialize: {e}"),
    })?;
    let (header_block, header_hash) = block::encode_block(&header_json, opts.header_codec)?;
    let mut header_region = Vec::with_capacity(9 + header_block.len());
    header_region.push(header_codec_tag(opts.header_codec));
    header_region.extend_from_slice(&header_hash.to_le_bytes());
    header_region.extend_from_slice(&header_block);

    let mut out = Vec::with_capacity(16 + header_region.len() + body.len());
    out.extend_from_slice(MAGIC);
    let hdr_len = header_region.len() as u32;
    if opts.encoding_version == ENCODING_V2 {
        out.extend_from_slice(&hdr_len.to_le_bytes());
        out.extend_from_slice(&opts.encoding_version.to_le_bytes());
    } else {
        out.extend_from_slice(&opts.encoding_version.to_le_bytes());
        out.extend_from_slice(&hdr_len.to_le_bytes());
    }
    out.extend_from_slice(&header_region);
    out.extend_from_slice(&body);
    Ok(Bytes::from(out))
}

/// Decode a full segment.
pub fn decode(bytes: &[u8]) -> Result<Segment, CodecError> {
    decode_columns(bytes, None)
}

/// Decode a segment, restricted to the named value columns when `columns`
/// is given. The index column always decodes.
pub fn decode_columns(bytes: &[u8], columns: Option<&[String]>) -> Result<Segment, CodecError> {
    let (header, body) = decode_header(bytes)?;

    let pool = match &header.string_pool {
        Some(entry) => {
            let region = aux_region(body, entry)?;
            field::decode_pool(&entry.field, region).map_err(|source| CodecError::Field {
                name: "<string_pool>".to_string(),
                source,
            })?
        }
        None => Vec::new(),
    };

    let metadata = match &header.metadata {
        Some(entry) => {
            let region = aux_region(body, entry)?;
            let raw =
                field::decode_bytes(&entry.field, region).map_err(|source| CodecError::Field {
                    name: "<metadata>".to_string(),
                    source,
                })?;
            let value = serde_json::from_slice(&raw).map_err(|e| CodecError::HeaderCorrupt {
                detail: format!("metadata parse: {e}"),
            })?;
            Some(value)
        }
        None => None,
    };

    let index_name = header.schema.index().name.clone();
    let mut index: Option<Column> = None;
    let mut decoded: Vec<(String, Column)> = Vec::new();
    for entry in &header.fields {
        let is_index = entry.name == index_name;
        let wanted = is_index
            || columns.map_or(true, |names| names.iter().any(|n| n == &entry.name));
        if !wanted {
            continue;
        }
        let dtype = if is_index {
            header.schema.index().dtype
        } else {
            header
                .schema
                .field(&entry.name)
                .map(|f| f.dtype)
                .context(HeaderCorruptSnafu {
                    detail: format!("field {} missing from schema", entry.name),
                })?
        };
        let region = field_region(body, entry)?;
        let col = field::decode_column(&entry.field, dtype, region, &pool).map_err(|source| {
            CodecError::Field {
                name: entry.name.clone(),
                source,
            }
        })?;
        if is_index {
            index = Some(col);
        } else {
            decoded.push((entry.name.clone(), col));
        }
    }

    let index = index.context(HeaderCorruptSnafu {
        detail: "index column missing from field table".to_string(),
    })?;

    let schema = match columns {
        Some(names) => header.schema.project(names),
        None => header.schema.clone(),
    };
    let mut ordered = Vec::with_capacity(schema.fields().len());
    for def in schema.fields() {
        let col = decoded
            .iter()
            .find(|(name, _)| name == &def.name)
            .map(|(_, c)| c.clone())
            .context(HeaderCorruptSnafu {
                detail: format!("column {} missing from field table", def.name),
            })?;
        ordered.push(col);
    }

    Ok(Segment {
        schema,
        index,
        columns: ordered,
        start_index: header.start_index.clone(),
        end_index: header.end_index.clone(),
        compacted: header.compacted,
        metadata,
    })
}

/// Decode only the header, verifying framing and body accounting.
pub fn decode_header(bytes: &[u8]) -> Result<(SegmentHeader, &[u8]), CodecError> {
    ensure!(bytes.len() >= 16, TruncatedSnafu {
        detail: format!("{} bytes is too short for framing", bytes.len()),
    });
    ensure!(&bytes[..8] == MAGIC, BadMagicSnafu);

    let a = u32::from_le_bytes(bytes[8..12].try_into().unwrap_or([0; 4]));
    let b = u32::from_le_bytes(bytes[12..16].try_into().unwrap_or([0; 4]));
    // v1 leads with the version word; v2 leads with the header length.
    let (version, hdr_len) = if a == ENCODING_V1 {
        (a, b as usize)
    } else if b == ENCODING_V2 {
        (b, a as usize)
    } else {
        return UnsupportedVersionSnafu { version: a }.fail();
    };

    ensure!(
        bytes.len() >= 16 + hdr_len && hdr_len >= 9,
        TruncatedSnafu {
            detail: format!("header region of {hdr_len} bytes does not fit"),
        }
    );
    let header_region = &bytes[16..16 + hdr_len];
    let codec = header_codec_from_tag(header_region[0])?;
    let expected_hash = u64::from_le_bytes(header_region[1..9].try_into().unwrap_or([0; 8]));
    let header_json = block::decode_block(&header_region[9..], codec, expected_hash)?;
    let header: SegmentHeader =
        serde_json::from_slice(&header_json).map_err(|e| CodecError::HeaderCorrupt {
            detail: format!("header parse: {e}"),
        })?;

    ensure!(
        header.encoding_version == version,
        HeaderCorruptSnafu {
            detail: format!(
                "framing says v{version}, header says v{}",
                header.encoding_version
            ),
        }
    );
    if version == ENCODING_V2 {
        for f in &header.reserved {
            ensure!(!RESERVED_V2.contains(f), ReservedFieldSnafu { field: *f });
        }
    }

    let body = &bytes[16 + hdr_len..];
    verify_body_accounting(&header, body)?;
    Ok((header, body))
}

/// Check that the enumerated regions tile the body exactly.
fn verify_body_accounting(header: &SegmentHeader, body: &[u8]) -> Result<(), CodecError> {
    let mut expected = 0u64;
    for entry in &header.fields {
        ensure!(
            entry.offset == expected,
            HeaderCorruptSnafu {
                detail: format!(
                    "field {} at offset {}, expected {expected}",
                    entry.name, entry.offset
                ),
            }
        );
        expected += entry.len;
    }
    for entry in header.metadata.iter().chain(header.string_pool.iter()) {
        ensure!(
            entry.offset == expected,
            HeaderCorruptSnafu {
                detail: format!("aux field at offset {}, expected {expected}", entry.offset),
            }
        );
        expected += entry.len;
    }
    ensure!(
        expected == body.len() as u64,
        BodyMismatchSnafu {
            expected,
            actual: body.len() as u64,
        }
    );
    Ok(())
}

fn field_region<'a>(body: &'a [u8], entry: &FieldEntry) -> Result<&'a [u8], CodecError> {
    let start = entry.offset as usize;
    let end = start + entry.len as usize;
    ensure!(end <= body.len(), TruncatedSnafu {
        detail: format!("field {} region out of range", entry.name),
    });
    Ok(&body[start..end])
}

fn aux_region<'a>(body: &'a [u8], entry: &AuxEntry) -> Result<&'a [u8], CodecError> {
    let start = entry.offset as usize;
    let end = start + entry.len as usize;
    ensure!(end <= body.len(), TruncatedSnafu {
        detail: "aux field region out of range".to_string(),
    });
    Ok(&body[start..end])
}

fn header_codec_tag(codec: Codec) -> u8 {
    match codec {
        Codec::Passthrough => 0,
        Codec::Zstd { .. } => 1,
        Codec::Lz4 { .. } => 2,
        // Pfor makes no sense for JSON; collapse to passthrough.
        Codec::TurboPfor { .. } => 0,
    }
}

fn header_codec_from_tag(tag: u8) -> Result<Codec, CodecError> {
    Ok(match tag {
        0 => Codec::Passthrough,
        1 => Codec::Zstd {
            level: 3,
            streaming: false,
        },
        2 => Codec::Lz4 { acceleration: 1 },
        other => {
            return Err(CodecError::HeaderCorrupt {
                detail: format!("unknown header codec tag {other}"),
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FieldDef, Scalar};
    use xxhash_rust::xxh3::xxh3_64;
    use roaring::RoaringBitmap;

    fn sample_frame() -> Frame {
        let schema = Schema::new(
            FieldDef::new("ts", DType::Timestamp),
            vec![
                FieldDef::new("x", DType::Int64),
                FieldDef::new("y", DType::Float64),
                FieldDef::new("venue", DType::Utf8),
            ],
        )
        .expect("valid schema");
        let present: RoaringBitmap = [0u32, 1, 3].into_iter().collect();
        Frame::new(
            schema,
            Column::from_i64(DType::Timestamp, vec![100, 200, 300, 400]),
            vec![
                Column::from_i64(DType::Int64, vec![1, -2, 3, -4]),
                Column::from_f64(vec![0.5, 1.5, 2.5, 3.5]),
                Column::from_utf8(vec![
                    "XNAS".to_string(),
                    "XLON".to_string(),
                    String::new(),
                    "XNAS".to_string(),
                ])
                .with_present(present),
            ],
        )
        .expect("valid frame")
    }

    #[test]
    fn segment_roundtrips_v1() {
        let frame = sample_frame();
        let segment = Segment::from_frame(&frame, Some(serde_json::json!({"origin": "unit"})));
        let bytes = encode(&segment, &EncodeOptions::default()).expect("encode");
        let back = decode(&bytes).expect("decode");
        assert_eq!(back, segment);
        assert_eq!(back.start_index, Some(IndexValue::Ts(100)));
        assert_eq!(back.end_index, Some(IndexValue::Ts(400)));
    }

    #[test]
    fn segment_roundtrips_v2() {
        let frame = sample_frame();
        let segment = Segment::from_frame(&frame, None);
        let opts = EncodeOptions {
            encoding_version: ENCODING_V2,
            ..EncodeOptions::default()
        };
        let bytes = encode(&segment, &opts).expect("encode");
        let back = decode(&bytes).expect("decode");
        assert_eq!(back, segment);
    }

    #[test]
    fn column_projection_decodes_subset() {
        let frame = sample_frame();
        let segment = Segment::from_frame(&frame, None);
        let bytes = encode(&segment, &EncodeOptions::default()).expect("encode");
        let back =
            decode_columns(&bytes, Some(&["y".to_string()])).expect("decode projection");
        assert_eq!(back.schema.fields().len(), 1);
        assert_eq!(back.columns[0].scalar_at(2), Some(Scalar::F64(2.5)));
        assert_eq!(back.index.len(), 4);
    }

    #[test]
    fn corrupt_body_byte_reports_corrupt_block() {
        let frame = sample_frame();
        let segment = Segment::from_frame(&frame, None);
        let mut bytes = encode(&segment, &EncodeOptions::default())
            .expect("encode")
            .to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = decode(&bytes).expect_err("corrupt");
        assert!(
            matches!(
                &err,
                CodecError::Field { .. } | CodecError::Block { .. } | CodecError::BodyMismatch { .. }
            ),
            "unexpected error {err:?}"
        );
    }

    #[test]
    fn trailing_bytes_rejected() {
        let frame = sample_frame();
        let segment = Segment::from_frame(&frame, None);
        let mut bytes = encode(&segment, &EncodeOptions::default())
            .expect("encode")
            .to_vec();
        bytes.push(0);
        let err = decode(&bytes).expect_err("trailing");
        assert!(matches!(err, CodecError::BodyMismatch { .. }));
    }

    #[test]
    fn bad_magic_rejected() {
        let err = decode(b"NOTASEGMENT_____").expect_err("magic");
        assert!(matches!(err, CodecError::BadMagic));
    }

    #[test]
    fn v2_rejects_reserved_fields() {
        let frame = sample_frame();
        let segment = Segment::from_frame(&frame, None);
        let opts = EncodeOptions {
            encoding_version: ENCODING_V2,
            header_codec: Codec::Passthrough,
            compacted: false,
        };
        let bytes = encode(&segment, &opts).expect("encode").to_vec();

        // Re-render the header with a reserved field injected.
        let hdr_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let mut header: SegmentHeader =
            serde_json::from_slice(&bytes[16 + 9..16 + hdr_len]).expect("header json");
        header.reserved.push(11);
        let new_json = serde_json::to_vec(&header).expect("serialize");
        let hash = xxh3_64(&new_json);

        let mut out = bytes[..8].to_vec();
        out.extend_from_slice(&((9 + new_json.len()) as u32).to_le_bytes());
        out.extend_from_slice(&ENCODING_V2.to_le_bytes());
        out.push(0);
        out.extend_from_slice(&hash.to_le_bytes());
        out.extend_from_slice(&new_json);
        out.extend_from_slice(&bytes[16 + hdr_len..]);

        let err = decode(&out).expect_err("reserved");
        assert!(matches!(err, CodecError::ReservedField { field: 11 }));
    }

    #[test]
    fn stats_recorded_in_field_table() {
        let frame = sample_frame();
        let segment = Segment::from_frame(&frame, None);
        let bytes = encode(&segment, &EncodeOptions::default()).expect("encode");
        let (header, _) = decode_header(&bytes).expect("header");
        let x = header
            .fields
            .iter()
            .find(|f| f.name == "x")
            .expect("x entry");
        let stats = x.stats.as_ref().expect("stats populated");
        assert_eq!(stats.min, Some(Scalar::I64(-4)));
        assert_eq!(stats.max, Some(Scalar::I64(3)));
    }
}
