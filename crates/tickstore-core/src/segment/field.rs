//! Encoded fields: the column-chunk layer between logical columns and
//! block bytes.
//!
//! A field is either an [`NdArrayField`] (numeric/bool values, plus the
//! string pool and metadata payloads) or a [`Dictionary`] pair of ndarrays
//! (distinct-value ids + per-row positions) used for `Utf8` columns. Each
//! field's body region concatenates its shape blocks, value blocks, and an
//! optional sparse presence map; the field descriptor records enough block
//! metadata to split the region back apart without guessing.
//!
//! [`Dictionary`]: EncodedField::Dictionary

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::frame::{Column, ColumnData, DType};
use crate::segment::block::{
    decode_block, encode_block, BlockError, Codec, BLOCK_ENCODER_VERSION,
};

/// Dictionary sub-fields always compress well with LZ4 and are 4-byte
/// lanes, which the pfor paths reject.
const DICT_CODEC: Codec = Codec::Lz4 { acceleration: 1 };

/// Errors raised while encoding or decoding fields.
#[derive(Debug, Snafu)]
pub enum FieldError {
    /// Block-level failure (corruption, unsupported codec).
    #[snafu(transparent)]
    Block {
        /// Underlying block error.
        source: BlockError,
    },

    /// A value does not fit the declared storage width.
    #[snafu(display("value {value} does not fit declared dtype {dtype:?}"))]
    ValueOutOfRange {
        /// Offending value rendered as text.
        value: String,
        /// Declared dtype.
        dtype: DType,
    },

    /// The field metadata and body bytes disagree.
    #[snafu(display("corrupt field: {detail}"))]
    CorruptField {
        /// What was inconsistent.
        detail: String,
    },
}

/// Metadata for one encoded block inside a field's body region.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlockInfo {
    /// Uncompressed byte count.
    pub bytes: u64,
    /// Encoded byte count as laid out in the body.
    pub encoded_bytes: u64,
    /// xxh3-64 over the uncompressed bytes.
    pub hash: u64,
    /// Encoder version the block was written with.
    pub encoder_version: u16,
    /// Codec selection for this block.
    pub codec: Codec,
}

/// A flat array of fixed-width items.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NdArrayField {
    /// Logical item count.
    pub items: u64,
    /// Shape blocks (per-item byte lengths for ragged payloads such as the
    /// string pool; empty for fixed-width values).
    pub shapes: Vec<BlockInfo>,
    /// Value blocks.
    pub values: Vec<BlockInfo>,
    /// Byte length of the trailing serialized presence bitmap; zero when
    /// the field is fully populated.
    pub sparse_map_bytes: u64,
}

impl NdArrayField {
    /// Total encoded length of this field's body region.
    pub fn region_len(&self) -> u64 {
        self.shapes
            .iter()
            .chain(self.values.iter())
            .map(|b| b.encoded_bytes)
            .sum::<u64>()
            + self.sparse_map_bytes
    }
}

/// A column chunk as laid out in a segment body.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum EncodedField {
    /// Fixed-width values (numerics, bools, raw byte payloads).
    NdArray(NdArrayField),
    /// Distinct-value dictionary plus per-row positions (strings).
    Dictionary {
        /// Pool ids of this column's distinct values.
        values: NdArrayField,
        /// Per-row index into `values`.
        positions: NdArrayField,
    },
}

impl EncodedField {
    /// Total encoded length of this field's body region.
    pub fn region_len(&self) -> u64 {
        match self {
            EncodedField::NdArray(a) => a.region_len(),
            EncodedField::Dictionary { values, positions } => {
                values.region_len() + positions.region_len()
            }
        }
    }
}

/// Accumulates the segment-level string pool during encode.
#[derive(Debug, Default)]
pub struct PoolBuilder {
    strings: Vec<String>,
    ids: std::collections::HashMap<String, u32>,
}

impl PoolBuilder {
    /// Intern a string, returning its pool id.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.ids.insert(s.to_string(), id);
        id
    }

    /// True when nothing was interned.
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// The interned strings in id order.
    pub fn strings(&self) -> &[String] {
        &self.strings
    }
}

fn u32_lanes_bytes(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn bytes_to_u32_lanes(raw: &[u8]) -> Result<Vec<u32>, FieldError> {
    ensure!(
        raw.len() % 4 == 0,
        CorruptFieldSnafu {
            detail: format!("u32 lane buffer of {} bytes", raw.len()),
        }
    );
    Ok(raw
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap_or([0; 4])))
        .collect())
}

fn single_block(raw: &[u8], codec: Codec) -> Result<(BlockInfo, Vec<u8>), FieldError> {
    let (encoded, hash) = encode_block(raw, codec)?;
    Ok((
        BlockInfo {
            bytes: raw.len() as u64,
            encoded_bytes: encoded.len() as u64,
            hash,
            encoder_version: BLOCK_ENCODER_VERSION,
            codec,
        },
        encoded,
    ))
}

fn present_bitmap(col: &Column) -> Option<RoaringBitmap> {
    col.present().cloned()
}

fn serialize_sparse(present: Option<&RoaringBitmap>) -> Vec<u8> {
    match present {
        Some(bm) => {
            let mut out = Vec::with_capacity(bm.serialized_size());
            // Serialization into a Vec cannot fail.
            let _ = bm.serialize_into(&mut out);
            out
        }
        None => Vec::new(),
    }
}

/// Render a column's values at the declared storage width, with null
/// sentinels in absent slots.
fn value_bytes(col: &Column, declared: DType) -> Result<Vec<u8>, FieldError> {
    let width = declared.storage_width().unwrap_or(8);
    let mut out = Vec::with_capacity(col.len() * width);
    match col.data() {
        ColumnData::Int64(v) => {
            for &x in v {
                if width == 4 {
                    let narrow =
                        i32::try_from(x).map_err(|_| FieldError::ValueOutOfRange {
                            value: x.to_string(),
                            dtype: declared,
                        })?;
                    out.extend_from_slice(&narrow.to_le_bytes());
                } else {
                    out.extend_from_slice(&x.to_le_bytes());
                }
            }
        }
        ColumnData::UInt64(v) => {
            for &x in v {
                if width == 4 {
                    let narrow =
                        u32::try_from(x).map_err(|_| FieldError::ValueOutOfRange {
                            value: x.to_string(),
                            dtype: declared,
                        })?;
                    out.extend_from_slice(&narrow.to_le_bytes());
                } else {
                    out.extend_from_slice(&x.to_le_bytes());
                }
            }
        }
        ColumnData::Float64(v) => {
            for &x in v {
                if width == 4 {
                    out.extend_from_slice(&(x as f32).to_le_bytes());
                } else {
                    out.extend_from_slice(&x.to_le_bytes());
                }
            }
        }
        ColumnData::Bool(v) => {
            for &x in v {
                out.push(u8::from(x));
            }
        }
        ColumnData::Utf8(_) => {
            return CorruptFieldSnafu {
                detail: "utf8 column routed to fixed-width encoder".to_string(),
            }
            .fail();
        }
    }
    Ok(out)
}

fn values_from_bytes(raw: &[u8], declared: DType, items: usize) -> Result<ColumnData, FieldError> {
    let width = declared.storage_width().unwrap_or(8);
    ensure!(
        raw.len() == items * width,
        CorruptFieldSnafu {
            detail: format!(
                "value buffer is {} bytes, expected {} x {width}",
                raw.len(),
                items
            ),
        }
    );
    Ok(match declared.widened() {
        DType::UInt64 => {
            let mut v = Vec::with_capacity(items);
            for c in raw.chunks_exact(width) {
                v.push(if width == 4 {
                    u64::from(u32::from_le_bytes(c.try_into().unwrap_or([0; 4])))
                } else {
                    u64::from_le_bytes(c.try_into().unwrap_or([0; 8]))
                });
            }
            ColumnData::UInt64(v)
        }
        DType::Float64 => {
            let mut v = Vec::with_capacity(items);
            for c in raw.chunks_exact(width) {
                v.push(if width == 4 {
                    f64::from(f32::from_le_bytes(c.try_into().unwrap_or([0; 4])))
                } else {
                    f64::from_le_bytes(c.try_into().unwrap_or([0; 8]))
                });
            }
            ColumnData::Float64(v)
        }
        DType::Bool => ColumnData::Bool(raw.iter().map(|&b| b != 0).collect()),
        _ => {
            let mut v = Vec::with_capacity(items);
            for c in raw.chunks_exact(width) {
                v.push(if width == 4 {
                    i64::from(i32::from_le_bytes(c.try_into().unwrap_or([0; 4])))
                } else {
                    i64::from_le_bytes(c.try_into().unwrap_or([0; 8]))
                });
            }
            ColumnData::Int64(v)
        }
    })
}

/// Encode one column into a field descriptor plus its body bytes.
///
/// `Utf8` columns intern through `pool` and produce a dictionary field; the
/// supplied codec applies to fixed-width value blocks (the writer picks it
/// per column).
pub fn encode_column(
    col: &Column,
    declared: DType,
    codec: Codec,
    pool: &mut PoolBuilder,
) -> Result<(EncodedField, Vec<u8>), FieldError> {
    if declared == DType::Utf8 {
        return encode_dictionary(col, pool);
    }
    let raw = value_bytes(col, declared)?;
    // Pfor paths need 8-byte lanes; narrow widths go through lz4 instead.
    let effective = match codec {
        Codec::TurboPfor { .. } if declared.storage_width() != Some(8) => DICT_CODEC,
        other => other,
    };
    let (info, encoded) = single_block(&raw, effective)?;
    let sparse = serialize_sparse(col.present());
    let field = NdArrayField {
        items: col.len() as u64,
        shapes: Vec::new(),
        values: vec![info],
        sparse_map_bytes: sparse.len() as u64,
    };
    let mut body = encoded;
    body.extend_from_slice(&sparse);
    Ok((EncodedField::NdArray(field), body))
}

fn encode_dictionary(
    col: &Column,
    pool: &mut PoolBuilder,
) -> Result<(EncodedField, Vec<u8>), FieldError> {
    let strings = match col.data() {
        ColumnData::Utf8(v) => v,
        _ => {
            return CorruptFieldSnafu {
                detail: "dictionary encoder over non-utf8 column".to_string(),
            }
            .fail();
        }
    };

    let mut distinct_pool_ids: Vec<u32> = Vec::new();
    let mut local: std::collections::HashMap<u32, u32> = std::collections::HashMap::new();
    let mut positions = Vec::with_capacity(strings.len());
    for (row, s) in strings.iter().enumerate() {
        if col.is_null(row) {
            positions.push(0u32);
            continue;
        }
        let pool_id = pool.intern(s);
        let local_id = *local.entry(pool_id).or_insert_with(|| {
            distinct_pool_ids.push(pool_id);
            (distinct_pool_ids.len() - 1) as u32
        });
        positions.push(local_id);
    }

    let (values_info, values_bytes) = single_block(&u32_lanes_bytes(&distinct_pool_ids), DICT_CODEC)?;
    let (pos_info, pos_bytes) = single_block(&u32_lanes_bytes(&positions), DICT_CODEC)?;
    let sparse = serialize_sparse(col.present());

    let values = NdArrayField {
        items: distinct_pool_ids.len() as u64,
        shapes: Vec::new(),
        values: vec![values_info],
        sparse_map_bytes: 0,
    };
    let positions_field = NdArrayField {
        items: strings.len() as u64,
        shapes: Vec::new(),
        values: vec![pos_info],
        sparse_map_bytes: sparse.len() as u64,
    };

    let mut body = values_bytes;
    body.extend_from_slice(&pos_bytes);
    body.extend_from_slice(&sparse);
    Ok((
        EncodedField::Dictionary {
            values,
            positions: positions_field,
        },
        body,
    ))
}

/// Encode the segment string pool: shape block of u32 lengths plus a value
/// block of concatenated UTF-8 bytes.
pub fn encode_pool(strings: &[String], codec: Codec) -> Result<(NdArrayField, Vec<u8>), FieldError> {
    let lengths: Vec<u32> = strings.iter().map(|s| s.len() as u32).collect();
    let mut bytes = Vec::new();
    for s in strings {
        bytes.extend_from_slice(s.as_bytes());
    }
    let (shape_info, shape_bytes) = single_block(&u32_lanes_bytes(&lengths), DICT_CODEC)?;
    let (value_info, value_bytes) = single_block(&bytes, codec)?;
    let field = NdArrayField {
        items: strings.len() as u64,
        shapes: vec![shape_info],
        values: vec![value_info],
        sparse_map_bytes: 0,
    };
    let mut body = shape_bytes;
    body.extend_from_slice(&value_bytes);
    Ok((field, body))
}

/// Decode the segment string pool.
pub fn decode_pool(field: &NdArrayField, body: &[u8]) -> Result<Vec<String>, FieldError> {
    let (shapes, values, _) = split_ndarray_regions(field, body)?;
    let lengths = bytes_to_u32_lanes(&shapes)?;
    ensure!(
        lengths.len() == field.items as usize,
        CorruptFieldSnafu {
            detail: "pool shape block disagrees with item count".to_string(),
        }
    );
    let mut out = Vec::with_capacity(lengths.len());
    let mut pos = 0usize;
    for len in lengths {
        let end = pos + len as usize;
        ensure!(
            end <= values.len(),
            CorruptFieldSnafu {
                detail: "pool value block shorter than shapes claim".to_string(),
            }
        );
        let s = std::str::from_utf8(&values[pos..end]).map_err(|e| {
            FieldError::CorruptField {
                detail: format!("pool entry not utf-8: {e}"),
            }
        })?;
        out.push(s.to_string());
        pos = end;
    }
    ensure!(
        pos == values.len(),
        CorruptFieldSnafu {
            detail: "trailing bytes in pool value block".to_string(),
        }
    );
    Ok(out)
}

/// Decode the concatenated shape / value / sparse regions of an ndarray.
fn split_ndarray_regions(
    field: &NdArrayField,
    body: &[u8],
) -> Result<(Vec<u8>, Vec<u8>, Option<RoaringBitmap>), FieldError> {
    ensure!(
        body.len() as u64 == field.region_len(),
        CorruptFieldSnafu {
            detail: format!(
                "field region is {} bytes, descriptor claims {}",
                body.len(),
                field.region_len()
            ),
        }
    );
    let mut pos = 0usize;
    let mut shapes = Vec::new();
    for info in &field.shapes {
        let end = pos + info.encoded_bytes as usize;
        shapes.extend_from_slice(&decode_block(&body[pos..end], info.codec, info.hash)?);
        pos = end;
    }
    let mut values = Vec::new();
    for info in &field.values {
        let end = pos + info.encoded_bytes as usize;
        values.extend_from_slice(&decode_block(&body[pos..end], info.codec, info.hash)?);
        pos = end;
    }
    let sparse = if field.sparse_map_bytes > 0 {
        let end = pos + field.sparse_map_bytes as usize;
        let bm = RoaringBitmap::deserialize_from(&body[pos..end]).map_err(|e| {
            FieldError::CorruptField {
                detail: format!("sparse map: {e}"),
            }
        })?;
        Some(bm)
    } else {
        None
    };
    Ok((shapes, values, sparse))
}

/// Decode one column from its field descriptor and body region.
pub fn decode_column(
    field: &EncodedField,
    declared: DType,
    body: &[u8],
    pool: &[String],
) -> Result<Column, FieldError> {
    match field {
        EncodedField::NdArray(array) => {
            let (_, values, sparse) = split_ndarray_regions(array, body)?;
            let data = values_from_bytes(&values, declared, array.items as usize)?;
            let mut col = Column::from_parts(declared, data, None);
            if let Some(bm) = sparse {
                col = col.with_present(bm);
            }
            Ok(col)
        }
        EncodedField::Dictionary { values, positions } => {
            let values_region = values.region_len() as usize;
            ensure!(
                body.len() >= values_region,
                CorruptFieldSnafu {
                    detail: "dictionary region shorter than values field".to_string(),
                }
            );
            let (_, value_bytes, _) = split_ndarray_regions(values, &body[..values_region])?;
            let (_, pos_bytes, sparse) =
                split_ndarray_regions(positions, &body[values_region..])?;
            let pool_ids = bytes_to_u32_lanes(&value_bytes)?;
            let pos = bytes_to_u32_lanes(&pos_bytes)?;
            ensure!(
                pos.len() == positions.items as usize,
                CorruptFieldSnafu {
                    detail: "dictionary positions disagree with item count".to_string(),
                }
            );
            let mut out = Vec::with_capacity(pos.len());
            for (row, &p) in pos.iter().enumerate() {
                let absent = sparse.as_ref().is_some_and(|bm| !bm.contains(row as u32));
                if absent {
                    out.push(String::new());
                    continue;
                }
                let pool_id = *pool_ids.get(p as usize).context(CorruptFieldSnafu {
                    detail: format!("dictionary position {p} out of range"),
                })?;
                let s = pool.get(pool_id as usize).context(CorruptFieldSnafu {
                    detail: format!("pool id {pool_id} out of range"),
                })?;
                out.push(s.clone());
            }
            let mut col = Column::from_utf8(out);
            if let Some(bm) = sparse {
                col = col.with_present(bm);
            }
            Ok(col)
        }
    }
}

/// Encode an opaque byte payload (segment metadata) as an ndarray field.
pub fn encode_bytes(raw: &[u8], codec: Codec) -> Result<(NdArrayField, Vec<u8>), FieldError> {
    let (info, encoded) = single_block(raw, codec)?;
    Ok((
        NdArrayField {
            items: raw.len() as u64,
            shapes: Vec::new(),
            values: vec![info],
            sparse_map_bytes: 0,
        },
        encoded,
    ))
}

/// Decode an opaque byte payload.
pub fn decode_bytes(field: &NdArrayField, body: &[u8]) -> Result<Vec<u8>, FieldError> {
    let (_, values, _) = split_ndarray_regions(field, body)?;
    Ok(values)
}
