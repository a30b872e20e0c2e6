//! Byte-level encoding for arrays and batches sent between ranks.
//!
//! Everything is little-endian. An encoded array is self-describing: data
//! type tag, row count, validity bytes, then the physical data. Varlen data
//! ships offsets and heap separately so the receiver rebuilds storage without
//! re-measuring values.

use bytes::{Buf, BufMut};
use regatta_error::{ErrorKind, RegattaError, Result};

use super::array::{primitive_dispatch, Array, ArrayData, PhysicalPrimitive};
use super::batch::Batch;
use super::bitmap::Bitmap;
use super::datatype::{DataType, DecimalTypeMeta, PhysicalType};
use super::storage::{BinaryStorage, Utf8Storage, VarlenStorage};

const TAG_BOOLEAN: u8 = 0;
const TAG_INT8: u8 = 1;
const TAG_INT16: u8 = 2;
const TAG_INT32: u8 = 3;
const TAG_INT64: u8 = 4;
const TAG_INT128: u8 = 5;
const TAG_UINT8: u8 = 6;
const TAG_UINT16: u8 = 7;
const TAG_UINT32: u8 = 8;
const TAG_UINT64: u8 = 9;
const TAG_FLOAT32: u8 = 10;
const TAG_FLOAT64: u8 = 11;
const TAG_DECIMAL128: u8 = 12;
const TAG_DATE32: u8 = 13;
const TAG_TIMESTAMP: u8 = 14;
const TAG_INTERVAL: u8 = 15;
const TAG_UTF8: u8 = 16;
const TAG_BINARY: u8 = 17;

pub fn encode_datatype(datatype: &DataType, buf: &mut Vec<u8>) {
    match datatype {
        DataType::Boolean => buf.put_u8(TAG_BOOLEAN),
        DataType::Int8 => buf.put_u8(TAG_INT8),
        DataType::Int16 => buf.put_u8(TAG_INT16),
        DataType::Int32 => buf.put_u8(TAG_INT32),
        DataType::Int64 => buf.put_u8(TAG_INT64),
        DataType::Int128 => buf.put_u8(TAG_INT128),
        DataType::UInt8 => buf.put_u8(TAG_UINT8),
        DataType::UInt16 => buf.put_u8(TAG_UINT16),
        DataType::UInt32 => buf.put_u8(TAG_UINT32),
        DataType::UInt64 => buf.put_u8(TAG_UINT64),
        DataType::Float32 => buf.put_u8(TAG_FLOAT32),
        DataType::Float64 => buf.put_u8(TAG_FLOAT64),
        DataType::Decimal128(meta) => {
            buf.put_u8(TAG_DECIMAL128);
            buf.put_u8(meta.precision);
            buf.put_i8(meta.scale);
        }
        DataType::Date32 => buf.put_u8(TAG_DATE32),
        DataType::Timestamp => buf.put_u8(TAG_TIMESTAMP),
        DataType::Interval => buf.put_u8(TAG_INTERVAL),
        DataType::Utf8 => buf.put_u8(TAG_UTF8),
        DataType::Binary => buf.put_u8(TAG_BINARY),
    }
}

pub fn decode_datatype(buf: &mut &[u8]) -> Result<DataType> {
    ensure_remaining(buf, 1)?;
    let tag = buf.get_u8();
    Ok(match tag {
        TAG_BOOLEAN => DataType::Boolean,
        TAG_INT8 => DataType::Int8,
        TAG_INT16 => DataType::Int16,
        TAG_INT32 => DataType::Int32,
        TAG_INT64 => DataType::Int64,
        TAG_INT128 => DataType::Int128,
        TAG_UINT8 => DataType::UInt8,
        TAG_UINT16 => DataType::UInt16,
        TAG_UINT32 => DataType::UInt32,
        TAG_UINT64 => DataType::UInt64,
        TAG_FLOAT32 => DataType::Float32,
        TAG_FLOAT64 => DataType::Float64,
        TAG_DECIMAL128 => {
            ensure_remaining(buf, 2)?;
            let precision = buf.get_u8();
            let scale = buf.get_i8();
            DataType::Decimal128(DecimalTypeMeta::new(precision, scale))
        }
        TAG_DATE32 => DataType::Date32,
        TAG_TIMESTAMP => DataType::Timestamp,
        TAG_INTERVAL => DataType::Interval,
        TAG_UTF8 => DataType::Utf8,
        TAG_BINARY => DataType::Binary,
        other => {
            return Err(
                RegattaError::with_kind(ErrorKind::Internal, "Unknown data type tag")
                    .with_field("tag", other),
            )
        }
    })
}

pub fn encode_array(arr: &Array, buf: &mut Vec<u8>) -> Result<()> {
    encode_datatype(arr.datatype(), buf);
    buf.put_u64_le(arr.len() as u64);
    buf.put_slice(arr.validity().as_bytes());

    match arr.data() {
        ArrayData::Boolean(s) => buf.put_slice(s.bitmap().as_bytes()),
        ArrayData::Utf8(s) => encode_varlen(s.inner(), buf),
        ArrayData::Binary(s) => encode_varlen(s.inner(), buf),
        data => {
            primitive_dispatch!(data.physical_type(), encode_primitive(arr, buf), other => {
                unreachable!("non-primitive physical type handled above: {other}")
            })?
        }
    }

    Ok(())
}

fn encode_primitive<T: PhysicalPrimitive>(arr: &Array, buf: &mut Vec<u8>) -> Result<()> {
    let values = arr.primitive_slice::<T>()?;
    buf.reserve(values.len() * T::SIZE);
    for v in values {
        v.encode_le(buf);
    }
    Ok(())
}

fn encode_varlen(storage: &VarlenStorage, buf: &mut Vec<u8>) {
    for &offset in storage.offsets() {
        buf.put_u32_le(offset);
    }
    buf.put_u64_le(storage.raw_data().len() as u64);
    buf.put_slice(storage.raw_data());
}

pub fn decode_array(buf: &mut &[u8]) -> Result<Array> {
    let datatype = decode_datatype(buf)?;

    ensure_remaining(buf, 8)?;
    let len = buf.get_u64_le() as usize;

    let validity_bytes = len.div_ceil(8);
    ensure_remaining(buf, validity_bytes)?;
    let validity = Bitmap::try_from_bytes(&buf[..validity_bytes], len)
        .ok_or_else(|| RegattaError::with_kind(ErrorKind::Internal, "Malformed validity bytes"))?;
    buf.advance(validity_bytes);

    let data = match datatype.physical_type() {
        PhysicalType::Boolean => {
            ensure_remaining(buf, validity_bytes)?;
            let bitmap = Bitmap::try_from_bytes(&buf[..validity_bytes], len).ok_or_else(|| {
                RegattaError::with_kind(ErrorKind::Internal, "Malformed boolean bytes")
            })?;
            buf.advance(validity_bytes);
            ArrayData::Boolean(std::sync::Arc::new(bitmap.into()))
        }
        PhysicalType::Utf8 => {
            let storage = decode_varlen(buf, len)?;
            ArrayData::Utf8(std::sync::Arc::new(Utf8Storage::try_from_varlen(storage)?))
        }
        PhysicalType::Binary => {
            let storage = decode_varlen(buf, len)?;
            ArrayData::Binary(std::sync::Arc::new(BinaryStorage::from(storage)))
        }
        phys => primitive_dispatch!(phys, decode_primitive(buf, len), other => {
            unreachable!("non-primitive physical type handled above: {other}")
        })?,
    };

    Array::new_with_validity(datatype, data, validity)
}

fn decode_primitive<T: PhysicalPrimitive>(buf: &mut &[u8], len: usize) -> Result<ArrayData> {
    ensure_remaining(buf, len * T::SIZE)?;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(T::decode_le(&buf[..T::SIZE]));
        buf.advance(T::SIZE);
    }
    Ok(T::into_array_data(values))
}

fn decode_varlen(buf: &mut &[u8], len: usize) -> Result<VarlenStorage> {
    ensure_remaining(buf, (len + 1) * 4)?;
    let mut offsets = Vec::with_capacity(len + 1);
    for _ in 0..=len {
        offsets.push(buf.get_u32_le());
    }

    ensure_remaining(buf, 8)?;
    let data_len = buf.get_u64_le() as usize;
    ensure_remaining(buf, data_len)?;
    let data = buf[..data_len].to_vec();
    buf.advance(data_len);

    VarlenStorage::try_from_parts(offsets, data)
}

/// Encode a batch: column count, row count, then each column.
///
/// The explicit row count is what keeps zero-column batches meaningful on the
/// receiving side.
pub fn encode_batch(batch: &Batch, buf: &mut Vec<u8>) -> Result<()> {
    buf.put_u32_le(batch.num_columns() as u32);
    buf.put_u64_le(batch.num_rows() as u64);
    for col in batch.columns() {
        encode_array(col, buf)?;
    }
    Ok(())
}

pub fn decode_batch(buf: &mut &[u8]) -> Result<Batch> {
    ensure_remaining(buf, 12)?;
    let num_cols = buf.get_u32_le() as usize;
    let num_rows = buf.get_u64_le() as usize;

    if num_cols == 0 {
        return Ok(Batch::empty_with_num_rows(num_rows));
    }

    let cols = (0..num_cols)
        .map(|_| decode_array(buf))
        .collect::<Result<Vec<_>>>()?;
    Batch::try_new(cols)
}

fn ensure_remaining(buf: &&[u8], need: usize) -> Result<()> {
    if buf.remaining() < need {
        return Err(
            RegattaError::with_kind(ErrorKind::Internal, "Unexpected end of encoded buffer")
                .with_field("need", need)
                .with_field("remaining", buf.remaining()),
        );
    }
    Ok(())
}
