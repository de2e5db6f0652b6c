//! Raw tensor encoding used in `raw_input_contents` / `raw_output_contents`.
//!
//! Fixed-width types are flat row-major arrays of little-endian elements
//! (BOOL is one byte, 0 or 1). BYTES tensors are a concatenation of
//! `(u32 little-endian length, payload)` records, one per element, with no
//! other framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use half::f16;

use crate::{CodecError, CodecResult, DType, Shape, Tensor, TensorData};

const LEN_PREFIX: usize = std::mem::size_of::<u32>();

pub fn encode(tensor: &Tensor) -> CodecResult<Bytes> {
    let data = tensor.data();
    let mut out = BytesMut::with_capacity(encoded_len_hint(data));

    match data {
        TensorData::Bool(v) => v.iter().for_each(|b| out.put_u8(u8::from(*b))),
        TensorData::I8(v) => v.iter().for_each(|x| out.put_i8(*x)),
        TensorData::I16(v) => v.iter().for_each(|x| out.put_i16_le(*x)),
        TensorData::I32(v) => v.iter().for_each(|x| out.put_i32_le(*x)),
        TensorData::I64(v) => v.iter().for_each(|x| out.put_i64_le(*x)),
        TensorData::U8(v) => out.put_slice(v),
        TensorData::U16(v) => v.iter().for_each(|x| out.put_u16_le(*x)),
        TensorData::U32(v) => v.iter().for_each(|x| out.put_u32_le(*x)),
        TensorData::U64(v) => v.iter().for_each(|x| out.put_u64_le(*x)),
        TensorData::F16(v) => v.iter().for_each(|x| out.put_u16_le(x.to_bits())),
        TensorData::F32(v) => v.iter().for_each(|x| out.put_f32_le(*x)),
        TensorData::F64(v) => v.iter().for_each(|x| out.put_f64_le(*x)),
        TensorData::Bytes(items) => {
            for (idx, item) in items.iter().enumerate() {
                let len = u32::try_from(item.len()).map_err(|_| {
                    CodecError::MalformedTensor(format!(
                        "BYTES element {idx} is {} bytes, over the u32 length prefix limit",
                        item.len()
                    ))
                })?;
                out.put_u32_le(len);
                out.put_slice(item);
            }
        }
    }

    Ok(out.freeze())
}

pub fn decode(buf: &[u8], dtype: DType, shape: &Shape) -> CodecResult<Tensor> {
    let expected = shape.numel()?;
    let data = match dtype.byte_size() {
        Some(width) => decode_fixed(buf, dtype, width, expected)?,
        None => decode_byte_strings(buf, expected)?,
    };
    Tensor::new(shape.clone(), data)
}

/// Decodes using wire-level descriptors: a datatype name and an `int64` shape.
pub fn decode_wire(buf: &[u8], datatype: &str, dims: &[i64]) -> CodecResult<Tensor> {
    let dtype: DType = datatype.parse()?;
    let shape = Shape::from_wire(dims)?;
    decode(buf, dtype, &shape)
}

/// Number of bytes a fixed-width tensor of `shape` occupies on the wire,
/// or `None` for BYTES.
pub fn fixed_byte_len(dtype: DType, shape: &Shape) -> CodecResult<Option<usize>> {
    let Some(width) = dtype.byte_size() else {
        return Ok(None);
    };
    shape
        .numel()?
        .checked_mul(width)
        .map(Some)
        .ok_or_else(|| {
            CodecError::MalformedTensor(format!(
                "{dtype} tensor of shape {:?} is too large to encode",
                shape.dims()
            ))
        })
}

fn encoded_len_hint(data: &TensorData) -> usize {
    match data {
        TensorData::Bytes(items) => items.iter().map(|b| LEN_PREFIX + b.len()).sum(),
        other => other.dtype().byte_size().unwrap_or(0) * other.len(),
    }
}

fn decode_fixed(buf: &[u8], dtype: DType, width: usize, expected: usize) -> CodecResult<TensorData> {
    if buf.len() % width != 0 {
        return Err(CodecError::MalformedTensor(format!(
            "{} bytes is not a multiple of the {dtype} element width ({width})",
            buf.len()
        )));
    }
    let count = buf.len() / width;
    if count != expected {
        return Err(CodecError::MalformedTensor(format!(
            "buffer holds {count} {dtype} elements, shape requires {expected}"
        )));
    }

    let mut cur = buf;
    let data = match dtype {
        DType::Bool => TensorData::Bool((0..count).map(|_| cur.get_u8() != 0).collect()),
        DType::I8 => TensorData::I8((0..count).map(|_| cur.get_i8()).collect()),
        DType::I16 => TensorData::I16((0..count).map(|_| cur.get_i16_le()).collect()),
        DType::I32 => TensorData::I32((0..count).map(|_| cur.get_i32_le()).collect()),
        DType::I64 => TensorData::I64((0..count).map(|_| cur.get_i64_le()).collect()),
        DType::U8 => TensorData::U8(cur.to_vec()),
        DType::U16 => TensorData::U16((0..count).map(|_| cur.get_u16_le()).collect()),
        DType::U32 => TensorData::U32((0..count).map(|_| cur.get_u32_le()).collect()),
        DType::U64 => TensorData::U64((0..count).map(|_| cur.get_u64_le()).collect()),
        DType::F16 => {
            TensorData::F16((0..count).map(|_| f16::from_bits(cur.get_u16_le())).collect())
        }
        DType::F32 => TensorData::F32((0..count).map(|_| cur.get_f32_le()).collect()),
        DType::F64 => TensorData::F64((0..count).map(|_| cur.get_f64_le()).collect()),
        DType::Bytes => return Err(CodecError::UnsupportedType(dtype.to_string())),
    };
    Ok(data)
}

fn decode_byte_strings(buf: &[u8], expected: usize) -> CodecResult<TensorData> {
    let mut cur = buf;
    // every record carries at least its prefix
    let mut items = Vec::with_capacity(expected.min(buf.len() / LEN_PREFIX));

    while cur.has_remaining() {
        let idx = items.len();
        if cur.remaining() < LEN_PREFIX {
            return Err(CodecError::MalformedTensor(format!(
                "truncated length prefix for BYTES element {idx} ({} trailing bytes)",
                cur.remaining()
            )));
        }
        let len = cur.get_u32_le() as usize;
        if cur.remaining() < len {
            return Err(CodecError::MalformedTensor(format!(
                "BYTES element {idx} declares {len} bytes but only {} remain",
                cur.remaining()
            )));
        }
        items.push(Bytes::copy_from_slice(&cur[..len]));
        cur.advance(len);
    }

    if items.len() != expected {
        return Err(CodecError::MalformedTensor(format!(
            "buffer holds {} BYTES elements, shape requires {expected}",
            items.len()
        )));
    }
    Ok(TensorData::Bytes(items))
}
