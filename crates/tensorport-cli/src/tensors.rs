//! Text forms of tensors for the command line.

use std::fmt::Display;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use half::f16;
use tensorport_client::{DType, InferInput, Shape, Tensor, TensorData};

/// Parses `NAME:DTYPE:DIMS:VALUES`. DIMS is `x`-separated (`2x3`) and empty
/// for a scalar; VALUES is comma-separated.
pub fn parse_input(spec: &str) -> Result<InferInput> {
    let mut parts = spec.splitn(4, ':');
    let (Some(name), Some(dtype), Some(dims), Some(values)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("input {spec:?} is not NAME:DTYPE:DIMS:VALUES");
    };
    if name.is_empty() {
        bail!("input {spec:?} has no name");
    }
    let dtype: DType = dtype
        .to_ascii_uppercase()
        .parse()
        .with_context(|| format!("input {name}"))?;
    let shape = parse_dims(dims).with_context(|| format!("input {name}"))?;
    let tensor = parse_tensor(dtype, shape, values).with_context(|| format!("input {name}"))?;
    Ok(InferInput::from_tensor(name, &tensor)?)
}

fn parse_dims(dims: &str) -> Result<Shape> {
    if dims.is_empty() {
        return Ok(Shape::from_slice(&[]));
    }
    let dims = dims
        .split('x')
        .map(|d| d.trim().parse::<usize>().with_context(|| format!("bad dimension {d:?}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(Shape::from_slice(&dims))
}

fn parse_all<T>(items: &[&str]) -> Result<Vec<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    items
        .iter()
        .map(|v| v.trim().parse::<T>().with_context(|| format!("bad value {v:?}")))
        .collect()
}

pub fn parse_tensor(dtype: DType, shape: Shape, values: &str) -> Result<Tensor> {
    let items: Vec<&str> = if values.is_empty() {
        Vec::new()
    } else {
        values.split(',').collect()
    };
    let tensor = match dtype {
        DType::Bool => Tensor::from_vec(shape, parse_all::<bool>(&items)?),
        DType::I8 => Tensor::from_vec(shape, parse_all::<i8>(&items)?),
        DType::I16 => Tensor::from_vec(shape, parse_all::<i16>(&items)?),
        DType::I32 => Tensor::from_vec(shape, parse_all::<i32>(&items)?),
        DType::I64 => Tensor::from_vec(shape, parse_all::<i64>(&items)?),
        DType::U8 => Tensor::from_vec(shape, parse_all::<u8>(&items)?),
        DType::U16 => Tensor::from_vec(shape, parse_all::<u16>(&items)?),
        DType::U32 => Tensor::from_vec(shape, parse_all::<u32>(&items)?),
        DType::U64 => Tensor::from_vec(shape, parse_all::<u64>(&items)?),
        DType::F16 => {
            let values = parse_all::<f32>(&items)?;
            Tensor::from_vec(shape, values.into_iter().map(f16::from_f32).collect::<Vec<_>>())
        }
        DType::F32 => Tensor::from_vec(shape, parse_all::<f32>(&items)?),
        DType::F64 => Tensor::from_vec(shape, parse_all::<f64>(&items)?),
        DType::Bytes => Tensor::from_byte_strings(shape, items),
    };
    Ok(tensor?)
}

fn join<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One line: `NAME DTYPE [d0, d1]: v0, v1, ...`
pub fn format_tensor(name: &str, tensor: &Tensor) -> String {
    let values = match tensor.data() {
        TensorData::Bool(v) => join(v),
        TensorData::I8(v) => join(v),
        TensorData::I16(v) => join(v),
        TensorData::I32(v) => join(v),
        TensorData::I64(v) => join(v),
        TensorData::U8(v) => join(v),
        TensorData::U16(v) => join(v),
        TensorData::U32(v) => join(v),
        TensorData::U64(v) => join(v),
        TensorData::F16(v) => join(v),
        TensorData::F32(v) => join(v),
        TensorData::F64(v) => join(v),
        TensorData::Bytes(v) => v
            .iter()
            .map(|b| format!("{:?}", String::from_utf8_lossy(b)))
            .collect::<Vec<_>>()
            .join(", "),
    };
    format!("{name} {} {:?}: {values}", tensor.dtype(), tensor.shape().dims())
}
