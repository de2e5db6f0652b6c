use bytes::Bytes;
use tensorport_core::{codec, CodecError, DType, Element, Shape, Tensor, TensorData};
use tensorport_proto::inference as pb;
use tensorport_proto::inference::model_infer_response::InferOutputTensor;

use crate::parameter::lookup;
use crate::{Error, Parameter, Result};

/// A server response. Outputs are decoded only when asked for.
#[derive(Clone, Debug)]
pub struct InferResult {
    response: pb::ModelInferResponse,
}

impl InferResult {
    pub fn new(response: pb::ModelInferResponse) -> Self {
        Self { response }
    }

    pub fn model_name(&self) -> &str {
        &self.response.model_name
    }

    pub fn model_version(&self) -> &str {
        &self.response.model_version
    }

    pub fn id(&self) -> Option<&str> {
        Some(self.response.id.as_str()).filter(|id| !id.is_empty())
    }

    pub fn outputs(&self) -> &[InferOutputTensor] {
        &self.response.outputs
    }

    pub fn output(&self, name: &str) -> Option<&InferOutputTensor> {
        self.response.outputs.iter().find(|o| o.name == name)
    }

    pub fn parameter(&self, key: &str) -> Option<Parameter> {
        lookup(&self.response.parameters, key)
    }

    /// Decodes the named output. `Ok(None)` when the response has no such output.
    pub fn as_tensor(&self, name: &str) -> Result<Option<Tensor>> {
        let Some(idx) = self.response.outputs.iter().position(|o| o.name == name) else {
            return Ok(None);
        };
        let output = &self.response.outputs[idx];

        let tensor = if self.response.raw_output_contents.is_empty() {
            decode_contents(output)?
        } else {
            let raw = self.response.raw_output_contents.get(idx).ok_or_else(|| {
                Error::InvalidResponse(format!(
                    "output {name} is #{idx} but only {} raw payloads were returned",
                    self.response.raw_output_contents.len()
                ))
            })?;
            codec::decode_wire(raw, &output.datatype, &output.shape)?
        };
        Ok(Some(tensor))
    }

    /// Decodes the named output into a flat vector of `T`.
    pub fn as_vec<T: Element>(&self, name: &str) -> Result<Option<Vec<T>>> {
        let Some(tensor) = self.as_tensor(name)? else {
            return Ok(None);
        };
        tensor.as_slice::<T>().map(|s| Some(s.to_vec())).ok_or_else(|| {
            Error::UnsupportedType(format!(
                "output {name} is {}, not {}",
                tensor.dtype(),
                T::DTYPE
            ))
        })
    }

    pub fn get_response(&self) -> &pb::ModelInferResponse {
        &self.response
    }

    pub fn into_inner(self) -> pb::ModelInferResponse {
        self.response
    }
}

/// Builds a tensor from the typed `contents` field, used when the server did
/// not send raw payloads.
fn decode_contents(output: &InferOutputTensor) -> Result<Tensor> {
    let dtype: DType = output.datatype.parse()?;
    let shape = Shape::from_wire(&output.shape)?;
    let empty = pb::InferTensorContents::default();
    let c = output.contents.as_ref().unwrap_or(&empty);

    let data = match dtype {
        DType::Bool => TensorData::Bool(c.bool_contents.clone()),
        DType::I8 => TensorData::I8(narrow(&c.int_contents, dtype)?),
        DType::I16 => TensorData::I16(narrow(&c.int_contents, dtype)?),
        DType::I32 => TensorData::I32(c.int_contents.clone()),
        DType::I64 => TensorData::I64(c.int64_contents.clone()),
        DType::U8 => TensorData::U8(narrow(&c.uint_contents, dtype)?),
        DType::U16 => TensorData::U16(narrow(&c.uint_contents, dtype)?),
        DType::U32 => TensorData::U32(c.uint_contents.clone()),
        DType::U64 => TensorData::U64(c.uint64_contents.clone()),
        DType::F32 => TensorData::F32(c.fp32_contents.clone()),
        DType::F64 => TensorData::F64(c.fp64_contents.clone()),
        DType::Bytes => TensorData::Bytes(
            c.bytes_contents
                .iter()
                .map(|b| Bytes::copy_from_slice(b))
                .collect(),
        ),
        DType::F16 => {
            return Err(Error::MalformedTensor(format!(
                "output {} is FP16 but carries no raw payload",
                output.name
            )))
        }
    };
    Ok(Tensor::new(shape, data)?)
}

fn narrow<S, T>(values: &[S], dtype: DType) -> std::result::Result<Vec<T>, CodecError>
where
    S: Copy + std::fmt::Display,
    T: TryFrom<S>,
{
    values
        .iter()
        .map(|v| {
            T::try_from(*v)
                .map_err(|_| CodecError::MalformedTensor(format!("{v} is out of range for {dtype}")))
        })
        .collect()
}
