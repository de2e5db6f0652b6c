use bytes::Bytes;
use tensorport_core::{codec, DType, Shape, Tensor};
use tensorport_proto::inference as pb;
use tensorport_proto::inference::model_infer_request::{
    InferInputTensor, InferRequestedOutputTensor,
};

use crate::parameter::{insert_user_parameter, lookup, ParameterMap};
use crate::{Error, Parameter, Result, SEQUENCE_END, SEQUENCE_ID, SEQUENCE_START};

/// An input tensor descriptor plus its raw wire payload.
#[derive(Clone, Debug)]
pub struct InferInput {
    name: String,
    datatype: DType,
    shape: Shape,
    data: Option<Bytes>,
    parameters: ParameterMap,
}

impl InferInput {
    pub fn new(name: impl Into<String>, shape: impl Into<Shape>, datatype: DType) -> Self {
        Self {
            name: name.into(),
            datatype,
            shape: shape.into(),
            data: None,
            parameters: ParameterMap::new(),
        }
    }

    pub fn from_tensor(name: impl Into<String>, tensor: &Tensor) -> Result<Self> {
        Self::new(name, tensor.shape().clone(), tensor.dtype()).with_tensor(tensor)
    }

    /// Encodes `tensor` as this input's payload, adopting its datatype and shape.
    pub fn with_tensor(mut self, tensor: &Tensor) -> Result<Self> {
        self.data = Some(codec::encode(tensor)?);
        self.datatype = tensor.dtype();
        self.shape = tensor.shape().clone();
        Ok(self)
    }

    /// Attaches an already-encoded payload after checking it fits the descriptor.
    pub fn with_raw(mut self, raw: impl Into<Bytes>) -> Result<Self> {
        let raw = raw.into();
        match codec::fixed_byte_len(self.datatype, &self.shape)? {
            Some(expected) if raw.len() != expected => {
                return Err(Error::MalformedTensor(format!(
                    "input {} expects {expected} bytes of {} for shape {:?}, got {}",
                    self.name,
                    self.datatype,
                    self.shape.dims(),
                    raw.len()
                )));
            }
            Some(_) => {}
            None => {
                codec::decode(&raw, self.datatype, &self.shape)?;
            }
        }
        self.data = Some(raw);
        Ok(self)
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<Parameter>) -> Result<()> {
        insert_user_parameter(&mut self.parameters, key.into(), value.into())
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Parameter>) -> Result<Self> {
        self.set_parameter(key, value)?;
        Ok(self)
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> DType {
        self.datatype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn raw(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    fn into_proto(self) -> Result<(InferInputTensor, Bytes)> {
        let data = self
            .data
            .ok_or_else(|| Error::InvalidParameter(format!("input {} has no data", self.name)))?;
        let tensor = InferInputTensor {
            name: self.name,
            datatype: self.datatype.as_str().to_string(),
            shape: self.shape.to_wire(),
            parameters: self.parameters,
            contents: None,
        };
        Ok((tensor, data))
    }
}

/// Asks the server for one named output.
#[derive(Clone, Debug)]
pub struct InferRequestedOutput {
    name: String,
    parameters: ParameterMap,
}

impl InferRequestedOutput {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: ParameterMap::new(),
        }
    }

    /// Requests the top `k` classes instead of the raw tensor.
    pub fn with_class_count(mut self, k: u32) -> Self {
        self.parameters
            .insert("classification".into(), Parameter::Int(k.into()).to_proto());
        self
    }

    pub fn set_parameter(&mut self, key: impl Into<String>, value: impl Into<Parameter>) -> Result<()> {
        insert_user_parameter(&mut self.parameters, key.into(), value.into())
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn into_proto(self) -> InferRequestedOutputTensor {
        InferRequestedOutputTensor {
            name: self.name,
            parameters: self.parameters,
        }
    }
}

/// Sequence membership of a request. `id == 0` means "not in a sequence".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequenceControl {
    pub id: u64,
    pub start: bool,
    pub end: bool,
}

impl SequenceControl {
    pub fn new(id: u64, start: bool, end: bool) -> Self {
        Self { id, start, end }
    }

    fn apply(&self, params: &mut ParameterMap) -> Result<()> {
        if self.id == 0 {
            return Ok(());
        }
        let id = i64::try_from(self.id).map_err(|_| {
            Error::InvalidParameter(format!("sequence id {} does not fit in int64", self.id))
        })?;
        params.insert(SEQUENCE_ID.into(), Parameter::Int(id).to_proto());
        if self.start {
            params.insert(SEQUENCE_START.into(), Parameter::Bool(true).to_proto());
        }
        if self.end {
            params.insert(SEQUENCE_END.into(), Parameter::Bool(true).to_proto());
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct InferRequestBuilder {
    model_name: String,
    model_version: String,
    request_id: Option<String>,
    inputs: Vec<InferInput>,
    outputs: Vec<InferRequestedOutput>,
    parameters: Vec<(String, Parameter)>,
    sequence: SequenceControl,
}

impl InferRequestBuilder {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            model_version: String::new(),
            request_id: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
            sequence: SequenceControl::default(),
        }
    }

    /// Empty lets the server pick a version by its own policy.
    pub fn model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = version.into();
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn input(mut self, input: InferInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn inputs(mut self, inputs: impl IntoIterator<Item = InferInput>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    pub fn output(self, name: impl Into<String>) -> Self {
        self.output_with(InferRequestedOutput::new(name))
    }

    pub fn output_with(mut self, output: InferRequestedOutput) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Parameter>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    pub fn sequence(mut self, id: u64, start: bool, end: bool) -> Self {
        self.sequence = SequenceControl::new(id, start, end);
        self
    }

    pub fn sequence_control(mut self, sequence: SequenceControl) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn build(self) -> Result<InferRequest> {
        if self.model_name.is_empty() {
            return Err(Error::InvalidParameter("model name must not be empty".into()));
        }

        let mut parameters = ParameterMap::new();
        for (key, value) in self.parameters {
            insert_user_parameter(&mut parameters, key, value)?;
        }
        self.sequence.apply(&mut parameters)?;

        let mut inputs = Vec::with_capacity(self.inputs.len());
        let mut raw_input_contents = Vec::with_capacity(self.inputs.len());
        for input in self.inputs {
            let (tensor, raw) = input.into_proto()?;
            inputs.push(tensor);
            raw_input_contents.push(raw.to_vec());
        }

        Ok(InferRequest {
            inner: pb::ModelInferRequest {
                model_name: self.model_name,
                model_version: self.model_version,
                id: self.request_id.unwrap_or_default(),
                parameters,
                inputs,
                outputs: self
                    .outputs
                    .into_iter()
                    .map(InferRequestedOutput::into_proto)
                    .collect(),
                raw_input_contents,
            },
        })
    }
}

/// A fully assembled request, ready to hand to a dispatcher or a stream.
#[derive(Clone, Debug, PartialEq)]
pub struct InferRequest {
    inner: pb::ModelInferRequest,
}

impl InferRequest {
    pub fn builder(model_name: impl Into<String>) -> InferRequestBuilder {
        InferRequestBuilder::new(model_name)
    }

    pub fn from_proto(inner: pb::ModelInferRequest) -> Self {
        Self { inner }
    }

    pub fn model_name(&self) -> &str {
        &self.inner.model_name
    }

    pub fn model_version(&self) -> &str {
        &self.inner.model_version
    }

    pub fn id(&self) -> Option<&str> {
        Some(self.inner.id.as_str()).filter(|id| !id.is_empty())
    }

    pub fn parameter(&self, key: &str) -> Option<Parameter> {
        lookup(&self.inner.parameters, key)
    }

    pub fn parameter_keys(&self) -> impl Iterator<Item = &str> {
        self.inner.parameters.keys().map(String::as_str)
    }

    pub fn as_proto(&self) -> &pb::ModelInferRequest {
        &self.inner
    }

    pub fn into_proto(self) -> pb::ModelInferRequest {
        self.inner
    }
}

/// Checks shared by every send path, unary or streamed.
pub(crate) fn validate(request: &pb::ModelInferRequest) -> Result<()> {
    if request.model_name.is_empty() {
        return Err(Error::InvalidParameter("model name must not be empty".into()));
    }
    if request.raw_input_contents.len() != request.inputs.len() {
        return Err(Error::InvalidParameter(format!(
            "{} inputs but {} raw payloads",
            request.inputs.len(),
            request.raw_input_contents.len()
        )));
    }
    Ok(())
}
