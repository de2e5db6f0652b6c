use std::collections::HashMap;

use tensorport_proto::inference::{infer_parameter::ParameterChoice, InferParameter};

use crate::{Error, Result};

pub const SEQUENCE_ID: &str = "sequence_id";
pub const SEQUENCE_START: &str = "sequence_start";
pub const SEQUENCE_END: &str = "sequence_end";

/// Keys owned by sequence control; the generic parameter setters refuse them.
pub const RESERVED_KEYS: [&str; 3] = [SEQUENCE_ID, SEQUENCE_START, SEQUENCE_END];

pub type ParameterMap = HashMap<String, InferParameter>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Parameter {
    Int(i64),
    Bool(bool),
    String(String),
}

impl Parameter {
    pub fn to_proto(&self) -> InferParameter {
        let choice = match self {
            Parameter::Int(v) => ParameterChoice::Int64Param(*v),
            Parameter::Bool(v) => ParameterChoice::BoolParam(*v),
            Parameter::String(v) => ParameterChoice::StringParam(v.clone()),
        };
        InferParameter {
            parameter_choice: Some(choice),
        }
    }

    /// `None` when the server sent a parameter with no value set.
    pub fn from_proto(param: &InferParameter) -> Option<Self> {
        Some(match param.parameter_choice.as_ref()? {
            ParameterChoice::Int64Param(v) => Parameter::Int(*v),
            ParameterChoice::BoolParam(v) => Parameter::Bool(*v),
            ParameterChoice::StringParam(v) => Parameter::String(v.clone()),
        })
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Parameter::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Parameter::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Parameter::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Parameter {
    fn from(v: i64) -> Self {
        Parameter::Int(v)
    }
}

impl From<i32> for Parameter {
    fn from(v: i32) -> Self {
        Parameter::Int(v.into())
    }
}

impl From<bool> for Parameter {
    fn from(v: bool) -> Self {
        Parameter::Bool(v)
    }
}

impl From<&str> for Parameter {
    fn from(v: &str) -> Self {
        Parameter::String(v.to_string())
    }
}

impl From<String> for Parameter {
    fn from(v: String) -> Self {
        Parameter::String(v)
    }
}

/// Inserts a user parameter after checking the key.
pub(crate) fn insert_user_parameter(
    params: &mut ParameterMap,
    key: String,
    value: Parameter,
) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidParameter("parameter key must not be empty".into()));
    }
    if RESERVED_KEYS.contains(&key.as_str()) {
        return Err(Error::InvalidParameter(format!(
            "{key} is reserved for sequence control; use the sequence settings instead"
        )));
    }
    params.insert(key, value.to_proto());
    Ok(())
}

/// Reads one parameter out of a wire map.
pub fn lookup(params: &ParameterMap, key: &str) -> Option<Parameter> {
    params.get(key).and_then(Parameter::from_proto)
}
