use thiserror::Error;

/// Failures raised by the tensor codec and tensor constructors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unsupported tensor datatype: {0}")]
    UnsupportedType(String),

    #[error("malformed tensor: {0}")]
    MalformedTensor(String),
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;
