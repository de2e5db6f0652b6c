use tensorport_core::CodecError;
use thiserror::Error;

/// A failed gRPC call or a broken channel, as reported by tonic.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("[{code:?}] {message}")]
pub struct TransportError {
    pub message: String,
    pub code: tonic::Code,
    pub debug_details: String,
}

impl From<tonic::Status> for TransportError {
    fn from(status: tonic::Status) -> Self {
        Self {
            message: status.message().to_string(),
            code: status.code(),
            debug_details: format!("{status:?}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported tensor datatype: {0}")]
    UnsupportedType(String),

    #[error("malformed tensor: {0}")]
    MalformedTensor(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("inference stream is already initialized")]
    AlreadyInitialized,

    #[error("inference stream is not initialized")]
    NotInitialized,

    #[error("inference stream is closed")]
    StreamClosed,

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Error reported in-band by the server for a single request.
    #[error("inference failed: {0}")]
    Application(String),

    /// The duplex channel broke; requests still queued were dropped.
    #[error("inference stream aborted, {undelivered} request(s) left unanswered: {source}")]
    StreamAborted {
        undelivered: usize,
        #[source]
        source: TransportError,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("failed to connect to {url}")]
    Connect {
        url: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("{0}")]
    Runtime(String),
}

impl Error {
    /// The gRPC status code behind this error, if it came from the transport.
    pub fn code(&self) -> Option<tonic::Code> {
        match self {
            Error::Transport(e) | Error::StreamAborted { source: e, .. } => Some(e.code),
            _ => None,
        }
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnsupportedType(t) => Error::UnsupportedType(t),
            CodecError::MalformedTensor(m) => Error::MalformedTensor(m),
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Error::Transport(status.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
