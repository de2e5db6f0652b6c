//! Client for KServe v2 (`inference.GRPCInferenceService`) model servers.
//!
//! Requests are assembled with [`InferRequestBuilder`], then sent either
//! one at a time through a [`Dispatcher`] (or the [`InferenceServerClient`]
//! facade) or as an ordered sequence over a duplex [`StreamSession`].

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod parameter;
pub mod request;
pub mod result;
pub mod stream;
pub mod transport;

pub use client::*;
pub use config::*;
pub use dispatch::*;
pub use error::*;
pub use parameter::*;
pub use request::*;
pub use result::*;
pub use stream::*;
pub use transport::*;

pub use tensorport_core::{CodecError, DType, Element, Shape, Tensor, TensorData};
pub use tensorport_proto::inference as pb;
