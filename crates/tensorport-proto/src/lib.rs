//! Client and server stubs for `inference.GRPCInferenceService`.
//!
//! The server half is generated as well so tests can stand up an
//! in-process endpoint.

pub mod inference {
    tonic::include_proto!("inference");
}

pub use inference::grpc_inference_service_client::GrpcInferenceServiceClient;
pub use inference::grpc_inference_service_server::{
    GrpcInferenceService, GrpcInferenceServiceServer,
};
