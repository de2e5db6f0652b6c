use std::pin::Pin;

use futures::Stream;
use tensorport_proto::inference as pb;
use tensorport_proto::GrpcInferenceServiceClient;
use tonic::transport::Channel;
use tonic::{Request, Status};

use crate::RequestStream;

/// Responses of a duplex inference stream, in server send order.
pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<pb::ModelStreamInferResponse, Status>> + Send + 'static>>;

/// The two inference calls the dispatcher and stream sessions rely on.
///
/// Both may fail with a [`Status`] at call time, and the response stream
/// may also yield one mid-flight.
#[tonic::async_trait]
pub trait InferTransport: Send + Sync + 'static {
    async fn model_infer(
        &self,
        request: Request<pb::ModelInferRequest>,
    ) -> Result<pb::ModelInferResponse, Status>;

    async fn model_stream_infer(
        &self,
        request: Request<RequestStream>,
    ) -> Result<ResponseStream, Status>;
}

/// [`InferTransport`] over a tonic channel.
#[derive(Clone, Debug)]
pub struct GrpcTransport {
    client: GrpcInferenceServiceClient<Channel>,
}

impl GrpcTransport {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: GrpcInferenceServiceClient::new(channel),
        }
    }

    /// Generated client, for calls outside the inference path.
    pub fn client(&self) -> GrpcInferenceServiceClient<Channel> {
        self.client.clone()
    }
}

#[tonic::async_trait]
impl InferTransport for GrpcTransport {
    async fn model_infer(
        &self,
        request: Request<pb::ModelInferRequest>,
    ) -> Result<pb::ModelInferResponse, Status> {
        let mut client = self.client.clone();
        let response = client.model_infer(request).await?;
        Ok(response.into_inner())
    }

    async fn model_stream_infer(
        &self,
        request: Request<RequestStream>,
    ) -> Result<ResponseStream, Status> {
        let mut client = self.client.clone();
        let response = client.model_stream_infer(request).await?;
        Ok(Box::pin(response.into_inner()))
    }
}
