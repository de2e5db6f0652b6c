#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tensorport_client::{
    pb, InferRequest, InferRequestBuilder, InferResult, InferTransport, RequestStream,
    ResponseStream, Result,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Code, Request, Status};

/// In-memory transport that answers every request with an echo of it.
#[derive(Clone, Default)]
pub struct MockTransport {
    /// Unary calls fail with this status instead of answering.
    pub unary_failure: Option<(Code, String)>,
    /// Opening a stream fails with this status.
    pub refuse_stream: Option<(Code, String)>,
    /// The response stream breaks after this many frames.
    pub fail_after: Option<usize>,
    /// The response stream ends cleanly after this many frames.
    pub end_after: Option<usize>,
    /// Request ids answered with an in-band error message.
    pub app_errors: Vec<String>,
    /// Metadata of every call, in arrival order.
    pub seen: Arc<Mutex<Vec<tonic::metadata::MetadataMap>>>,
}

impl MockTransport {
    pub fn header(&self, call: usize, name: &str) -> Option<String> {
        let seen = self.seen.lock().unwrap();
        seen.get(call)?
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

#[tonic::async_trait]
impl InferTransport for MockTransport {
    async fn model_infer(
        &self,
        request: Request<pb::ModelInferRequest>,
    ) -> std::result::Result<pb::ModelInferResponse, Status> {
        self.seen.lock().unwrap().push(request.metadata().clone());
        if let Some((code, message)) = &self.unary_failure {
            return Err(Status::new(*code, message.clone()));
        }
        Ok(echo(request.get_ref()))
    }

    async fn model_stream_infer(
        &self,
        request: Request<RequestStream>,
    ) -> std::result::Result<ResponseStream, Status> {
        self.seen.lock().unwrap().push(request.metadata().clone());
        if let Some((code, message)) = &self.refuse_stream {
            return Err(Status::new(*code, message.clone()));
        }

        let mut requests = request.into_inner();
        let fail_after = self.fail_after;
        let end_after = self.end_after;
        let app_errors = self.app_errors.clone();
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut served = 0;
            while let Some(request) = requests.next().await {
                if fail_after == Some(served) {
                    let _ = tx.send(Err(Status::unavailable("backend went away"))).await;
                    return;
                }
                let frame = if app_errors.contains(&request.id) {
                    pb::ModelStreamInferResponse {
                        error_message: format!("request {} rejected", request.id),
                        infer_response: None,
                    }
                } else {
                    pb::ModelStreamInferResponse {
                        error_message: String::new(),
                        infer_response: Some(echo(&request)),
                    }
                };
                if tx.send(Ok(frame)).await.is_err() {
                    return;
                }
                served += 1;
                if end_after == Some(served) {
                    return;
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

pub fn echo(request: &pb::ModelInferRequest) -> pb::ModelInferResponse {
    pb::ModelInferResponse {
        model_name: request.model_name.clone(),
        model_version: request.model_version.clone(),
        id: request.id.clone(),
        parameters: request.parameters.clone(),
        outputs: Vec::new(),
        raw_output_contents: Vec::new(),
    }
}

pub fn request(id: &str) -> InferRequest {
    InferRequestBuilder::new("echo")
        .request_id(id)
        .build()
        .expect("valid request")
}

pub type Outcomes = Arc<Mutex<Vec<Result<InferResult>>>>;

/// A stream callback that records every outcome it is handed.
pub fn collector() -> (Outcomes, impl FnMut(Result<InferResult>) + Send + 'static) {
    let outcomes: Outcomes = Arc::default();
    let sink = Arc::clone(&outcomes);
    (outcomes, move |outcome| sink.lock().unwrap().push(outcome))
}

/// Ids of the successful outcomes, in delivery order.
pub fn delivered_ids(outcomes: &Outcomes) -> Vec<String> {
    outcomes
        .lock()
        .unwrap()
        .iter()
        .filter_map(|o| o.as_ref().ok())
        .map(|r| r.id().unwrap_or_default().to_string())
        .collect()
}
