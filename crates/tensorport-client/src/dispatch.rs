use std::sync::Arc;
use std::time::Duration;

use tensorport_proto::inference as pb;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tonic::metadata::MetadataMap;
use tracing::debug;

use crate::request::validate;
use crate::{Error, Headers, InferRequest, InferResult, InferTransport, Result};

/// Issues single inference calls over an [`InferTransport`].
///
/// [`infer`](Self::infer), [`infer_blocking`](Self::infer_blocking) and
/// [`async_infer`](Self::async_infer) share validation and error
/// translation, so every caller sees the same failures.
pub struct Dispatcher<T: ?Sized> {
    transport: Arc<T>,
    headers: MetadataMap,
    timeout: Option<Duration>,
}

impl<T: ?Sized> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            headers: self.headers.clone(),
            timeout: self.timeout,
        }
    }
}

impl<T: InferTransport> Dispatcher<T> {
    pub fn new(transport: T) -> Self {
        Self::from_shared(Arc::new(transport))
    }
}

impl<T: InferTransport + ?Sized> Dispatcher<T> {
    pub fn from_shared(transport: Arc<T>) -> Self {
        Self {
            transport,
            headers: MetadataMap::new(),
            timeout: None,
        }
    }

    pub fn with_headers(mut self, headers: &Headers) -> Result<Self> {
        self.headers = headers.to_metadata()?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Sends `request` and waits for its response.
    pub async fn infer(&self, request: InferRequest) -> Result<InferResult> {
        let call = self.prepare(request)?;
        send(self.transport.as_ref(), call).await
    }

    /// Like [`infer`](Self::infer) but parks the calling thread.
    ///
    /// Must run inside a multi-threaded tokio runtime.
    pub fn infer_blocking(&self, request: InferRequest) -> Result<InferResult> {
        let handle = blocking_handle()?;
        let call = self.prepare(request)?;
        tokio::task::block_in_place(|| handle.block_on(send(self.transport.as_ref(), call)))
    }

    /// Sends `request` in the background and runs `callback` exactly once
    /// with the outcome. Invalid requests fail here, before anything is sent.
    pub fn async_infer<F>(&self, request: InferRequest, callback: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(Result<InferResult>) + Send + 'static,
    {
        let handle = Handle::try_current()
            .map_err(|_| Error::Runtime("async_infer needs a tokio runtime".into()))?;
        let call = self.prepare(request)?;
        let transport = Arc::clone(&self.transport);
        Ok(handle.spawn(async move {
            callback(send(transport.as_ref(), call).await);
        }))
    }

    fn prepare(&self, request: InferRequest) -> Result<tonic::Request<pb::ModelInferRequest>> {
        let request = request.into_proto();
        validate(&request)?;
        debug!(model = %request.model_name, inputs = request.inputs.len(), "dispatching inference");

        let mut call = tonic::Request::new(request);
        *call.metadata_mut() = self.headers.clone();
        if let Some(timeout) = self.timeout {
            call.set_timeout(timeout);
        }
        Ok(call)
    }
}

async fn send<T>(transport: &T, call: tonic::Request<pb::ModelInferRequest>) -> Result<InferResult>
where
    T: InferTransport + ?Sized,
{
    transport
        .model_infer(call)
        .await
        .map(InferResult::new)
        .map_err(Error::from)
}

pub(crate) fn blocking_handle() -> Result<Handle> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => Ok(handle),
        Ok(_) => Err(Error::Runtime(
            "blocking calls need a multi-threaded tokio runtime".into(),
        )),
        Err(_) => Err(Error::Runtime("blocking calls need a tokio runtime".into())),
    }
}
