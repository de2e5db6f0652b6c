//! Duplex inference streams.
//!
//! A [`StreamSession`] owns one `ModelStreamInfer` call. Callers push
//! requests into a FIFO queue with [`StreamSession::enqueue`] (or a cloned
//! [`RequestSender`]); the transport pulls them through a [`RequestStream`].
//! A single worker task drains the response stream and hands every frame to
//! the session callback, so the callback sees responses in enqueue order and
//! never runs concurrently with itself.
//!
//! ```text
//! enqueue() ─▶ [queue] ─▶ RequestStream ─▶ transport ─▶ ResponseStream ─▶ worker ─▶ callback
//!                 ▲
//!   close() ──────┘ (sentinel, then join worker)
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tensorport_proto::inference as pb;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::metadata::MetadataMap;
use tracing::{debug, error, warn};

use crate::dispatch::blocking_handle;
use crate::request::validate;
use crate::{Error, Headers, InferRequest, InferResult, InferTransport, ResponseStream, Result};

/// Receives one outcome per stream frame: a result, or the error for it.
pub type StreamCallback = Box<dyn FnMut(Result<InferResult>) + Send + 'static>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Uninitialized,
    Active,
    Closed,
}

enum Pending {
    Request(Box<pb::ModelInferRequest>),
    Close,
}

struct Queue {
    tx: Option<mpsc::UnboundedSender<Pending>>,
    enqueued: usize,
}

/// Cloneable enqueue handle for a [`StreamSession`].
#[derive(Clone)]
pub struct RequestSender {
    queue: Arc<Mutex<Queue>>,
}

impl RequestSender {
    /// Appends `request` to the stream queue without waiting.
    pub fn enqueue(&self, request: InferRequest) -> Result<()> {
        let request = request.into_proto();
        validate(&request)?;

        let mut queue = lock(&self.queue);
        let tx = queue.tx.as_ref().ok_or(Error::StreamClosed)?;
        let model = request.model_name.clone();
        tx.send(Pending::Request(Box::new(request)))
            .map_err(|_| Error::StreamClosed)?;
        queue.enqueued += 1;
        debug!(model = %model, position = queue.enqueued, "request enqueued on stream");
        Ok(())
    }

    fn enqueued(&self) -> usize {
        lock(&self.queue).enqueued
    }

    /// Pushes the closing sentinel; later enqueues fail.
    fn finish(&self) {
        if let Some(tx) = lock(&self.queue).tx.take() {
            let _ = tx.send(Pending::Close);
        }
    }

    /// Shuts the queue and reports how many enqueued requests got no response.
    fn abandon(&self, delivered: usize) -> usize {
        let mut queue = lock(&self.queue);
        queue.tx = None;
        queue.enqueued.saturating_sub(delivered)
    }
}

fn lock(queue: &Mutex<Queue>) -> MutexGuard<'_, Queue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The request half handed to the transport. Ends at the closing sentinel.
pub struct RequestStream {
    rx: mpsc::UnboundedReceiver<Pending>,
    done: bool,
}

impl Stream for RequestStream {
    type Item = pb::ModelInferRequest;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Pending::Request(request))) => Poll::Ready(Some(*request)),
            Poll::Ready(Some(Pending::Close)) | Poll::Ready(None) => {
                self.done = true;
                self.rx.close();
                Poll::Ready(None)
            }
        }
    }
}

pub struct StreamSession {
    state: StreamState,
    sender: RequestSender,
    requests: Option<RequestStream>,
    callback: Option<StreamCallback>,
    headers: MetadataMap,
    worker: Option<JoinHandle<()>>,
    delivered: Arc<AtomicUsize>,
}

impl StreamSession {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(Result<InferResult>) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: StreamState::Uninitialized,
            sender: RequestSender {
                queue: Arc::new(Mutex::new(Queue {
                    tx: Some(tx),
                    enqueued: 0,
                })),
            },
            requests: Some(RequestStream { rx, done: false }),
            callback: Some(Box::new(callback)),
            headers: MetadataMap::new(),
            worker: None,
            delivered: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Metadata sent when the stream opens. Only valid before initialization.
    pub fn set_headers(&mut self, headers: &Headers) -> Result<()> {
        if self.state != StreamState::Uninitialized {
            return Err(Error::AlreadyInitialized);
        }
        self.headers = headers.to_metadata()?;
        Ok(())
    }

    pub fn sender(&self) -> RequestSender {
        self.sender.clone()
    }

    /// Queues `request`. Legal before [`initialize`](Self::initialize); such
    /// requests go out as soon as the stream opens.
    pub fn enqueue(&self, request: InferRequest) -> Result<()> {
        self.sender.enqueue(request)
    }

    /// Opens the duplex call and starts the response worker.
    ///
    /// If the transport refuses the call the session is closed and its
    /// queued requests are dropped.
    pub async fn initialize<T>(&mut self, transport: &T) -> Result<()>
    where
        T: InferTransport + ?Sized,
    {
        if self.state != StreamState::Uninitialized {
            return Err(Error::AlreadyInitialized);
        }
        let (Some(requests), Some(callback)) = (self.requests.take(), self.callback.take()) else {
            return Err(Error::AlreadyInitialized);
        };

        let mut request = tonic::Request::new(requests);
        *request.metadata_mut() = self.headers.clone();

        let responses = match transport.model_stream_infer(request).await {
            Ok(responses) => responses,
            Err(status) => {
                self.state = StreamState::Closed;
                let dropped = self.sender.abandon(0);
                warn!(dropped, code = ?status.code(), "failed to open inference stream");
                return Err(status.into());
            }
        };

        self.worker = Some(tokio::spawn(drain_responses(
            responses,
            callback,
            self.sender.clone(),
            Arc::clone(&self.delivered),
        )));
        self.state = StreamState::Active;
        debug!("inference stream opened");
        Ok(())
    }

    /// Requests enqueued whose response has not reached the callback yet.
    pub fn pending(&self) -> Result<usize> {
        if self.state == StreamState::Uninitialized {
            return Err(Error::NotInitialized);
        }
        let delivered = self.delivered.load(Ordering::Acquire);
        Ok(self.sender.enqueued().saturating_sub(delivered))
    }

    /// Ends the request stream and waits for the worker to drain every
    /// outstanding response. A no-op unless the session is active.
    pub async fn close(&mut self) {
        if self.state != StreamState::Active {
            return;
        }
        self.sender.finish();
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!(error = %e, "inference stream worker failed");
            }
        }
        self.state = StreamState::Closed;
        debug!("inference stream closed");
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.state != StreamState::Active {
            return;
        }
        self.state = StreamState::Closed;
        self.sender.finish();
        let Some(worker) = self.worker.take() else {
            return;
        };

        match blocking_handle() {
            Ok(handle) => {
                if let Err(e) = tokio::task::block_in_place(|| handle.block_on(worker)) {
                    error!(error = %e, "inference stream worker failed");
                }
            }
            Err(_) => warn!("inference stream dropped outside a multi-threaded runtime, worker left to drain in background"),
        }
    }
}

async fn drain_responses(
    mut responses: ResponseStream,
    mut callback: StreamCallback,
    sender: RequestSender,
    delivered: Arc<AtomicUsize>,
) {
    while let Some(frame) = responses.next().await {
        match frame {
            Ok(frame) => {
                callback(frame_outcome(frame));
                delivered.fetch_add(1, Ordering::AcqRel);
            }
            Err(status) => {
                let undelivered = sender.abandon(delivered.load(Ordering::Acquire));
                warn!(undelivered, code = ?status.code(), "inference stream broke");
                callback(Err(Error::StreamAborted {
                    undelivered,
                    source: status.into(),
                }));
                return;
            }
        }
    }

    let unanswered = sender.abandon(delivered.load(Ordering::Acquire));
    if unanswered > 0 {
        warn!(unanswered, "inference stream ended before every request was answered");
        let status = tonic::Status::unavailable(format!(
            "server ended the stream with {unanswered} request(s) unanswered"
        ));
        callback(Err(Error::StreamAborted {
            undelivered: unanswered,
            source: status.into(),
        }));
    }
}

fn frame_outcome(frame: pb::ModelStreamInferResponse) -> Result<InferResult> {
    if !frame.error_message.is_empty() {
        return Err(Error::Application(frame.error_message));
    }
    frame
        .infer_response
        .map(InferResult::new)
        .ok_or_else(|| Error::InvalidResponse("stream frame has neither a response nor an error".into()))
}
