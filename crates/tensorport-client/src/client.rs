use std::collections::HashMap;

use tensorport_core::DType;
use tensorport_proto::inference as pb;
use tensorport_proto::GrpcInferenceServiceClient;
use tokio::task::JoinHandle;
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::{
    ClientConfig, Dispatcher, Error, GrpcTransport, InferRequest, InferResult, Result,
    StreamSession, StreamState,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerMetadata {
    pub name: String,
    pub version: String,
    pub extensions: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorMetadata {
    pub name: String,
    pub datatype: String,
    /// `-1` marks a dynamic dimension.
    pub shape: Vec<i64>,
}

impl TensorMetadata {
    pub fn dtype(&self) -> Result<DType> {
        Ok(self.datatype.parse()?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelMetadata {
    pub name: String,
    pub versions: Vec<String>,
    pub platform: String,
    pub inputs: Vec<TensorMetadata>,
    pub outputs: Vec<TensorMetadata>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelIndex {
    pub name: String,
    pub version: String,
    pub state: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedMemoryRegion {
    pub name: String,
    pub key: String,
    pub offset: u64,
    pub byte_size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CudaSharedMemoryRegion {
    pub name: String,
    pub device_id: u64,
    pub byte_size: u64,
}

/// Connection to one inference server.
///
/// Health, metadata, repository and shared-memory calls go straight to the
/// generated client; inference goes through a [`Dispatcher`] or a
/// [`StreamSession`] built from the same channel and headers.
#[derive(Clone)]
pub struct InferenceServerClient {
    url: String,
    grpc: GrpcInferenceServiceClient<Channel>,
    dispatcher: Dispatcher<GrpcTransport>,
    headers: MetadataMap,
    config: ClientConfig,
}

impl InferenceServerClient {
    /// Dials `url` and waits for the connection. A bare `host:port` is
    /// treated as plaintext `http://`.
    pub async fn connect(url: impl Into<String>, config: ClientConfig) -> Result<Self> {
        let url = normalize_url(url.into());
        let channel = endpoint(&url, &config)?
            .connect()
            .await
            .map_err(|source| Error::Connect {
                url: url.clone(),
                source,
            })?;
        debug!(%url, "connected to inference server");
        Self::from_channel(url, channel, config)
    }

    /// Like [`connect`](Self::connect) but dials on first use.
    pub fn connect_lazy(url: impl Into<String>, config: ClientConfig) -> Result<Self> {
        let url = normalize_url(url.into());
        let channel = endpoint(&url, &config)?.connect_lazy();
        Self::from_channel(url, channel, config)
    }

    pub fn from_channel(url: impl Into<String>, channel: Channel, config: ClientConfig) -> Result<Self> {
        let headers = config.headers.to_metadata()?;
        let dispatcher = Dispatcher::new(GrpcTransport::new(channel.clone()))
            .with_headers(&config.headers)?
            .with_timeout(config.request_timeout);
        Ok(Self {
            url: url.into(),
            grpc: GrpcInferenceServiceClient::new(channel),
            dispatcher,
            headers,
            config,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher<GrpcTransport> {
        &self.dispatcher
    }

    pub async fn is_server_live(&self) -> Result<bool> {
        let response = self
            .grpc
            .clone()
            .server_live(self.request(pb::ServerLiveRequest {}))
            .await?;
        Ok(response.into_inner().live)
    }

    pub async fn is_server_ready(&self) -> Result<bool> {
        let response = self
            .grpc
            .clone()
            .server_ready(self.request(pb::ServerReadyRequest {}))
            .await?;
        Ok(response.into_inner().ready)
    }

    /// An empty `version` asks about the server's default version.
    pub async fn is_model_ready(&self, name: &str, version: &str) -> Result<bool> {
        let response = self
            .grpc
            .clone()
            .model_ready(self.request(pb::ModelReadyRequest {
                name: name.into(),
                version: version.into(),
            }))
            .await?;
        Ok(response.into_inner().ready)
    }

    pub async fn server_metadata(&self) -> Result<ServerMetadata> {
        let response = self
            .grpc
            .clone()
            .server_metadata(self.request(pb::ServerMetadataRequest {}))
            .await?
            .into_inner();
        Ok(ServerMetadata {
            name: response.name,
            version: response.version,
            extensions: response.extensions,
        })
    }

    pub async fn model_metadata(&self, name: &str, version: &str) -> Result<ModelMetadata> {
        let response = self
            .grpc
            .clone()
            .model_metadata(self.request(pb::ModelMetadataRequest {
                name: name.into(),
                version: version.into(),
            }))
            .await?
            .into_inner();
        Ok(ModelMetadata {
            name: response.name,
            versions: response.versions,
            platform: response.platform,
            inputs: tensors(response.inputs),
            outputs: tensors(response.outputs),
        })
    }

    /// The model's configuration as the server holds it.
    pub async fn model_config(&self, name: &str, version: &str) -> Result<pb::ModelConfig> {
        let response = self
            .grpc
            .clone()
            .model_config(self.request(pb::ModelConfigRequest {
                name: name.into(),
                version: version.into(),
            }))
            .await?;
        response
            .into_inner()
            .config
            .ok_or_else(|| Error::InvalidResponse(format!("no configuration returned for {name}")))
    }

    /// Models known to the repository. `ready_only` filters to loaded models.
    pub async fn model_repository_index(&self, ready_only: bool) -> Result<Vec<ModelIndex>> {
        let response = self
            .grpc
            .clone()
            .repository_index(self.request(pb::RepositoryIndexRequest {
                repository_name: String::new(),
                ready: ready_only,
            }))
            .await?;
        Ok(response
            .into_inner()
            .models
            .into_iter()
            .map(|m| ModelIndex {
                name: m.name,
                version: m.version,
                state: m.state,
                reason: m.reason,
            })
            .collect())
    }

    pub async fn load_model(&self, name: &str) -> Result<()> {
        self.grpc
            .clone()
            .repository_model_load(self.request(pb::RepositoryModelLoadRequest {
                repository_name: String::new(),
                model_name: name.into(),
            }))
            .await?;
        debug!(model = %name, "model loaded");
        Ok(())
    }

    pub async fn unload_model(&self, name: &str) -> Result<()> {
        self.grpc
            .clone()
            .repository_model_unload(self.request(pb::RepositoryModelUnloadRequest {
                repository_name: String::new(),
                model_name: name.into(),
            }))
            .await?;
        debug!(model = %name, "model unloaded");
        Ok(())
    }

    /// Statistics for one model, or for every model when `name` is empty.
    pub async fn inference_statistics(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Vec<pb::ModelStatistics>> {
        let response = self
            .grpc
            .clone()
            .model_statistics(self.request(pb::ModelStatisticsRequest {
                name: name.into(),
                version: version.into(),
            }))
            .await?;
        Ok(response.into_inner().model_stats)
    }

    /// Registered system shared-memory regions, keyed by name. An empty
    /// `name` lists them all.
    pub async fn system_shared_memory_status(
        &self,
        name: &str,
    ) -> Result<HashMap<String, SharedMemoryRegion>> {
        let response = self
            .grpc
            .clone()
            .system_shared_memory_status(self.request(pb::SystemSharedMemoryStatusRequest {
                name: name.into(),
            }))
            .await?;
        Ok(response
            .into_inner()
            .regions
            .into_iter()
            .map(|(key, r)| {
                (
                    key,
                    SharedMemoryRegion {
                        name: r.name,
                        key: r.key,
                        offset: r.offset,
                        byte_size: r.byte_size,
                    },
                )
            })
            .collect())
    }

    pub async fn register_system_shared_memory(
        &self,
        name: &str,
        key: &str,
        byte_size: u64,
        offset: u64,
    ) -> Result<()> {
        self.grpc
            .clone()
            .system_shared_memory_register(self.request(pb::SystemSharedMemoryRegisterRequest {
                name: name.into(),
                key: key.into(),
                offset,
                byte_size,
            }))
            .await?;
        debug!(region = %name, byte_size, "system shared memory registered");
        Ok(())
    }

    /// An empty `name` unregisters every region.
    pub async fn unregister_system_shared_memory(&self, name: &str) -> Result<()> {
        self.grpc
            .clone()
            .system_shared_memory_unregister(self.request(pb::SystemSharedMemoryUnregisterRequest {
                name: name.into(),
            }))
            .await?;
        Ok(())
    }

    /// Registered CUDA shared-memory regions, keyed by name. An empty `name`
    /// lists them all.
    pub async fn cuda_shared_memory_status(
        &self,
        name: &str,
    ) -> Result<HashMap<String, CudaSharedMemoryRegion>> {
        let response = self
            .grpc
            .clone()
            .cuda_shared_memory_status(self.request(pb::CudaSharedMemoryStatusRequest {
                name: name.into(),
            }))
            .await?;
        Ok(response
            .into_inner()
            .regions
            .into_iter()
            .map(|(key, r)| {
                (
                    key,
                    CudaSharedMemoryRegion {
                        name: r.name,
                        device_id: r.device_id,
                        byte_size: r.byte_size,
                    },
                )
            })
            .collect())
    }

    /// `raw_handle` is the serialized `cudaIpcMemHandle_t` of a region
    /// allocated on `device_id`.
    pub async fn register_cuda_shared_memory(
        &self,
        name: &str,
        raw_handle: &[u8],
        device_id: i64,
        byte_size: u64,
    ) -> Result<()> {
        self.grpc
            .clone()
            .cuda_shared_memory_register(self.request(pb::CudaSharedMemoryRegisterRequest {
                name: name.into(),
                raw_handle: raw_handle.to_vec(),
                device_id,
                byte_size,
            }))
            .await?;
        debug!(region = %name, device_id, byte_size, "cuda shared memory registered");
        Ok(())
    }

    /// An empty `name` unregisters every region.
    pub async fn unregister_cuda_shared_memory(&self, name: &str) -> Result<()> {
        self.grpc
            .clone()
            .cuda_shared_memory_unregister(self.request(pb::CudaSharedMemoryUnregisterRequest {
                name: name.into(),
            }))
            .await?;
        Ok(())
    }

    pub async fn infer(&self, request: InferRequest) -> Result<InferResult> {
        self.dispatcher.infer(request).await
    }

    pub fn infer_blocking(&self, request: InferRequest) -> Result<InferResult> {
        self.dispatcher.infer_blocking(request)
    }

    pub fn async_infer<F>(&self, request: InferRequest, callback: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce(Result<InferResult>) + Send + 'static,
    {
        self.dispatcher.async_infer(request, callback)
    }

    /// A new, not yet opened stream session carrying this client's headers.
    pub fn start_stream<F>(&self, callback: F) -> Result<StreamSession>
    where
        F: FnMut(Result<InferResult>) + Send + 'static,
    {
        let mut session = StreamSession::new(callback);
        session.set_headers(&self.config.headers)?;
        Ok(session)
    }

    /// Enqueues `request` on `session`, opening the stream first if needed.
    pub async fn stream_infer(&self, session: &mut StreamSession, request: InferRequest) -> Result<()> {
        if session.state() == StreamState::Uninitialized {
            session.initialize(self.dispatcher.transport().as_ref()).await?;
        }
        session.enqueue(request)
    }

    fn request<M>(&self, message: M) -> tonic::Request<M> {
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = self.headers.clone();
        if let Some(timeout) = self.config.request_timeout {
            request.set_timeout(timeout);
        }
        request
    }
}

fn tensors(list: Vec<pb::model_metadata_response::TensorMetadata>) -> Vec<TensorMetadata> {
    list.into_iter()
        .map(|t| TensorMetadata {
            name: t.name,
            datatype: t.datatype,
            shape: t.shape,
        })
        .collect()
}

fn endpoint(url: &str, config: &ClientConfig) -> Result<Endpoint> {
    let mut endpoint = Endpoint::from_shared(url.to_string()).map_err(|source| Error::Connect {
        url: url.to_string(),
        source,
    })?;
    if let Some(timeout) = config.connect_timeout {
        endpoint = endpoint.connect_timeout(timeout);
    }
    Ok(endpoint)
}

fn normalize_url(url: String) -> String {
    if url.contains("://") {
        url
    } else {
        format!("http://{url}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_http_scheme() {
        assert_eq!(normalize_url("localhost:8001".into()), "http://localhost:8001");
        assert_eq!(normalize_url("https://infer.local".into()), "https://infer.local");
    }

    #[tokio::test]
    async fn lazy_client_carries_config() {
        let config = ClientConfig::default()
            .with_headers(crate::Headers::new().with("x-tenant", "a"))
            .with_request_timeout(std::time::Duration::from_secs(2));
        let client = InferenceServerClient::connect_lazy("127.0.0.1:1", config).unwrap();
        assert_eq!(client.url(), "http://127.0.0.1:1");

        let request = client.request(pb::ServerLiveRequest {});
        assert_eq!(
            request.metadata().get("x-tenant").and_then(|v| v.to_str().ok()),
            Some("a")
        );

        let session = client.start_stream(|_| {}).unwrap();
        assert_eq!(session.state(), StreamState::Uninitialized);
    }

    #[tokio::test]
    async fn bad_header_is_rejected_up_front() {
        let config = ClientConfig::default().with_headers(crate::Headers::new().with("bad header", "v"));
        let err = InferenceServerClient::connect_lazy("127.0.0.1:1", config).err();
        assert!(matches!(err, Some(Error::InvalidParameter(_))));
    }
}
