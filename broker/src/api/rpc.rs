//! Typed RPC surface shared by the WebSocket handler and the HTTP
//! endpoints: upload files, run single tasks, fan out jobs.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::HeaderMap;
use log::warn;
use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wasimoff_types::task::trace_event::Kind;
use wasimoff_types::task::{wasip1, Metadata, Trace};
use wasimoff_types::{filesystem, trace, TaskRequest, TaskResponse};

use crate::provider::store::ProviderStore;
use crate::provider::task::{AsyncTask, TaskError};
use crate::scheduler::TaskQueue;
use crate::storage::StorageError;
use crate::transport::proxied_addr;

use super::job;
use super::AppState;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidArgument(_) | ApiError::Storage(_) => StatusCode::BAD_REQUEST,
            ApiError::Task(TaskError::QueueFull) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Task(TaskError::Cancelled) => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Handles client calls independent of their transport. Each call blocks
/// until the dispatched task completes, so everything shared is
/// thread-safe.
pub struct RpcServer {
    store: Arc<ProviderStore>,
    queue: TaskQueue,
    task_seq: AtomicU64,
    job_seq: AtomicU64,
}

impl RpcServer {
    pub fn new(store: Arc<ProviderStore>, queue: TaskQueue) -> Self {
        Self { store, queue, task_seq: AtomicU64::new(0), job_seq: AtomicU64::new(0) }
    }

    pub(crate) fn store(&self) -> &Arc<ProviderStore> {
        &self.store
    }

    pub(crate) fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub(crate) fn next_job_id(&self) -> String {
        format!("{:05}", self.job_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Fresh task metadata: broker-assigned id and requester address, with
    /// the client's reference and trace carried over.
    fn prepare_info(&self, incoming: Option<Metadata>, requester: &str) -> Metadata {
        let mut incoming = incoming.unwrap_or_default();
        trace::record(&mut incoming, Kind::BrokerReceivedClientRequest);
        Metadata {
            id: Some((self.task_seq.fetch_add(1, Ordering::Relaxed) + 1).to_string()),
            requester: Some(requester.to_string()),
            provider: None,
            reference: incoming.reference,
            trace: incoming.trace,
        }
    }

    /// Merge the request-side metadata (id, reference, requester, broker
    /// trace) into the response the provider sent back.
    fn finalize_info(request_info: Option<&Metadata>, response_info: &mut Option<Metadata>) {
        let mut info = response_info.take().unwrap_or_default();
        if let Some(request) = request_info {
            info.id = request.id.clone();
            info.reference = request.reference.clone();
            info.requester = request.requester.clone();
            if let Some(request_trace) = &request.trace {
                // broker-side events first, then whatever the peer added
                let peer_events = info.trace.take().map(|t| t.events).unwrap_or_default();
                let mut events = request_trace.events.clone();
                events.extend(peer_events);
                info.trace = Some(Trace { events });
            }
        }
        trace::record(&mut info, Kind::BrokerReceivedProviderResult);
        *response_info = Some(info);
    }

    /// Queue a prepared task and wait for its single completion signal.
    async fn dispatch(
        &self,
        ctx: CancellationToken,
        request: TaskRequest,
    ) -> Result<Box<AsyncTask>, ApiError> {
        let (done_tx, mut done_rx) = mpsc::channel(1);
        let mut task = AsyncTask::new(ctx, request, done_tx);
        task.request.trace_event(Kind::BrokerQueueTask);
        self.queue.submit(task);
        done_rx
            .recv()
            .await
            .ok_or_else(|| ApiError::Internal("done channel closed".into()))
    }

    pub async fn run_wasip1(
        &self,
        ctx: CancellationToken,
        mut request: wasip1::Request,
        requester: &str,
    ) -> Result<wasip1::Response, ApiError> {
        self.store.storage.resolve_wasip1(&mut request)?;
        request.info = Some(self.prepare_info(request.info.take(), requester));

        let task = self.dispatch(ctx, TaskRequest::Wasip1(request)).await?;
        if let Some(err) = task.error {
            return Err(err.into());
        }
        // take the metadata after completion, so the trace includes the
        // events the worker recorded while transmitting
        let request_info = task.request.info().cloned();
        let TaskResponse::Wasip1(mut response) = task.response else {
            return Err(ApiError::Internal("unexpected response kind".into()));
        };
        Self::finalize_info(request_info.as_ref(), &mut response.info);
        if let Some(info) = response.info.as_mut() {
            trace::record(info, Kind::BrokerTransmitClientResponse);
        }
        Ok(response)
    }

    pub async fn run_pyodide(
        &self,
        ctx: CancellationToken,
        mut request: wasimoff_types::task::pyodide::Request,
        requester: &str,
    ) -> Result<wasimoff_types::task::pyodide::Response, ApiError> {
        request.info = Some(self.prepare_info(request.info.take(), requester));

        let task = self.dispatch(ctx, TaskRequest::Pyodide(request)).await?;
        if let Some(err) = task.error {
            return Err(err.into());
        }
        let request_info = task.request.info().cloned();
        let TaskResponse::Pyodide(mut response) = task.response else {
            return Err(ApiError::Internal("unexpected response kind".into()));
        };
        Self::finalize_info(request_info.as_ref(), &mut response.info);
        if let Some(info) = response.info.as_mut() {
            trace::record(info, Kind::BrokerTransmitClientResponse);
        }
        Ok(response)
    }

    pub async fn run_wasip1_job(
        &self,
        ctx: CancellationToken,
        request: wasip1::JobRequest,
        requester: &str,
    ) -> Result<wasip1::JobResponse, ApiError> {
        job::dispatch_job(self, ctx, request, requester).await
    }

    pub async fn upload(
        &self,
        request: filesystem::upload::Request,
    ) -> Result<filesystem::upload::Response, ApiError> {
        let file = request
            .upload
            .ok_or_else(|| ApiError::InvalidArgument("file cannot be empty".into()))?;
        // the ref slot doubles as the friendly lookup name on upload
        let name = file.r#ref.unwrap_or_default();
        let media = file.media.unwrap_or_default();
        let blob = file.blob.unwrap_or_default();
        let inserted = self.store.storage.insert(&name, &media, blob)?;
        // make the new blob placeable right away
        self.store.distribute(inserted.clone());
        Ok(filesystem::upload::Response { r#ref: Some(inserted.r#ref().to_string()) })
    }
}

// -------------------- connect-style HTTP endpoint --------------------

fn wants_protobuf(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|c| c.to_str().ok())
        .map(|c| c.contains("proto"))
        .unwrap_or(false)
}

fn decode_body<T: Message + DeserializeOwned + Default>(
    protobuf: bool,
    body: &Bytes,
) -> Result<T, ApiError> {
    if protobuf {
        T::decode(&body[..]).map_err(|e| ApiError::InvalidArgument(format!("protobuf: {e}")))
    } else {
        serde_json::from_slice(body).map_err(|e| ApiError::InvalidArgument(format!("json: {e}")))
    }
}

fn encode_body<T: Message + Serialize>(protobuf: bool, message: &T) -> Response {
    if protobuf {
        (
            [(http::header::CONTENT_TYPE, "application/proto")],
            message.encode_to_vec(),
        )
            .into_response()
    } else {
        match serde_json::to_vec(message) {
            Ok(body) => (
                [(http::header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(e) => ApiError::Internal(e.to_string()).into_response(),
        }
    }
}

/// `POST /api/client/wasimoff.v1.Tasks/{method}`: binary Protobuf or JSON
/// unary RPCs, selected by content type.
pub async fn connect_handler(
    State(state): State<Arc<AppState>>,
    Path(method): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let protobuf = wants_protobuf(&headers);
    let requester = proxied_addr(&headers, peer);

    // cancel the dispatched task when the client goes away mid-request
    let ctx = CancellationToken::new();
    let _guard = ctx.clone().drop_guard();

    let result = match method.as_str() {
        "RunWasip1" => match decode_body::<wasip1::Request>(protobuf, &body) {
            Ok(request) => state
                .rpc
                .run_wasip1(ctx, request, &requester)
                .await
                .map(|response| encode_body(protobuf, &response)),
            Err(e) => Err(e),
        },
        "RunWasip1Job" => match decode_body::<wasip1::JobRequest>(protobuf, &body) {
            Ok(request) => state
                .rpc
                .run_wasip1_job(ctx, request, &requester)
                .await
                .map(|response| encode_body(protobuf, &response)),
            Err(e) => Err(e),
        },
        "RunPyodide" => {
            match decode_body::<wasimoff_types::task::pyodide::Request>(protobuf, &body) {
                Ok(request) => state
                    .rpc
                    .run_pyodide(ctx, request, &requester)
                    .await
                    .map(|response| encode_body(protobuf, &response)),
                Err(e) => Err(e),
            }
        }
        "Upload" => match decode_body::<filesystem::upload::Request>(protobuf, &body) {
            Ok(request) => state
                .rpc
                .upload(request)
                .await
                .map(|response| encode_body(protobuf, &response)),
            Err(e) => Err(e),
        },
        other => Err(ApiError::InvalidArgument(format!("unknown method: {other:?}"))),
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            warn!("[{requester}] {method} failed: {err}");
            err.into_response()
        }
    }
}
