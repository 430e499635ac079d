//! Client library for the wasimoff broker.
//!
//! Connect over WebSocket and issue typed calls:
//!
//! ```no_run
//! use wasimoff_client::Client;
//! use wasimoff_types::codec::Encoding;
//! use wasimoff_types::task::wasip1;
//! use wasimoff_types::File;
//!
//! # async fn example() -> Result<(), wasimoff_client::ClientError> {
//! let client = Client::connect("ws://localhost:4080/api/client/ws", Encoding::Protobuf).await?;
//! let binary = client.upload("hello.wasm", "application/wasm", b"\0asm...".to_vec()).await?;
//! let response = client
//!     .run_wasip1(wasip1::Request {
//!         params: Some(wasip1::Params {
//!             binary: Some(File::by_ref(binary)),
//!             args: vec!["hello.wasm".into()],
//!             ..Default::default()
//!         }),
//!         ..Default::default()
//!     })
//!     .await?;
//! # let _ = response; Ok(())
//! # }
//! ```

mod http;
mod messenger;

pub use self::http::upload_via_http;
pub use self::messenger::{IncomingRequest, Responder, WsMessenger};

use std::sync::Arc;

use thiserror::Error;
use wasimoff_types::codec::{CodecError, Encoding};
use wasimoff_types::envelope::{request, response};
use wasimoff_types::filesystem;
use wasimoff_types::task::{pyodide, wasip1};
use wasimoff_types::File;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    WebSocket(#[from] async_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// The broker answered the RPC with an error.
    #[error("broker: {0}")]
    Broker(String),
    #[error("response body is empty")]
    EmptyResponse,
    #[error("unexpected response type")]
    UnexpectedResponse,
    #[error("connection is closed")]
    Closed,
    #[error("connection terminated: {0}")]
    Terminated(String),
}

/// A typed client on top of the WebSocket messenger.
pub struct Client {
    messenger: Arc<WsMessenger>,
}

impl Client {
    /// Connect to the broker's client socket, e.g.
    /// `ws://localhost:4080/api/client/ws`.
    pub async fn connect(url: &str, encoding: Encoding) -> Result<Self, ClientError> {
        let messenger = WsMessenger::connect(url, encoding).await?;
        Ok(Self { messenger })
    }

    /// Access the underlying messenger, e.g. to observe broker events.
    pub fn messenger(&self) -> &Arc<WsMessenger> {
        &self.messenger
    }

    /// Upload a file to the broker storage and return its content address.
    pub async fn upload(
        &self,
        name: &str,
        media: &str,
        blob: Vec<u8>,
    ) -> Result<String, ClientError> {
        let body = request::Body::UploadFile(filesystem::upload::Request {
            upload: Some(File {
                r#ref: Some(name.to_string()),
                media: Some(media.to_string()),
                blob: Some(blob),
            }),
        });
        match self.messenger.request_sync(body).await? {
            response::Body::UploadFile(uploaded) => {
                uploaded.r#ref.ok_or(ClientError::EmptyResponse)
            }
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Run a single WASI preview-1 task and wait for its result.
    pub async fn run_wasip1(
        &self,
        request: wasip1::Request,
    ) -> Result<wasip1::Response, ClientError> {
        match self
            .messenger
            .request_sync(request::Body::RunWasip1(request))
            .await?
        {
            response::Body::RunWasip1(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Run a Pyodide script task and wait for its result.
    pub async fn run_pyodide(
        &self,
        request: pyodide::Request,
    ) -> Result<pyodide::Response, ClientError> {
        match self
            .messenger
            .request_sync(request::Body::RunPyodide(request))
            .await?
        {
            response::Body::RunPyodide(response) => Ok(response),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Close the connection; in-flight calls fail.
    pub fn close(&self) {
        self.messenger.close();
    }
}
