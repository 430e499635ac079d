//! WebSocket endpoint for clients, dispatching task and upload requests
//! over the same messenger framing the providers use.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use http::HeaderMap;
use log::{debug, info};
use tokio_util::sync::CancellationToken;
use wasimoff_types::codec::Encoding;
use wasimoff_types::envelope::{request, response};
use wasimoff_types::Ping;

use crate::transport::{proxied_addr, Messenger, Responder, TransportError, WebSocketTransport};

use super::AppState;

/// `GET /api/client/ws`: upgrade a client connection. Clients can be
/// anywhere, so any Origin is allowed here.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let addr = proxied_addr(&headers, peer);
    ws.protocols(Encoding::OFFERED)
        .on_upgrade(move |socket| handle(state, socket, addr))
}

async fn handle(state: Arc<AppState>, socket: WebSocket, addr: String) {
    let messenger = Messenger::new(WebSocketTransport::new(socket, addr.clone()));
    let mut requests = messenger.take_requests().expect("fresh messenger");
    let mut events = messenger.take_events().expect("fresh messenger");

    // cancelling this token aborts every task of this connection
    let connection = CancellationToken::new();
    info!("[{addr}] new client socket");

    loop {
        tokio::select! {
            _ = messenger.lifetime().closing() => break,

            event = events.recv() => match event {
                None => break,
                Some(event) => debug!("[{addr}] client event: {event:?}"),
            },

            incoming = requests.recv() => match incoming {
                None => break,
                Some(incoming) => {
                    let (body, responder) = incoming.split();
                    tokio::spawn(dispatch(
                        state.clone(),
                        connection.child_token(),
                        addr.clone(),
                        body,
                        responder,
                    ));
                }
            },
        }
    }

    connection.cancel();
    messenger.close(TransportError::Closed("client socket closed".into()));
    info!("[{addr}] client socket closed");
}

async fn dispatch(
    state: Arc<AppState>,
    ctx: CancellationToken,
    addr: String,
    body: request::Body,
    responder: Responder,
) {
    let result: Result<response::Body, String> = match body {
        request::Body::RunWasip1(request) => state
            .rpc
            .run_wasip1(ctx, request, &addr)
            .await
            .map(response::Body::RunWasip1)
            .map_err(|e| e.to_string()),
        request::Body::RunPyodide(request) => state
            .rpc
            .run_pyodide(ctx, request, &addr)
            .await
            .map(response::Body::RunPyodide)
            .map_err(|e| e.to_string()),
        request::Body::UploadFile(request) => state
            .rpc
            .upload(request)
            .await
            .map(response::Body::UploadFile)
            .map_err(|e| e.to_string()),
        request::Body::Ping(_) => Ok(response::Body::Pong(Ping {})),
        _ => Err("expecting only task or upload requests on this socket".into()),
    };
    responder.respond(result).await;
}
