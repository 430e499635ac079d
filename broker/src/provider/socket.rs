//! WebSocket endpoint where providers connect and register themselves.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use http::HeaderMap;
use log::{debug, info};
use wasimoff_types::codec::Encoding;
use wasimoff_types::envelope::event_body;

use crate::api::AppState;
use crate::transport::{check_origin, proxied_addr, Messenger, TransportError, WebSocketTransport};

use super::Provider;

/// `GET /api/provider/ws`: upgrade and register a new provider. The Origin
/// header is checked against the configured allow-list.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if !check_origin(&headers, &state.config.allowed_origins) {
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }
    let addr = proxied_addr(&headers, peer);
    ws.protocols(Encoding::OFFERED)
        .on_upgrade(move |socket| handle(state, socket, addr))
}

async fn handle(state: Arc<AppState>, socket: WebSocket, addr: String) {
    let messenger = Messenger::new(WebSocketTransport::new(socket, addr.clone()));
    let mut requests = messenger.take_requests().expect("fresh messenger");
    let mut events = messenger.take_events().expect("fresh messenger");
    let provider = Provider::new(messenger);
    info!("[{addr}] new provider socket");

    let store = state.store.clone();
    store.add(provider.clone());

    // ask for the initial file listing; the peer may still be starting up,
    // so a failure here is not fatal
    {
        let provider = provider.clone();
        tokio::spawn(async move {
            if let Err(err) = provider.list_files().await {
                debug!("[{}] initial file listing failed: {err}", provider.addr());
            }
        });
    }

    loop {
        tokio::select! {
            _ = provider.closing() => break,

            request = requests.recv() => match request {
                None => break,
                Some(request) => {
                    request.respond(Err("providers do not call the broker".into())).await;
                }
            },

            event = events.recv() => match event {
                None => break,
                Some(event_body::Body::ProviderHello(hello)) => {
                    provider.set_hello(hello.name, hello.useragent);
                    info!("[{addr}] hello: {} ({})", provider.name(), provider.useragent());
                }
                Some(event_body::Body::ProviderResources(resources)) => {
                    if let Some(concurrency) = resources.concurrency {
                        provider.resize(concurrency as usize);
                        store.refresh_gauges();
                        debug!("[{addr}] resources: {concurrency} workers");
                    }
                }
                Some(other) => debug!("[{addr}] unhandled event: {other:?}"),
            },
        }
    }

    store.remove(&provider);
    provider.close(TransportError::Closed("provider socket closed".into()));
    info!("[{addr}] provider socket closed: {:?}", provider.err());
}
