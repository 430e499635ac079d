use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use http::HeaderMap;
use wasimoff_types::codec::Encoding;
use wasimoff_types::Envelope;

use super::{Transport, TransportError};

/// Server-side WebSocket transport, created after a route handler upgraded
/// the connection and the subprotocol negotiation picked an encoding.
pub struct WebSocketTransport {
    socket: WebSocket,
    encoding: Encoding,
    addr: String,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket, addr: String) -> Self {
        // negotiated subprotocol, falling back to protobuf frames for
        // peers that did not request one
        let encoding = socket
            .protocol()
            .and_then(|p| p.to_str().ok())
            .and_then(Encoding::from_subprotocol)
            .unwrap_or(Encoding::Protobuf);
        Self { socket, encoding, addr }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn addr(&self) -> String {
        self.addr.clone()
    }

    fn encoding(&self) -> Encoding {
        self.encoding
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let wire = self
            .encoding
            .encode(envelope)
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        let message = match self.encoding {
            Encoding::Protobuf => Message::Binary(wire.into()),
            Encoding::Json => {
                let text = String::from_utf8(wire)
                    .map_err(|e| TransportError::Codec(e.to_string()))?;
                Message::Text(text.into())
            }
        };
        self.socket
            .send(message)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Envelope, TransportError>> {
        loop {
            let message = match self.socket.recv().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(TransportError::WebSocket(e.to_string()))),
            };
            let frame = match &message {
                Message::Binary(b) => &b[..],
                Message::Text(t) => t.as_bytes(),
                Message::Close(_) => return None,
                // ping/pong keepalives are answered by the protocol layer
                _ => continue,
            };
            return Some(
                self.encoding
                    .decode(frame)
                    .map_err(|e| TransportError::Codec(e.to_string())),
            );
        }
    }

    async fn close(&mut self) {
        let _ = self.socket.send(Message::Close(None)).await;
    }
}

/// Check a WebSocket upgrade's Origin header against an allow-list. A
/// wildcard entry permits anything; requests without an Origin header (CLI
/// tools, tests) always pass.
pub fn check_origin(headers: &HeaderMap, allowed: &[String]) -> bool {
    let Some(origin) = headers.get(http::header::ORIGIN).and_then(|o| o.to_str().ok()) else {
        return true;
    };
    allowed
        .iter()
        .any(|a| a == "*" || a.eq_ignore_ascii_case(origin))
}

/// The peer address for logging and provider identity, honoring an
/// X-Forwarded-For header from a reverse proxy.
pub fn proxied_addr(headers: &HeaderMap, fallback: std::net::SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| fallback.to_string())
}
