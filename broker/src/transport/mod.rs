//! Message transport: full-duplex framed request/response/event
//! multiplexing over a single ordered byte stream.
//!
//! A [`Messenger`] wraps anything implementing [`Transport`] and runs one
//! background task that owns the stream: it serializes all writes (single
//! writer), demuxes inbound frames by sequence number into the pending-call
//! map or the request/event channels, and fails every pending call with the
//! closure cause when the connection dies.

mod lifetime;
mod messenger;
mod websocket;

pub use self::lifetime::Lifetime;
pub use self::messenger::{IncomingRequest, Messenger, PendingCall, Responder};
pub use self::websocket::{check_origin, proxied_addr, WebSocketTransport};

use async_trait::async_trait;
use thiserror::Error;
use wasimoff_types::codec::Encoding;
use wasimoff_types::Envelope;

/// Errors of the transport layer. Cloneable so a single closure cause can
/// be fanned out to every pending call.
#[derive(Clone, Debug, Error)]
pub enum TransportError {
    /// The connection is gone; carries the reason of the first close.
    #[error("connection closed: {0}")]
    Closed(String),
    /// The caller's context was cancelled while waiting.
    #[error("request cancelled")]
    Cancelled,
    /// Stream-level I/O or protocol failure.
    #[error("websocket: {0}")]
    WebSocket(String),
    /// A frame could not be encoded or decoded.
    #[error("codec: {0}")]
    Codec(String),
    /// The peer answered the RPC with an error.
    #[error("peer: {0}")]
    Peer(String),
}

impl TransportError {
    /// Cancellation must never be retried, everything else may be.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

/// An ordered bidirectional stream of envelopes. Implemented for server
/// side WebSockets; tests use an in-memory channel pair.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Remote address for logging and provider identity.
    fn addr(&self) -> String;

    /// The negotiated frame encoding.
    fn encoding(&self) -> Encoding;

    async fn send(&mut self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Next inbound envelope; `None` once the peer closed the stream.
    async fn recv(&mut self) -> Option<Result<Envelope, TransportError>>;

    /// Best-effort close of the underlying stream.
    async fn close(&mut self);
}
