//! WebSocket messenger: the client-side counterpart of the broker's frame
//! multiplexing. One background task owns the socket, serializes writes
//! and routes inbound frames to pending calls or the request/event
//! channels — so this works symmetrically for client tooling and for
//! provider runtimes implemented in Rust.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_tungstenite::tokio::connect_async;
use async_tungstenite::tungstenite::client::IntoClientRequest;
use async_tungstenite::tungstenite::protocol::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use wasimoff_types::codec::Encoding;
use wasimoff_types::envelope::{envelope::Payload, event_body, request, response};
use wasimoff_types::{Envelope, Request, Response};

use crate::ClientError;

const CHANNEL_BOUND: usize = 64;

enum Outgoing {
    Request {
        sequence: u64,
        body: request::Body,
        send_back: oneshot::Sender<Result<Response, ClientError>>,
    },
    Response {
        sequence: u64,
        response: Response,
    },
    Event(event_body::Body),
}

/// A request received from the broker, e.g. a task RPC when acting as a
/// provider runtime.
pub struct IncomingRequest {
    pub body: request::Body,
    sequence: u64,
    to_back: mpsc::Sender<Outgoing>,
}

impl IncomingRequest {
    pub async fn respond(self, result: Result<response::Body, String>) {
        let (_, responder) = self.split();
        responder.respond(result).await;
    }

    /// Separate the request body from the response handle.
    pub fn split(self) -> (request::Body, Responder) {
        (
            self.body,
            Responder { sequence: self.sequence, to_back: self.to_back },
        )
    }
}

/// Handle to answer one received request under its sequence number.
pub struct Responder {
    sequence: u64,
    to_back: mpsc::Sender<Outgoing>,
}

impl Responder {
    pub async fn respond(self, result: Result<response::Body, String>) {
        let response = match result {
            Ok(body) => Response::ok(body),
            Err(error) => Response::failure(error),
        };
        let _ = self
            .to_back
            .send(Outgoing::Response { sequence: self.sequence, response })
            .await;
    }
}

pub struct WsMessenger {
    to_back: mpsc::Sender<Outgoing>,
    requests: Mutex<Option<mpsc::Receiver<IncomingRequest>>>,
    events: Mutex<Option<mpsc::Receiver<event_body::Body>>>,
    sequence: AtomicU64,
    closed: CancellationToken,
}

impl WsMessenger {
    /// Connect to a broker endpoint, negotiating the frame encoding via
    /// subprotocol.
    pub async fn connect(url: &str, encoding: Encoding) -> Result<Arc<Self>, ClientError> {
        let mut handshake = url.into_client_request()?;
        handshake.headers_mut().insert(
            "sec-websocket-protocol",
            encoding
                .subprotocol()
                .parse()
                .expect("subprotocol is a valid header value"),
        );
        debug!("[frontend] connect: {url}");
        let (stream, response) = connect_async(handshake).await?;
        debug!("[frontend] connected: {:?}", response.status());

        let (to_back, back_rx) = mpsc::channel(CHANNEL_BOUND);
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_BOUND);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_BOUND);
        let closed = CancellationToken::new();

        tokio::spawn(background(
            stream,
            encoding,
            back_rx,
            request_tx,
            event_tx,
            to_back.clone(),
            closed.clone(),
        ));

        Ok(Arc::new(Self {
            to_back,
            requests: Mutex::new(Some(request_rx)),
            events: Mutex::new(Some(event_rx)),
            sequence: AtomicU64::new(1),
            closed,
        }))
    }

    /// Take the stream of broker requests; there is exactly one consumer.
    pub fn take_requests(&self) -> Option<mpsc::Receiver<IncomingRequest>> {
        self.requests.lock().expect("requests lock").take()
    }

    pub fn take_events(&self) -> Option<mpsc::Receiver<event_body::Body>> {
        self.events.lock().expect("events lock").take()
    }

    /// Send a request and wait for the matching response body.
    pub async fn request_sync(&self, body: request::Body) -> Result<response::Body, ClientError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let (send_back, receiver) = oneshot::channel();
        self.to_back
            .send(Outgoing::Request { sequence, body, send_back })
            .await
            .map_err(|_| ClientError::Closed)?;
        let response = receiver.await.map_err(|_| ClientError::Closed)??;
        if let Some(error) = response.error {
            return Err(ClientError::Broker(error));
        }
        response.body.ok_or(ClientError::EmptyResponse)
    }

    /// Fire-and-forget event frame.
    pub async fn send_event(&self, body: event_body::Body) -> Result<(), ClientError> {
        self.to_back
            .send(Outgoing::Event(body))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Close the connection; pending calls fail.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is gone.
    pub async fn closing(&self) {
        self.closed.cancelled().await
    }
}

async fn background<S>(
    mut stream: S,
    encoding: Encoding,
    mut back_rx: mpsc::Receiver<Outgoing>,
    request_tx: mpsc::Sender<IncomingRequest>,
    event_tx: mpsc::Sender<event_body::Body>,
    to_back: mpsc::Sender<Outgoing>,
    closed: CancellationToken,
) where
    S: Stream<Item = Result<Message, async_tungstenite::tungstenite::Error>>
        + Sink<Message>
        + Unpin,
{
    let mut pending: HashMap<u64, oneshot::Sender<Result<Response, ClientError>>> = HashMap::new();

    let reason: String = loop {
        tokio::select! {
            _ = closed.cancelled() => break "closed by local caller".into(),

            outgoing = back_rx.recv() => {
                let Some(outgoing) = outgoing else { break "messenger dropped".into() };
                let envelope = match outgoing {
                    Outgoing::Request { sequence, body, send_back } => {
                        pending.insert(sequence, send_back);
                        Envelope::request(sequence, body)
                    }
                    Outgoing::Response { sequence, response } =>
                        Envelope::response(sequence, response),
                    Outgoing::Event(body) => Envelope::event(body),
                };
                match encode(&encoding, &envelope) {
                    Ok(message) => {
                        if stream.send(message).await.is_err() {
                            break "websocket send failed".into();
                        }
                    }
                    Err(err) => break format!("encode failed: {err}"),
                }
            },

            frame = stream.next() => match frame {
                Some(Ok(message)) => {
                    let payload = match &message {
                        Message::Binary(b) => &b[..],
                        Message::Text(t) => t.as_str().as_bytes(),
                        Message::Close(_) => break "closed by peer".into(),
                        _ => continue,
                    };
                    match encoding.decode(payload) {
                        Ok(envelope) => {
                            demux(envelope, &mut pending, &request_tx, &event_tx, &to_back)
                        }
                        Err(err) => break format!("decode failed: {err}"),
                    }
                }
                Some(Err(err)) => break format!("websocket error: {err}"),
                None => break "connection closed".into(),
            },
        }
    };

    let _ = stream.close().await;
    closed.cancel();
    debug!("[backend] messenger terminated: {reason}");
    for (_, waiter) in pending.drain() {
        let _ = waiter.send(Err(ClientError::Terminated(reason.clone())));
    }
}

fn encode(encoding: &Encoding, envelope: &Envelope) -> Result<Message, ClientError> {
    let wire = encoding.encode(envelope)?;
    Ok(match encoding {
        Encoding::Protobuf => Message::Binary(wire.into()),
        Encoding::Json => {
            let text = String::from_utf8(wire).expect("serde_json produces utf-8");
            Message::Text(text.into())
        }
    })
}

fn demux(
    envelope: Envelope,
    pending: &mut HashMap<u64, oneshot::Sender<Result<Response, ClientError>>>,
    request_tx: &mpsc::Sender<IncomingRequest>,
    event_tx: &mpsc::Sender<event_body::Body>,
    to_back: &mpsc::Sender<Outgoing>,
) {
    let sequence = envelope.sequence;
    match envelope.payload {
        Some(Payload::Response(response)) => match pending.remove(&sequence) {
            Some(waiter) => {
                let _ = waiter.send(Ok(response));
            }
            None => warn!("[backend] response for unknown sequence {sequence}"),
        },
        Some(Payload::Request(Request { body: Some(body) })) if sequence != 0 => {
            let incoming = IncomingRequest { body, sequence, to_back: to_back.clone() };
            if request_tx.try_send(incoming).is_err() {
                warn!("[backend] request channel full, dropping frame seq={sequence}");
            }
        }
        Some(Payload::Event(event)) => {
            if let Some(body) = event.body {
                if event_tx.try_send(body).is_err() {
                    warn!("[backend] event channel full, dropping frame");
                }
            }
        }
        _ => warn!("[backend] ignoring malformed frame seq={sequence}"),
    }
}
