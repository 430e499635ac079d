use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use wasimoff_types::envelope::{envelope::Payload, event_body, request, response};
use wasimoff_types::{Envelope, Request, Response};

use super::{Lifetime, Transport, TransportError};

/// Bound of the outbound, request and event channels. Inbound producers
/// drop frames when a consumer falls this far behind.
const CHANNEL_BOUND: usize = 64;

/// Instructions from the messenger frontend to the background task.
enum Outgoing {
    Request {
        sequence: u64,
        body: request::Body,
        send_back: oneshot::Sender<Result<Response, TransportError>>,
    },
    Response {
        sequence: u64,
        response: Response,
    },
    Event(event_body::Body),
    /// Remove a pending entry whose waiter gave up (cancel or timeout).
    Forget(u64),
}

/// A request received from the peer, with a handle to send the response
/// back under the same sequence number.
pub struct IncomingRequest {
    pub body: request::Body,
    sequence: u64,
    to_back: mpsc::Sender<Outgoing>,
}

impl IncomingRequest {
    /// Answer this request. An `Err` string becomes the RPC-level error
    /// field of the response frame.
    pub async fn respond(self, result: Result<response::Body, String>) {
        let (_, responder) = self.split();
        responder.respond(result).await;
    }

    /// Separate the request body from the response handle, so the body can
    /// be consumed while the responder moves into a handler task.
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
        // messenger may be closing concurrently, nothing left to do then
        let _ = self
            .to_back
            .send(Outgoing::Response { sequence: self.sequence, response })
            .await;
    }
}

/// A registered request waiting for its response frame.
pub struct PendingCall {
    sequence: u64,
    receiver: oneshot::Receiver<Result<Response, TransportError>>,
    to_back: mpsc::Sender<Outgoing>,
}

impl PendingCall {
    /// Wait for the response, honoring the caller's cancellation token.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<response::Body, TransportError> {
        tokio::select! {
            response = self.receiver => match response {
                Ok(result) => resolve(result?),
                Err(_) => Err(TransportError::Closed("messenger terminated".into())),
            },
            _ = cancel.cancelled() => {
                // best-effort removal of the pending entry
                let _ = self.to_back.try_send(Outgoing::Forget(self.sequence));
                Err(TransportError::Cancelled)
            }
        }
    }
}

/// Map a response frame to its body, surfacing the RPC-level error field.
fn resolve(response: Response) -> Result<response::Body, TransportError> {
    if let Some(error) = response.error {
        return Err(TransportError::Peer(error));
    }
    response
        .body
        .ok_or_else(|| TransportError::Peer("empty response body".into()))
}

/// Multiplexes requests, responses and events over one [`Transport`].
///
/// All writes funnel through a single background task which also demuxes
/// inbound frames, so frame order on the stream is total. Unrelated
/// requests may still complete out of order.
pub struct Messenger {
    addr: String,
    sequence: AtomicU64,
    to_back: mpsc::Sender<Outgoing>,
    requests: Mutex<Option<mpsc::Receiver<IncomingRequest>>>,
    events: Mutex<Option<mpsc::Receiver<event_body::Body>>>,
    lifetime: Lifetime,
}

impl Messenger {
    pub fn new(transport: impl Transport) -> Arc<Self> {
        let (to_back, back_rx) = mpsc::channel(CHANNEL_BOUND);
        let (request_tx, request_rx) = mpsc::channel(CHANNEL_BOUND);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_BOUND);
        let lifetime = Lifetime::new();
        let addr = transport.addr();

        tokio::spawn(background(
            transport,
            back_rx,
            request_tx,
            event_tx,
            to_back.clone(),
            lifetime.clone(),
        ));

        Arc::new(Self {
            addr,
            sequence: AtomicU64::new(1),
            to_back,
            requests: Mutex::new(Some(request_rx)),
            events: Mutex::new(Some(event_rx)),
            lifetime,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    /// Take the receiver of peer requests. Yields `None` after the first
    /// call; there is exactly one consumer per connection.
    pub fn take_requests(&self) -> Option<mpsc::Receiver<IncomingRequest>> {
        self.requests.lock().expect("requests lock").take()
    }

    /// Take the receiver of peer events, see [`Messenger::take_requests`].
    pub fn take_events(&self) -> Option<mpsc::Receiver<event_body::Body>> {
        self.events.lock().expect("events lock").take()
    }

    /// Register and transmit a request, returning the pending call to wait
    /// on. Fails immediately when the messenger is closed.
    pub async fn send_request(&self, body: request::Body) -> Result<PendingCall, TransportError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let (send_back, receiver) = oneshot::channel();
        self.to_back
            .send(Outgoing::Request { sequence, body, send_back })
            .await
            .map_err(|_| self.lifetime.cause())?;
        Ok(PendingCall { sequence, receiver, to_back: self.to_back.clone() })
    }

    /// Send a request and wait for the matching response.
    pub async fn request_sync(
        &self,
        cancel: &CancellationToken,
        body: request::Body,
    ) -> Result<response::Body, TransportError> {
        let call = self.send_request(body).await?;
        call.wait(cancel).await
    }

    /// Fire-and-forget event frame with sequence 0.
    pub async fn send_event(&self, body: event_body::Body) -> Result<(), TransportError> {
        self.to_back
            .send(Outgoing::Event(body))
            .await
            .map_err(|_| self.lifetime.cause())
    }

    /// Idempotent close; pending calls fail with `reason`.
    pub fn close(&self, reason: TransportError) {
        self.lifetime.close(reason);
    }
}

async fn background(
    mut transport: impl Transport,
    mut back_rx: mpsc::Receiver<Outgoing>,
    request_tx: mpsc::Sender<IncomingRequest>,
    event_tx: mpsc::Sender<event_body::Body>,
    to_back: mpsc::Sender<Outgoing>,
    lifetime: Lifetime,
) {
    let addr = transport.addr();
    let mut pending: HashMap<u64, oneshot::Sender<Result<Response, TransportError>>> =
        HashMap::new();

    let cause = loop {
        tokio::select! {
            _ = lifetime.closing() => break lifetime.cause(),

            outgoing = back_rx.recv() => {
                let Some(outgoing) = outgoing else {
                    break TransportError::Closed("messenger dropped".into());
                };
                match outgoing {
                    Outgoing::Request { sequence, body, send_back } => {
                        let envelope = Envelope::request(sequence, body);
                        if let Err(err) = transport.send(&envelope).await {
                            let _ = send_back.send(Err(err.clone()));
                            break err;
                        }
                        pending.insert(sequence, send_back);
                    }
                    Outgoing::Response { sequence, response } => {
                        let envelope = Envelope::response(sequence, response);
                        if let Err(err) = transport.send(&envelope).await {
                            break err;
                        }
                    }
                    Outgoing::Event(body) => {
                        if let Err(err) = transport.send(&Envelope::event(body)).await {
                            break err;
                        }
                    }
                    Outgoing::Forget(sequence) => {
                        pending.remove(&sequence);
                    }
                }
            },

            frame = transport.recv() => match frame {
                Some(Ok(envelope)) => {
                    demux(&addr, envelope, &mut pending, &request_tx, &event_tx, &to_back);
                }
                Some(Err(err)) => break err,
                None => break TransportError::Closed("connection closed by peer".into()),
            },
        }
    };

    transport.close().await;
    lifetime.close(cause.clone());
    debug!("[{addr}] messenger terminated: {cause}");

    // fail everyone still waiting with the closure cause, including
    // requests that were queued but never written
    back_rx.close();
    while let Ok(outgoing) = back_rx.try_recv() {
        if let Outgoing::Request { send_back, .. } = outgoing {
            let _ = send_back.send(Err(cause.clone()));
        }
    }
    for (_, waiter) in pending.drain() {
        let _ = waiter.send(Err(cause.clone()));
    }
    // dropping request_tx/event_tx here closes the consumer channels
}

/// Route one inbound frame: responses pop their pending entry, requests and
/// events go to their bounded channels and are dropped on overflow.
fn demux(
    addr: &str,
    envelope: Envelope,
    pending: &mut HashMap<u64, oneshot::Sender<Result<Response, TransportError>>>,
    request_tx: &mpsc::Sender<IncomingRequest>,
    event_tx: &mpsc::Sender<event_body::Body>,
    to_back: &mpsc::Sender<Outgoing>,
) {
    let sequence = envelope.sequence;
    match envelope.payload {
        Some(Payload::Request(Request { body: Some(body) })) if sequence != 0 => {
            let incoming = IncomingRequest { body, sequence, to_back: to_back.clone() };
            if request_tx.try_send(incoming).is_err() {
                warn!("[{addr}] request channel full, dropping frame seq={sequence}");
            }
        }
        Some(Payload::Response(response)) => match pending.remove(&sequence) {
            Some(waiter) => {
                let _ = waiter.send(Ok(response));
            }
            None => warn!("[{addr}] response for unknown sequence {sequence}"),
        },
        Some(Payload::Event(event)) => {
            if let Some(body) = event.body {
                if event_tx.try_send(body).is_err() {
                    warn!("[{addr}] event channel full, dropping frame");
                }
            }
        }
        _ => warn!("[{addr}] ignoring malformed frame seq={sequence}"),
    }
}
