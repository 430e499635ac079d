//! A provider is a single connection initiated by a computing peer: it
//! wraps a [`Messenger`], owns the resizable worker-slot semaphore, and
//! accepts tasks over a rendezvous [`Inbox`].

pub mod cloud;
pub mod inbox;
pub mod limiter;
pub mod metrics;
pub mod ratecounter;
pub mod socket;
pub mod store;
pub mod task;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashSet;
use log::{debug, warn};
use thiserror::Error;
use wasimoff_types::envelope::{event_body, request, response};
use wasimoff_types::task::trace_event::Kind;
use wasimoff_types::task::Cancel;
use wasimoff_types::{filesystem, File, Ping, TaskResponse};

use crate::storage;
use crate::transport::{Messenger, TransportError};

use self::inbox::{Inbox, InboxReceiver};
use self::limiter::{ResizableSemaphore, WorkerPermit};
use self::task::{AsyncTask, TaskError};

/// Interval of the liveness ping RPC.
const PING_INTERVAL: Duration = Duration::from_secs(5);
/// Smoothing factor of the latency estimate.
const LATENCY_EMA_ALPHA: f64 = 0.3;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unexpected response type")]
    UnexpectedResponse,
    #[error("peer computed a different ref: {0:?}")]
    RefMismatch(String),
}

pub struct Provider {
    messenger: Arc<Messenger>,
    lifetime: crate::transport::Lifetime,

    /// Worker-slot semaphore; resized when the peer advertises resources.
    limiter: Arc<ResizableSemaphore>,
    inbox: Arc<Inbox>,

    /// Refs the peer is known to hold; best-effort, may be stale.
    files: DashSet<String>,

    info: Mutex<Info>,
    addr: String,

    /// Smoothed ping round-trip estimate in microseconds.
    latency_micros: AtomicU64,
}

struct Info {
    name: String,
    useragent: String,
}

impl Provider {
    /// Wrap a messenger and start the acceptor and pinger loops. The
    /// worker-slot limit starts at zero until the peer advertises its
    /// resources.
    pub fn new(messenger: Arc<Messenger>) -> Arc<Self> {
        let addr = messenger.addr().to_string();
        let (inbox, inbox_rx) = inbox::channel();

        let provider = Arc::new(Self {
            lifetime: messenger.lifetime().clone(),
            messenger,
            limiter: ResizableSemaphore::new(0),
            inbox,
            files: DashSet::new(),
            info: Mutex::new(Info { name: addr.clone(), useragent: "unknown".into() }),
            addr,
            latency_micros: AtomicU64::new(0),
        });

        tokio::spawn(provider.clone().accept_tasks(inbox_rx));
        tokio::spawn(provider.clone().pinger());
        provider
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn name(&self) -> String {
        self.info.lock().expect("info lock").name.clone()
    }

    pub fn useragent(&self) -> String {
        self.info.lock().expect("info lock").useragent.clone()
    }

    /// Apply the hello event a peer sends after connecting.
    pub fn set_hello(&self, name: Option<String>, useragent: Option<String>) {
        let mut info = self.info.lock().expect("info lock");
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            info.name = name;
        }
        if let Some(useragent) = useragent.filter(|u| !u.is_empty()) {
            info.useragent = useragent;
        }
    }

    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.messenger
    }

    pub fn inbox(&self) -> &Arc<Inbox> {
        &self.inbox
    }

    // -------------------- closure --------------------

    /// Idempotent close of messenger and lifetime; the acceptor and pinger
    /// observe the lifetime and terminate.
    pub fn close(&self, reason: TransportError) {
        self.inbox.close();
        self.messenger.close(reason.clone());
        self.lifetime.close(reason);
    }

    pub async fn closing(&self) {
        self.lifetime.closing().await
    }

    pub fn err(&self) -> Option<TransportError> {
        self.lifetime.err()
    }

    // -------------------- limiter --------------------

    /// Currently running tasks according to the semaphore.
    pub fn current_tasks(&self) -> usize {
        self.limiter.count()
    }

    pub fn current_limit(&self) -> usize {
        self.limiter.limit()
    }

    pub fn resize(&self, limit: usize) {
        self.limiter.resize(limit);
    }

    /// Whether the acceptor is currently blocked on the inbox with a free
    /// worker slot.
    pub fn waiting(&self) -> bool {
        self.inbox.is_waiting()
    }

    // -------------------- latency --------------------

    pub fn latency(&self) -> Duration {
        Duration::from_micros(self.latency_micros.load(Ordering::Relaxed))
    }

    fn observe_latency(&self, sample: Duration) {
        let sample = sample.as_micros() as f64;
        let old = self.latency_micros.load(Ordering::Relaxed) as f64;
        let next = if old == 0.0 {
            sample
        } else {
            LATENCY_EMA_ALPHA * sample + (1.0 - LATENCY_EMA_ALPHA) * old
        };
        self.latency_micros.store(next as u64, Ordering::Relaxed);
    }

    // -------------------- task channel --------------------

    /// Accept tasks from the inbox: acquire a worker slot, announce
    /// readiness, then hand each received task to a concurrent worker.
    async fn accept_tasks(self: Arc<Self>, mut inbox_rx: InboxReceiver) {
        loop {
            let permit = tokio::select! {
                permit = self.limiter.clone().acquire_owned() => permit,
                _ = self.lifetime.closing() => break,
            };
            self.inbox.post_ready();

            tokio::select! {
                _ = self.lifetime.closing() => break,
                received = inbox_rx.recv() => {
                    let Some(mut task) = received else { break };
                    if let Err(err) = task.check() {
                        task.error = Some(err);
                        task.finish();
                        continue; // permit drops here, slot is free again
                    }
                    tokio::spawn(self.clone().run_task(task, permit));
                }
            }
        }
        self.close(TransportError::Closed("provider acceptor exited".into()));
    }

    /// Perform the remote procedure call for one task and signal its done
    /// sink exactly once. Holds the worker permit for the duration.
    async fn run_task(self: Arc<Self>, mut task: Box<AsyncTask>, permit: WorkerPermit) {
        let name = self.name();
        task.provider = Some(name.clone());
        task.request.trace_event(Kind::BrokerTransmitProviderTask);

        let body = task.request.clone().into_body();
        match self.messenger.request_sync(&task.ctx, body).await {
            Ok(body) => match TaskResponse::from_body(body) {
                Some(mut response) => {
                    response.info_mut().provider = Some(name);
                    task.response = response;
                }
                None => task.error = Some(TaskError::Rpc("unexpected response type".into())),
            },
            Err(err) if err.is_cancelled() => {
                // tell the peer to abort the worker, best-effort
                let cancel = Cancel {
                    id: Some(task.id()),
                    reason: Some("context canceled".into()),
                };
                let _ = self
                    .messenger
                    .send_event(event_body::Body::TaskCancel(cancel))
                    .await;
                task.error = Some(TaskError::Cancelled);
            }
            Err(err) => task.error = Some(TaskError::Rpc(err.to_string())),
        }

        task.finish();
        drop(permit);
    }

    /// Periodic empty ping RPC feeding the latency estimate.
    async fn pinger(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let cancel = self.lifetime.child_token();
        loop {
            tokio::select! {
                _ = self.lifetime.closing() => return,
                _ = ticker.tick() => {}
            }
            let t0 = Instant::now();
            match self.messenger.request_sync(&cancel, request::Body::Ping(Ping {})).await {
                Ok(_) => {
                    self.observe_latency(t0.elapsed());
                    debug!("[{}] ping rtt {:?} (ema {:?})", self.addr, t0.elapsed(), self.latency());
                }
                Err(err) => {
                    debug!("[{}] ping failed: {err}", self.addr);
                    if self.lifetime.is_closed() {
                        return;
                    }
                }
            }
        }
    }

    // -------------------- filesystem --------------------

    /// Ask the peer to list its files and replace the local known set.
    pub async fn list_files(&self) -> Result<(), ProviderError> {
        let cancel = self.lifetime.child_token();
        let body = request::Body::ListFiles(filesystem::listing::Request {});
        match self.messenger.request_sync(&cancel, body).await? {
            response::Body::ListFiles(listing) => {
                self.files.clear();
                for file in listing.files {
                    self.files.insert(file);
                }
                Ok(())
            }
            _ => Err(ProviderError::UnexpectedResponse),
        }
    }

    /// Probe the peer for a single file by ref.
    pub async fn probe_file(&self, r#ref: &str) -> Result<bool, ProviderError> {
        let cancel = self.lifetime.child_token();
        let body = request::Body::ProbeFile(filesystem::probe::Request {
            file: Some(r#ref.to_string()),
        });
        match self.messenger.request_sync(&cancel, body).await? {
            response::Body::ProbeFile(probe) => Ok(probe.ok),
            _ => Err(ProviderError::UnexpectedResponse),
        }
    }

    /// Upload a file from storage, probing first to skip known blobs. The
    /// peer must echo the same ref back.
    pub async fn upload(&self, file: &storage::File) -> Result<(), ProviderError> {
        let r#ref = file.r#ref().to_string();
        if self.probe_file(&r#ref).await? {
            self.files.insert(r#ref);
            return Ok(());
        }

        let cancel = self.lifetime.child_token();
        let body = request::Body::UploadFile(filesystem::upload::Request {
            upload: Some(File {
                r#ref: Some(r#ref.clone()),
                media: Some(file.media.clone()),
                blob: Some(file.bytes.clone()),
            }),
        });
        match self.messenger.request_sync(&cancel, body).await? {
            response::Body::UploadFile(uploaded) => {
                if uploaded.r#ref.as_deref() != Some(r#ref.as_str()) {
                    return Err(ProviderError::RefMismatch(
                        uploaded.r#ref.unwrap_or_default(),
                    ));
                }
                self.files.insert(r#ref);
                Ok(())
            }
            _ => Err(ProviderError::UnexpectedResponse),
        }
    }

    /// Local best-effort check whether the peer is known to have a file.
    pub fn has(&self, r#ref: &str) -> bool {
        self.files.contains(r#ref)
    }

    /// Test-only direct manipulation of the known-file set.
    #[cfg(test)]
    pub(crate) fn insert_file(&self, r#ref: &str) {
        self.files.insert(r#ref.to_string());
    }
}

impl Drop for Provider {
    fn drop(&mut self) {
        if !self.lifetime.is_closed() {
            warn!("[{}] provider dropped without close", self.addr);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::testing::ChannelTransport;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use wasimoff_types::task::wasip1;
    use wasimoff_types::TaskRequest;

    /// A scripted peer runtime answering provider RPCs in-process.
    pub(crate) fn fake_peer(
        transport: ChannelTransport,
        files: Vec<String>,
        run_delay: Duration,
    ) -> (Arc<Messenger>, mpsc::Receiver<event_body::Body>) {
        let messenger = Messenger::new(transport);
        let mut requests = messenger.take_requests().expect("peer requests");
        let events = messenger.take_events().expect("peer events");
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let files = files.clone();
                let (body, responder) = request.split();
                tokio::spawn(async move {
                    match body {
                        request::Body::Ping(_) => {
                            responder.respond(Ok(response::Body::Pong(Ping {}))).await;
                        }
                        request::Body::ListFiles(_) => {
                            responder
                                .respond(Ok(response::Body::ListFiles(
                                    filesystem::listing::Response { files },
                                )))
                                .await;
                        }
                        request::Body::ProbeFile(probe) => {
                            let ok = probe.file.map(|f| files.contains(&f)).unwrap_or(false);
                            responder
                                .respond(Ok(response::Body::ProbeFile(
                                    filesystem::probe::Response { ok },
                                )))
                                .await;
                        }
                        request::Body::RunWasip1(_) => {
                            tokio::time::sleep(run_delay).await;
                            responder
                                .respond(Ok(response::Body::RunWasip1(wasip1::Response {
                                    result: Some(wasip1::response::Result::Ok(wasip1::Output {
                                        status: Some(0),
                                        stdout: b"Hello, World!\n".to_vec(),
                                        ..Default::default()
                                    })),
                                    ..Default::default()
                                })))
                                .await;
                        }
                        _ => responder.respond(Err("unsupported".into())).await,
                    }
                });
            }
        });
        (messenger, events)
    }

    fn submit_task(provider: &Arc<Provider>) -> mpsc::Receiver<Box<AsyncTask>> {
        let (done_tx, done_rx) = mpsc::channel(1);
        let task = AsyncTask::new(
            CancellationToken::new(),
            TaskRequest::Wasip1(Default::default()),
            done_tx,
        );
        assert!(provider.inbox().try_claim(), "provider should be waiting");
        provider.inbox().send_claimed(task).unwrap();
        done_rx
    }

    async fn wait_for_waiting(provider: &Arc<Provider>) {
        for _ in 0..100 {
            if provider.waiting() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("provider never became ready");
    }

    #[tokio::test]
    async fn runs_a_task_and_signals_done_once() {
        let (a, b) = ChannelTransport::pair();
        let (_peer, _events) = fake_peer(b, vec![], Duration::ZERO);
        let provider = Provider::new(Messenger::new(a));

        provider.resize(2);
        wait_for_waiting(&provider).await;

        let mut done = submit_task(&provider);
        let task = done.recv().await.expect("completion");
        assert!(task.error.is_none());
        assert_eq!(task.response.error(), None);
        assert_eq!(task.provider.as_deref(), Some(provider.name().as_str()));
        assert!(done.try_recv().is_err(), "done sink signaled twice");

        provider.close(TransportError::Closed("test over".into()));
    }

    #[tokio::test]
    async fn capacity_bounds_in_flight_tasks() {
        let (a, b) = ChannelTransport::pair();
        let (_peer, _events) = fake_peer(b, vec![], Duration::from_millis(100));
        let provider = Provider::new(Messenger::new(a));

        provider.resize(1);
        wait_for_waiting(&provider).await;

        let mut first = submit_task(&provider);
        // the single slot is taken; no readiness is posted
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!provider.waiting());
        assert!(provider.current_tasks() <= provider.current_limit());
        assert!(!provider.inbox().try_claim());

        first.recv().await.expect("first completes");
        wait_for_waiting(&provider).await;
        provider.close(TransportError::Closed("test over".into()));
    }

    #[tokio::test]
    async fn cancellation_sends_task_cancel_event() {
        let (a, b) = ChannelTransport::pair();
        let (_peer, mut peer_events) = fake_peer(b, vec![], Duration::from_secs(60));
        let provider = Provider::new(Messenger::new(a));

        provider.resize(1);
        wait_for_waiting(&provider).await;

        let (done_tx, mut done_rx) = mpsc::channel(1);
        let ctx = CancellationToken::new();
        let task = AsyncTask::new(ctx.clone(), TaskRequest::Wasip1(Default::default()), done_tx);
        assert!(provider.inbox().try_claim());
        provider.inbox().send_claimed(task).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel();

        let task = done_rx.recv().await.expect("completion");
        assert!(matches!(task.error, Some(TaskError::Cancelled)));

        let event = tokio::time::timeout(Duration::from_secs(1), peer_events.recv())
            .await
            .expect("event in time")
            .expect("event");
        match event {
            event_body::Body::TaskCancel(cancel) => {
                assert_eq!(cancel.reason.as_deref(), Some("context canceled"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        provider.close(TransportError::Closed("test over".into()));
    }

    #[tokio::test]
    async fn file_set_maintenance() {
        let (a, b) = ChannelTransport::pair();
        let known = vec!["sha256:aa".to_string(), "sha256:bb".to_string()];
        let (_peer, _events) = fake_peer(b, known, Duration::ZERO);
        let provider = Provider::new(Messenger::new(a));

        provider.list_files().await.unwrap();
        assert!(provider.has("sha256:aa"));
        assert!(provider.has("sha256:bb"));
        assert!(!provider.has("sha256:cc"));

        assert!(provider.probe_file("sha256:aa").await.unwrap());
        assert!(!provider.probe_file("sha256:zz").await.unwrap());

        // upload of a file the peer already has is a no-op probe
        let file = storage::File::new(storage::MEDIA_WASM, b"\0asm".to_vec());
        provider.insert_file(file.r#ref());
        provider.close(TransportError::Closed("test over".into()));
    }

    #[tokio::test]
    async fn hello_event_updates_identity() {
        let (a, b) = ChannelTransport::pair();
        let (_peer, _events) = fake_peer(b, vec![], Duration::ZERO);
        let provider = Provider::new(Messenger::new(a));

        assert_eq!(provider.name(), provider.addr());
        provider.set_hello(Some("worker-7".into()), Some("firefox/142".into()));
        assert_eq!(provider.name(), "worker-7");
        assert_eq!(provider.useragent(), "firefox/142");
        provider.close(TransportError::Closed("test over".into()));
    }
}
