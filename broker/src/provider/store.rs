//! Concurrent registry of live providers with a cluster-wide broadcast
//! channel, a throughput gauge and the optional cloud runner.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::{debug, info};
use tokio::sync::mpsc;
use wasimoff_types::envelope::event_body;
use wasimoff_types::{event, TaskKind};

use crate::storage::FileStorage;

use super::cloud::{self, CloudConfig};
use super::inbox::Inbox;
use super::metrics::Metrics;
use super::ratecounter::RateCounter;
use super::task::AsyncTask;
use super::Provider;

/// Bound of the broadcast channel; events beyond it are dropped, critical
/// state is never conveyed via broadcast.
const BROADCAST_BOUND: usize = 10;
/// Window of the task-rate counter.
const RATE_WINDOW: Duration = Duration::from_secs(5);
/// Period of the throughput broadcast.
const THROUGHPUT_PERIOD: Duration = Duration::from_secs(1);

pub struct ProviderStore {
    providers: DashMap<String, Arc<Provider>>,
    broadcast: mpsc::Sender<event_body::Body>,
    cloud_inbox: Option<Arc<Inbox>>,

    /// Uploaded files, shared with the HTTP storage routes.
    pub storage: FileStorage,
    pub metrics: Metrics,
    ratecounter: RateCounter,
}

impl ProviderStore {
    /// Build the store and start its background loops (broadcast
    /// transmitter, throughput ticker, optional cloud runner).
    pub fn new(storage: FileStorage, cloud: Option<CloudConfig>) -> Arc<Self> {
        let (broadcast, broadcast_rx) = mpsc::channel(BROADCAST_BOUND);
        let cloud_inbox = cloud.map(cloud::spawn);

        let store = Arc::new(Self {
            providers: DashMap::new(),
            broadcast,
            cloud_inbox,
            storage,
            metrics: Metrics::new(),
            ratecounter: RateCounter::new(RATE_WINDOW),
        });

        tokio::spawn(transmitter(store.clone(), broadcast_rx));
        tokio::spawn(throughput(store.clone()));
        store
    }

    // ------------- registry -------------

    pub fn add(&self, provider: Arc<Provider>) {
        self.providers.insert(provider.addr().to_string(), provider);
        info!("provider store: {} connected", self.size());
        self.announce_cluster();
        self.refresh_gauges();
    }

    pub fn remove(&self, provider: &Provider) {
        self.providers.remove(provider.addr());
        info!("provider store: {} connected", self.size());
        self.announce_cluster();
        self.refresh_gauges();
    }

    pub fn size(&self) -> usize {
        self.providers.len()
    }

    pub fn get(&self, addr: &str) -> Option<Arc<Provider>> {
        self.providers.get(addr).map(|p| p.clone())
    }

    /// Snapshot of all connected providers, in no particular order.
    pub fn values(&self) -> Vec<Arc<Provider>> {
        self.providers.iter().map(|p| p.value().clone()).collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.key().clone()).collect()
    }

    // ------------- broadcast -------------

    /// Queue an event for every connected provider. Lossy: when the
    /// transmitter falls behind, events are dropped.
    pub fn publish(&self, body: event_body::Body) {
        if self.broadcast.try_send(body).is_err() {
            debug!("broadcast channel full, dropping event");
        }
    }

    fn announce_cluster(&self) {
        self.publish(event_body::Body::ClusterInfo(event::ClusterInfo {
            providers: Some(self.size() as u32),
        }));
    }

    /// Push a freshly uploaded file to all connected providers in the
    /// background, probe-first so known blobs cost one RPC.
    pub fn distribute(self: &Arc<Self>, file: crate::storage::File) {
        let store = self.clone();
        tokio::spawn(async move {
            for provider in store.values() {
                if let Err(err) = provider.upload(&file).await {
                    debug!("[{}] file distribution failed: {err}", provider.addr());
                }
            }
        });
    }

    // ------------- cloud offloading -------------

    /// Offloading is available only when a runner is configured, and only
    /// for Wasip1 tasks.
    pub fn can_cloud_offload(&self, task: &AsyncTask) -> bool {
        self.cloud_inbox.is_some() && task.request.kind() == TaskKind::Wasip1
    }

    pub fn cloud_inbox(&self) -> Option<&Arc<Inbox>> {
        self.cloud_inbox.as_ref()
    }

    // ------------- accounting -------------

    /// Tick the throughput counter for one completed task.
    pub fn rate_tick(&self) {
        self.ratecounter.observe();
    }

    pub fn rate(&self) -> f64 {
        self.ratecounter.rate()
    }

    /// Record a finished task in the completion histogram.
    pub fn observe(&self, task: &AsyncTask) {
        self.metrics.observe_task(
            task.error.is_none(),
            task.cloud_offloaded,
            task.created.elapsed(),
        );
    }

    pub fn refresh_gauges(&self) {
        let workers: usize = self.providers.iter().map(|p| p.current_limit()).sum();
        self.metrics.set_connected(self.size() as i64, workers as i64);
    }
}

/// Forward queued broadcast events to every currently connected provider.
async fn transmitter(store: Arc<ProviderStore>, mut events: mpsc::Receiver<event_body::Body>) {
    while let Some(body) = events.recv().await {
        for provider in store.values() {
            let _ = provider.messenger().send_event(body.clone()).await;
        }
    }
}

/// Publish the overall task rate once a second.
async fn throughput(store: Arc<ProviderStore>) {
    let mut ticker = tokio::time::interval(THROUGHPUT_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        store.publish(event_body::Body::Throughput(event::Throughput {
            overall: Some(store.rate() as f32),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::tests::fake_peer;
    use crate::transport::testing::ChannelTransport;
    use crate::transport::{Messenger, TransportError};

    fn test_store() -> Arc<ProviderStore> {
        ProviderStore::new(FileStorage::in_memory(), None)
    }

    #[tokio::test]
    async fn add_remove_and_iterate() {
        let store = test_store();
        assert_eq!(store.size(), 0);

        let (a, b) = ChannelTransport::pair();
        let (_peer, _events) = fake_peer(b, vec![], Duration::ZERO);
        let provider = Provider::new(Messenger::new(a));

        store.add(provider.clone());
        assert_eq!(store.size(), 1);
        assert_eq!(store.keys(), vec![provider.addr().to_string()]);
        assert!(store.get(provider.addr()).is_some());

        store.remove(&provider);
        assert_eq!(store.size(), 0);
        provider.close(TransportError::Closed("test over".into()));
    }

    /// Next ClusterInfo event, skipping interleaved throughput gauges.
    async fn next_cluster_info(events: &mut mpsc::Receiver<event_body::Body>) -> u32 {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("event in time")
                .expect("event");
            if let event_body::Body::ClusterInfo(info) = event {
                return info.providers.unwrap_or_default();
            }
        }
    }

    #[tokio::test]
    async fn cluster_info_broadcast_on_membership_change() {
        let store = test_store();

        // the observing provider receives events caused by the second one
        let (a, b) = ChannelTransport::pair();
        let (_peer, mut peer_events) = fake_peer(b, vec![], Duration::ZERO);
        let observer = Provider::new(Messenger::new(a));
        store.add(observer.clone());

        // event caused by the observer's own join
        assert_eq!(next_cluster_info(&mut peer_events).await, 1);

        let (c, d) = ChannelTransport::pair();
        let (_peer2, _events2) = fake_peer(d, vec![], Duration::ZERO);
        let second = Provider::new(Messenger::new(c));
        store.add(second.clone());
        assert_eq!(next_cluster_info(&mut peer_events).await, 2);

        store.remove(&second);
        assert_eq!(next_cluster_info(&mut peer_events).await, 1);

        observer.close(TransportError::Closed("test over".into()));
        second.close(TransportError::Closed("test over".into()));
    }

    #[tokio::test]
    async fn cloud_offload_policy() {
        use tokio::sync::mpsc;
        use tokio_util::sync::CancellationToken;
        use wasimoff_types::TaskRequest;

        let with_cloud = ProviderStore::new(
            FileStorage::in_memory(),
            Some(CloudConfig {
                credentials: None,
                function: "http://localhost:1/function".into(),
                concurrency: 1,
            }),
        );
        let without_cloud = test_store();

        let (tx, _rx) = mpsc::channel(1);
        let wasip1 = AsyncTask::new(
            CancellationToken::new(),
            TaskRequest::Wasip1(Default::default()),
            tx.clone(),
        );
        let pyodide = AsyncTask::new(
            CancellationToken::new(),
            TaskRequest::Pyodide(Default::default()),
            tx,
        );

        assert!(with_cloud.can_cloud_offload(&wasip1));
        assert!(!with_cloud.can_cloud_offload(&pyodide));
        assert!(!without_cloud.can_cloud_offload(&wasip1));
    }
}
