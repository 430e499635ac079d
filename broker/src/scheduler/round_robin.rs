use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::provider::store::ProviderStore;
use crate::provider::task::{AsyncTask, TaskError};

use super::{dynamic_submit, Scheduler, SELECTION_TIMEOUT};

/// Rotate through providers in address order, offering each task to one
/// provider at a time. Ignores task requirements like [`AnyFreeSelector`].
pub struct RoundRobinSelector {
    store: Arc<ProviderStore>,
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new(store: Arc<ProviderStore>) -> Self {
        Self { store, cursor: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl Scheduler for RoundRobinSelector {
    async fn schedule(&self, task: Box<AsyncTask>) -> Result<(), (Box<AsyncTask>, TaskError)> {
        if let Err(err) = task.check() {
            return Err((task, err));
        }
        let mut providers = self.store.values();
        if providers.is_empty() {
            return Err((task, TaskError::Placement("provider store is empty".into())));
        }
        providers.sort_by(|a, b| a.addr().cmp(b.addr()));
        let next = self.cursor.fetch_add(1, Ordering::Relaxed) % providers.len();
        let chosen = providers[next].clone();
        dynamic_submit(task, std::slice::from_ref(&chosen), None, SELECTION_TIMEOUT).await
    }

    fn rate_tick(&self) {
        self.store.rate_tick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::tests::fake_peer;
    use crate::provider::Provider;
    use crate::storage::FileStorage;
    use crate::transport::testing::ChannelTransport;
    use crate::transport::{Messenger, TransportError};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use wasimoff_types::TaskRequest;

    #[tokio::test]
    async fn rotates_across_providers() {
        let store = ProviderStore::new(FileStorage::in_memory(), None);
        let selector = RoundRobinSelector::new(store.clone());

        let mut providers = Vec::new();
        for _ in 0..2 {
            let (a, b) = ChannelTransport::pair();
            let (_peer, _events) = fake_peer(b, vec![], Duration::ZERO);
            let provider = Provider::new(Messenger::new(a));
            provider.resize(1);
            store.add(provider.clone());
            providers.push(provider);
        }

        let mut assigned = Vec::new();
        for _ in 0..4 {
            let (done_tx, mut done_rx) = mpsc::channel(1);
            let task = AsyncTask::new(
                CancellationToken::new(),
                TaskRequest::Wasip1(Default::default()),
                done_tx,
            );
            selector.schedule(task).await.expect("placement");
            let completed = done_rx.recv().await.expect("completion");
            assigned.push(completed.provider.clone().unwrap());
        }

        // strict alternation over the address-ordered registry
        let first = assigned[0].clone();
        let second = assigned[1].clone();
        assert_ne!(first, second);
        assert_eq!(assigned[2], first);
        assert_eq!(assigned[3], second);

        for provider in providers {
            provider.close(TransportError::Closed("test over".into()));
        }
    }
}
