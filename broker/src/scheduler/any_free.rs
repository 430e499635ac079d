use std::sync::Arc;

use async_trait::async_trait;

use crate::provider::store::ProviderStore;
use crate::provider::task::{AsyncTask, TaskError};

use super::{dynamic_submit, Scheduler, SELECTION_TIMEOUT};

/// The simplest selection policy: any free provider will do, without
/// regard for task requirements. Useful for homogeneous benchmark fleets.
pub struct AnyFreeSelector {
    store: Arc<ProviderStore>,
}

impl AnyFreeSelector {
    pub fn new(store: Arc<ProviderStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Scheduler for AnyFreeSelector {
    async fn schedule(&self, task: Box<AsyncTask>) -> Result<(), (Box<AsyncTask>, TaskError)> {
        if let Err(err) = task.check() {
            return Err((task, err));
        }
        if self.store.size() == 0 {
            return Err((task, TaskError::Placement("provider store is empty".into())));
        }
        let providers = self.store.values();
        dynamic_submit(task, &providers, None, SELECTION_TIMEOUT).await
    }

    fn rate_tick(&self) {
        self.store.rate_tick();
    }
}
