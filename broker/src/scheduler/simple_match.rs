use std::sync::Arc;

use async_trait::async_trait;

use crate::provider::store::ProviderStore;
use crate::provider::task::{AsyncTask, TaskError};
use crate::provider::Provider;

use super::{dynamic_submit, Scheduler, SELECTION_TIMEOUT};

/// Default selection policy: yield providers that hold every file the task
/// requires, preferring ones with free worker slots.
pub struct SimpleMatchSelector {
    store: Arc<ProviderStore>,
}

impl SimpleMatchSelector {
    pub fn new(store: Arc<ProviderStore>) -> Self {
        Self { store }
    }

    fn select_candidates(&self, task: &AsyncTask) -> Vec<Arc<Provider>> {
        let required = task.request.required_files();

        // keep providers that hold every required ref
        let matching: Vec<Arc<Provider>> = self
            .store
            .values()
            .into_iter()
            .filter(|p| required.iter().all(|file| p.has(file)))
            .collect();

        // prefer ones with free capacity or a waiting acceptor
        let preferred: Vec<Arc<Provider>> = matching
            .iter()
            .filter(|p| p.current_tasks() < p.current_limit() || p.waiting())
            .cloned()
            .collect();

        if preferred.is_empty() {
            matching
        } else {
            preferred
        }
    }
}

#[async_trait]
impl Scheduler for SimpleMatchSelector {
    async fn schedule(&self, mut task: Box<AsyncTask>) -> Result<(), (Box<AsyncTask>, TaskError)> {
        loop {
            if let Err(err) = task.check() {
                return Err((task, err));
            }

            let candidates = self.select_candidates(&task);
            let cloud = if self.store.can_cloud_offload(&task) {
                self.store.cloud_inbox()
            } else {
                None
            };

            match dynamic_submit(task, &candidates, cloud, SELECTION_TIMEOUT).await {
                Ok(()) => return Ok(()),
                // per-attempt timeout with the task still alive: re-read
                // the registry to pick up new providers or freed slots
                Err((returned, TaskError::Placement(_))) if !returned.ctx.is_cancelled() => {
                    task = returned;
                }
                Err((returned, err)) => return Err((returned, err)),
            }
        }
    }

    fn rate_tick(&self) {
        self.store.rate_tick();
    }
}
