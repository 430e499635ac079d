use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// A semaphore whose limit can change while permits are held. Peers
/// advertise their worker pool size at runtime; shrinking below the
/// current in-flight count is allowed and simply blocks new acquires
/// until enough permits return.
///
/// A fixed-capacity channel cannot model this, hence the counter plus
/// condition variable.
pub struct ResizableSemaphore {
    state: Mutex<State>,
    notify: Notify,
}

struct State {
    count: usize,
    limit: usize,
}

/// An acquired worker slot, released on drop so that every exit path
/// (success, error, cancel, panic) returns it.
pub struct WorkerPermit {
    semaphore: Arc<ResizableSemaphore>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

impl ResizableSemaphore {
    pub fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State { count: 0, limit }),
            notify: Notify::new(),
        })
    }

    /// Wait until a slot is free under the current limit.
    pub async fn acquire_owned(self: Arc<Self>) -> WorkerPermit {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register for wakeups before checking, so a release between
            // the check and the await is not lost
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().expect("semaphore lock");
                if state.count < state.limit {
                    state.count += 1;
                    break;
                }
            }
            notified.await;
        }
        WorkerPermit { semaphore: self }
    }

    pub fn try_acquire_owned(self: &Arc<Self>) -> Option<WorkerPermit> {
        let mut state = self.state.lock().expect("semaphore lock");
        if state.count < state.limit {
            state.count += 1;
            Some(WorkerPermit { semaphore: self.clone() })
        } else {
            None
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().expect("semaphore lock");
        state.count = state.count.saturating_sub(1);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Atomically change the limit. Growing wakes blocked acquirers.
    pub fn resize(&self, limit: usize) {
        let mut state = self.state.lock().expect("semaphore lock");
        state.limit = limit;
        drop(state);
        self.notify.notify_waiters();
    }

    /// Currently held permits, i.e. in-flight tasks.
    pub fn count(&self) -> usize {
        self.state.lock().expect("semaphore lock").count
    }

    pub fn limit(&self) -> usize {
        self.state.lock().expect("semaphore lock").limit
    }
}
