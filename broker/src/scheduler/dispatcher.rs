//! The dispatcher consumes the task queue and drives each task through
//! placement, retries with backoff, and final completion delivery.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, Semaphore};

use crate::provider::store::ProviderStore;
use crate::provider::task::{AsyncTask, TaskError};

use super::Scheduler;

/// Default bound on tasks concurrently *trying to place* (not in-flight).
pub const DISPATCHER_CONCURRENCY: usize = 32;

/// Maximum placement/RPC attempts per task.
const MAX_ATTEMPTS: usize = 10;

/// Backoff before retry `i`: `3.162 · e^(i/1.737)` milliseconds, roughly
/// 5 ms up to half a second over nine retries.
pub fn backoff(attempt: usize) -> Duration {
    Duration::from_secs_f64(3.162 * (attempt as f64 / 1.737).exp() / 1000.0)
}

/// Consume the task queue forever, handling every task in its own
/// concurrent unit while a ticket pool bounds simultaneous placement.
pub async fn dispatcher(
    store: Arc<ProviderStore>,
    selector: Arc<dyn Scheduler>,
    concurrency: usize,
    mut queue: mpsc::Receiver<Box<AsyncTask>>,
) {
    let tickets = Arc::new(Semaphore::new(concurrency));
    while let Some(task) = queue.recv().await {
        let ticket = tickets
            .clone()
            .acquire_owned()
            .await
            .expect("ticket pool closed");
        tokio::spawn(handle_task(
            store.clone(),
            selector.clone(),
            tickets.clone(),
            ticket,
            task,
        ));
    }
    debug!("task queue closed, dispatcher exits");
}

async fn handle_task(
    store: Arc<ProviderStore>,
    selector: Arc<dyn Scheduler>,
    tickets: Arc<Semaphore>,
    ticket: tokio::sync::OwnedSemaphorePermit,
    mut task: Box<AsyncTask>,
) {
    // observe completion before the original waiter does
    let (intercept_tx, mut intercept_rx) = mpsc::channel(1);
    let original = task.intercept(intercept_tx);

    let mut ticket = Some(ticket);
    let mut errors: Vec<TaskError> = Vec::new();
    let mut slot = Some(task);
    let mut success = false;

    for attempt in 1..=MAX_ATTEMPTS {
        if attempt > 1 {
            // back off without holding a ticket, then re-acquire one so
            // the pool bounds retries exactly like first attempts
            tokio::time::sleep(backoff(attempt - 1)).await;
            ticket = Some(
                tickets
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("ticket pool closed"),
            );
        }

        let current = slot.take().expect("task slot");
        let id = current.id();
        let result = selector.schedule(current).await;
        drop(ticket.take());

        match result {
            Err((returned, err)) => {
                let cancelled = err.is_cancelled() || returned.ctx.is_cancelled();
                errors.push(err.clone());
                slot = Some(returned);
                if cancelled {
                    break;
                }
                warn!("RETRY: schedule {id} failed ({attempt}): {err}");
            }
            Ok(()) => {
                let mut completed = intercept_rx
                    .recv()
                    .await
                    .expect("intercepted completion signal");
                match completed.error.take() {
                    None => {
                        // clean completion; an application-level error in
                        // the response is the client's responsibility and
                        // is never retried
                        slot = Some(completed);
                        success = true;
                        break;
                    }
                    Some(err) if err.is_cancelled() => {
                        errors.push(err);
                        slot = Some(completed);
                        break;
                    }
                    Some(err) => {
                        warn!("RETRY: task {id} failed ({attempt}): {err}");
                        errors.push(err);
                        slot = Some(completed);
                    }
                }
            }
        }
    }

    let mut task = slot.expect("task slot after retries");
    if success {
        selector.rate_tick();
    } else {
        task.error = Some(if errors.len() == 1 {
            errors.remove(0)
        } else {
            TaskError::Joined(errors)
        });
    }
    store.observe(&task);

    // forward the completion on the original sink
    task.intercept(original);
    task.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TaskQueue;
    use crate::storage::FileStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;
    use wasimoff_types::TaskRequest;

    /// Fails the first `fail` schedule calls, then completes tasks
    /// successfully in-line.
    struct FlakySelector {
        fail: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Scheduler for FlakySelector {
        async fn schedule(
            &self,
            task: Box<AsyncTask>,
        ) -> Result<(), (Box<AsyncTask>, TaskError)> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail {
                return Err((task, TaskError::Rpc("transient".into())));
            }
            task.finish();
            Ok(())
        }
    }

    /// Always completes tasks with a cancellation error.
    struct CancellingSelector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Scheduler for CancellingSelector {
        async fn schedule(
            &self,
            mut task: Box<AsyncTask>,
        ) -> Result<(), (Box<AsyncTask>, TaskError)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            task.error = Some(TaskError::Cancelled);
            task.finish();
            Ok(())
        }
    }

    fn start_dispatcher(selector: Arc<dyn Scheduler>) -> TaskQueue {
        let store = ProviderStore::new(FileStorage::in_memory(), None);
        let (queue, rx) = TaskQueue::with_capacity(64);
        tokio::spawn(dispatcher(store, selector, 4, rx));
        queue
    }

    fn make_task() -> (Box<AsyncTask>, mpsc::Receiver<Box<AsyncTask>>) {
        let (tx, rx) = mpsc::channel(1);
        (
            AsyncTask::new(CancellationToken::new(), TaskRequest::Wasip1(Default::default()), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let selector = Arc::new(FlakySelector { fail: 3, calls: AtomicUsize::new(0) });
        let queue = start_dispatcher(selector.clone());

        let (task, mut done) = make_task();
        queue.submit(task);

        let completed = done.recv().await.expect("completion");
        assert!(completed.error.is_none(), "task completes cleanly after retries");
        assert_eq!(selector.calls.load(Ordering::SeqCst), 4);
        assert!(done.try_recv().is_err(), "exactly one completion signal");
    }

    #[tokio::test]
    async fn errors_join_after_exhausted_retries() {
        let selector = Arc::new(FlakySelector { fail: usize::MAX, calls: AtomicUsize::new(0) });
        let queue = start_dispatcher(selector.clone());

        let (task, mut done) = make_task();
        queue.submit(task);

        let completed = done.recv().await.expect("completion");
        match completed.error {
            Some(TaskError::Joined(errors)) => assert_eq!(errors.len(), 10),
            other => panic!("expected joined errors, got {other:?}"),
        }
        assert_eq!(selector.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn cancellation_is_terminal() {
        let selector = Arc::new(CancellingSelector { calls: AtomicUsize::new(0) });
        let queue = start_dispatcher(selector.clone());

        let (task, mut done) = make_task();
        queue.submit(task);

        let completed = done.recv().await.expect("completion");
        assert!(matches!(completed.error, Some(TaskError::Cancelled)));
        assert_eq!(
            selector.calls.load(Ordering::SeqCst),
            1,
            "no further schedule attempts after observing the cancel"
        );
    }

    #[test]
    fn backoff_matches_the_curve() {
        let mut previous = Duration::ZERO;
        for attempt in 1..=9 {
            let expected = 3.162 * (attempt as f64 / 1.737).exp() / 1000.0;
            let actual = backoff(attempt).as_secs_f64();
            assert!(
                (actual - expected).abs() <= expected * 0.05,
                "attempt {attempt}: {actual} vs {expected}"
            );
            assert!(backoff(attempt) > previous, "backoff grows monotonically");
            previous = backoff(attempt);
        }
    }
}
