//! Task queue, selector policies and the dispatcher.

pub mod dispatcher;

mod any_free;
mod round_robin;
mod simple_match;
mod submit;

pub use self::any_free::AnyFreeSelector;
pub use self::dispatcher::{backoff, dispatcher, DISPATCHER_CONCURRENCY};
pub use self::round_robin::RoundRobinSelector;
pub use self::simple_match::SimpleMatchSelector;
pub use self::submit::dynamic_submit;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::provider::task::{AsyncTask, TaskError};

/// Capacity of the process-wide task queue.
pub const TASK_QUEUE_CAPACITY: usize = 2048;

/// Per-attempt selection timeout, after which the registry is re-read to
/// observe new providers or freed slots.
pub const SELECTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Producer handle of the bounded task queue shared by all client
/// handlers. The dispatcher is the sole consumer.
#[derive(Clone)]
pub struct TaskQueue {
    queue: mpsc::Sender<Box<AsyncTask>>,
}

impl TaskQueue {
    pub fn new() -> (Self, mpsc::Receiver<Box<AsyncTask>>) {
        Self::with_capacity(TASK_QUEUE_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Box<AsyncTask>>) {
        let (queue, rx) = mpsc::channel(capacity);
        (Self { queue }, rx)
    }

    /// Non-blocking submit. On overflow the task is failed with
    /// `QueueFull` and its done sink is signaled immediately.
    pub fn submit(&self, task: Box<AsyncTask>) {
        match self.queue.try_send(task) {
            Ok(()) => {}
            Err(TrySendError::Full(mut task)) | Err(TrySendError::Closed(mut task)) => {
                task.error = Some(TaskError::QueueFull);
                task.finish();
            }
        }
    }
}

/// A concrete scheduler selects suitable providers for a task and submits
/// it to one of their inboxes.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Try to place the task. On success the task has been handed to a
    /// provider (or the cloud runner) which will signal the done sink; on
    /// failure the task is returned to the caller for a retry decision.
    async fn schedule(&self, task: Box<AsyncTask>) -> Result<(), (Box<AsyncTask>, TaskError)>;

    /// Called once per successfully completed task to measure throughput.
    fn rate_tick(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use wasimoff_types::TaskRequest;

    #[tokio::test]
    async fn queue_full_rejection_signals_done_once() {
        let (queue, _rx) = TaskQueue::with_capacity(1);
        let (done_tx, mut done_rx) = mpsc::channel(8);

        // first one fits, second overflows without blocking
        queue.submit(AsyncTask::new(
            CancellationToken::new(),
            TaskRequest::Wasip1(Default::default()),
            done_tx.clone(),
        ));
        queue.submit(AsyncTask::new(
            CancellationToken::new(),
            TaskRequest::Wasip1(Default::default()),
            done_tx,
        ));

        let rejected = done_rx.recv().await.expect("rejected task");
        assert!(matches!(rejected.error, Some(TaskError::QueueFull)));
        assert!(done_rx.try_recv().is_err(), "only the overflowing task is signaled");
    }
}
