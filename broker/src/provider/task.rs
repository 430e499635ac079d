use std::time::Instant;

use log::debug;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wasimoff_types::{TaskRequest, TaskResponse};

/// Internal errors of a task's life in the broker, as opposed to the
/// application-level error a response may carry. The dispatcher's retry
/// decisions key off these variants.
#[derive(Clone, Debug, Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task queue is full")]
    QueueFull,
    #[error("placement: {0}")]
    Placement(String),
    #[error("provider rpc: {0}")]
    Rpc(String),
    #[error("cloud offload: {0}")]
    Cloud(String),
    #[error("all retries failed: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Joined(Vec<TaskError>),
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// The unit of scheduling: a concrete request with its response slot, a
/// cancellation handle tied to the client connection, and the done sink on
/// which completion is signaled exactly once.
///
/// Ownership of the boxed task moves linearly through the system: client
/// handler → queue → dispatcher → provider (or cloud) worker → back through
/// the done sink. Whoever holds the box mutates it; there is no shared
/// state to lock.
#[derive(Debug)]
pub struct AsyncTask {
    pub ctx: CancellationToken,
    pub request: TaskRequest,
    pub response: TaskResponse,

    /// Internal broker-side error; `None` for clean completions, even ones
    /// whose response carries an application error.
    pub error: Option<TaskError>,

    pub cloud_offloaded: bool,
    /// Name of the provider this task was last assigned to.
    pub provider: Option<String>,

    pub created: Instant,
    pub scheduled: Option<Instant>,

    done: mpsc::Sender<Box<AsyncTask>>,
}

impl AsyncTask {
    /// The done channel must be buffered so that completion never blocks
    /// the signaling worker.
    pub fn new(
        ctx: CancellationToken,
        request: TaskRequest,
        done: mpsc::Sender<Box<AsyncTask>>,
    ) -> Box<Self> {
        assert!(done.max_capacity() >= 1, "done channel must be buffered");
        let response = TaskResponse::empty_for(request.kind());
        Box::new(Self {
            ctx,
            request,
            response,
            error: None,
            cloud_offloaded: false,
            provider: None,
            created: Instant::now(),
            scheduled: None,
            done,
        })
    }

    pub fn id(&self) -> String {
        self.request.id().to_string()
    }

    /// Prerequisites before any placement attempt.
    pub fn check(&self) -> Result<(), TaskError> {
        if self.ctx.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        Ok(())
    }

    /// Replace the done sink with another channel, returning the previous
    /// one. The dispatcher uses this to observe completion before the
    /// original waiter does.
    pub fn intercept(&mut self, sink: mpsc::Sender<Box<AsyncTask>>) -> mpsc::Sender<Box<AsyncTask>> {
        std::mem::replace(&mut self.done, sink)
    }

    /// Signal completion by sending the task to its done sink. Consuming
    /// the box makes a second signal impossible by construction.
    pub fn finish(self: Box<Self>) {
        let done = self.done.clone();
        if let Err(err) = done.try_send(self) {
            // sink full would be a broken capacity invariant; a closed
            // sink just means the waiter has gone away
            debug!("done sink rejected completed task: {err}");
        }
    }
}
