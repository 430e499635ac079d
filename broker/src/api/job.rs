//! Job fan-out: generate N tasks from a shared parent spec, dispatch them
//! through the queue and collect all results.

use log::debug;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wasimoff_types::task::{wasip1, Metadata};
use wasimoff_types::TaskRequest;
use wasimoff_types::TaskResponse;

use crate::provider::task::AsyncTask;

use super::rpc::{ApiError, RpcServer};

/// Dispatch every task of a job request and wait for all of them. Resolve
/// failures abort the whole job before anything is queued; individual task
/// failures only fail their slot in the response.
pub async fn dispatch_job(
    rpc: &RpcServer,
    ctx: CancellationToken,
    mut job: wasip1::JobRequest,
    requester: &str,
) -> Result<wasip1::JobResponse, ApiError> {
    let job_id = rpc.next_job_id();
    let storage = &rpc.store().storage;

    // resolve file arguments in the parent and every task spec up front
    let mut resolve_errors = Vec::new();
    if let Some(parent) = job.parent.as_mut() {
        if let Err(e) = storage.resolve_params(parent) {
            resolve_errors.push(format!("parent: {e}"));
        }
    }
    for (i, spec) in job.tasks.iter_mut().enumerate() {
        if let Err(e) = storage.resolve_params(spec) {
            resolve_errors.push(format!("task {i}: {e}"));
        }
    }
    if !resolve_errors.is_empty() {
        return Ok(wasip1::JobResponse {
            error: Some(resolve_errors.join("; ")),
            ..Default::default()
        });
    }

    // one shared done channel, large enough that no completion can block
    let count = job.tasks.len();
    let (done_tx, mut done_rx) = mpsc::channel(count.max(1) + 10);
    let parent = job.parent.take();

    for (i, spec) in job.tasks.drain(..).enumerate() {
        let request = wasip1::Request {
            info: Some(Metadata {
                id: Some(format!("{job_id}/{i}")),
                requester: Some(requester.to_string()),
                ..Default::default()
            }),
            qos: job.qos.clone(),
            params: Some(spec.inherit_unset(parent.as_ref())),
        };
        let task = AsyncTask::new(ctx.clone(), TaskRequest::Wasip1(request), done_tx.clone());
        rpc.queue().submit(task);
    }
    drop(done_tx);

    // collect completions in whatever order they arrive
    let mut slots: Vec<Option<wasip1::Response>> = vec![None; count];
    for _ in 0..count {
        let Some(task) = done_rx.recv().await else { break };
        let index = task
            .id()
            .rsplit('/')
            .next()
            .and_then(|i| i.parse::<usize>().ok());
        let response = match (task.error, task.response) {
            (Some(err), _) => wasip1::Response {
                result: Some(wasip1::response::Result::Error(err.to_string())),
                ..Default::default()
            },
            (None, TaskResponse::Wasip1(response)) => response,
            (None, _) => wasip1::Response {
                result: Some(wasip1::response::Result::Error("unexpected result type".into())),
                ..Default::default()
            },
        };
        match index {
            Some(index) if index < count => slots[index] = Some(response),
            _ => debug!("job {job_id}: completion with unparsable id"),
        }
    }

    Ok(wasip1::JobResponse {
        info: Some(Metadata { id: Some(job_id), ..Default::default() }),
        error: None,
        tasks: slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| wasip1::Response {
                    result: Some(wasip1::response::Result::Error("task result missing".into())),
                    ..Default::default()
                })
            })
            .collect(),
    })
}
