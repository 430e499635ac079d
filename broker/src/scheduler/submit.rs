//! Dynamic multi-way submission: hand a task to exactly one of N
//! rendezvous inboxes, with an optional cloud sink and a timeout.
//!
//! The native dynamic select of the original design is restated here as a
//! race over inbox readiness claims: each inbox posts a readiness permit
//! only while its receiver is blocked on receive, so claiming a permit is
//! the rendezvous and the subsequent handoff cannot block. Dropped losing
//! claim futures return their permits, so the task is delivered at most
//! once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{select_all, BoxFuture, FutureExt};
use rand::seq::SliceRandom;

use crate::provider::inbox::Inbox;
use crate::provider::task::{AsyncTask, TaskError};
use crate::provider::Provider;

/// Try to submit the task to one of the candidates' inboxes or the cloud
/// inbox. Candidates are tried non-blocking first in uniformly random
/// order; only then does the cloud sink join a blocking race bounded by
/// `timeout`. The scheduled timestamp is set on exit regardless of
/// outcome; on failure the task is handed back to the caller.
pub async fn dynamic_submit(
    mut task: Box<AsyncTask>,
    providers: &[Arc<Provider>],
    cloud: Option<&Arc<Inbox>>,
    timeout: Duration,
) -> Result<(), (Box<AsyncTask>, TaskError)> {
    let mut order: Vec<usize> = (0..providers.len()).collect();
    order.shuffle(&mut rand::thread_rng());

    // first pass: any provider immediately ready wins before the cloud is
    // even considered
    for &i in &order {
        if providers[i].inbox().try_claim() {
            task.scheduled = Some(Instant::now());
            match providers[i].inbox().send_claimed(task) {
                Ok(()) => return Ok(()),
                // provider closed between claim and handoff
                Err(returned) => task = returned,
            }
        }
    }

    // blocking race over all candidate inboxes, now including the cloud;
    // `None` marks the cloud case
    let mut cases: Vec<BoxFuture<'static, Option<usize>>> = order
        .iter()
        .map(|&i| {
            let inbox = providers[i].inbox().clone();
            async move {
                inbox.claim().await;
                Some(i)
            }
            .boxed()
        })
        .collect();
    if let Some(cloud) = cloud {
        let cloud = cloud.clone();
        cases.push(
            async move {
                cloud.claim().await;
                None
            }
            .boxed(),
        );
    }

    let ctx = task.ctx.clone();
    if cases.is_empty() {
        // nothing to rendezvous with; wait out the timeout so the caller
        // can re-read the registry
        tokio::select! {
            _ = ctx.cancelled() => {
                task.scheduled = Some(Instant::now());
                return Err((task, TaskError::Cancelled));
            }
            _ = tokio::time::sleep(timeout) => {
                task.scheduled = Some(Instant::now());
                return Err((task, TaskError::Placement("no candidates ready".into())));
            }
        }
    }

    tokio::select! {
        (winner, _, _) = select_all(cases) => {
            task.scheduled = Some(Instant::now());
            match winner {
                Some(i) => match providers[i].inbox().send_claimed(task) {
                    Ok(()) => Ok(()),
                    Err(returned) => Err((
                        returned,
                        TaskError::Placement("provider closed during submission".into()),
                    )),
                },
                None => {
                    let cloud = cloud.expect("cloud case implies cloud inbox");
                    task.cloud_offloaded = true;
                    match cloud.send_claimed(task) {
                        Ok(()) => Ok(()),
                        Err(mut returned) => {
                            returned.cloud_offloaded = false;
                            Err((
                                returned,
                                TaskError::Placement("cloud runner closed".into()),
                            ))
                        }
                    }
                }
            }
        }
        _ = ctx.cancelled() => {
            task.scheduled = Some(Instant::now());
            Err((task, TaskError::Cancelled))
        }
        _ = tokio::time::sleep(timeout) => {
            task.scheduled = Some(Instant::now());
            Err((task, TaskError::Placement("submission timed out".into())))
        }
    }
}
