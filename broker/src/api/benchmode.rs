//! Benchmode: an internal load generator that keeps `n` synthetic tsp
//! tasks in flight, for measuring scheduler throughput without external
//! clients.

use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use wasimoff_types::task::{wasip1, Metadata};
use wasimoff_types::{File, TaskRequest};

use crate::provider::task::AsyncTask;

use super::AppState;

const BENCH_BINARY: &str = "tsp.wasm";

/// Continuously schedule `tsp rand 10` tasks with bounded in-flight count.
/// Waits for someone to upload the binary first.
pub async fn tsp_flood(state: Arc<AppState>, parallel: usize) {
    if parallel == 0 {
        return;
    }

    info!("BENCHMODE: please upload {BENCH_BINARY:?} to begin");
    let mut binary = File::by_ref(BENCH_BINARY);
    loop {
        if state.store.storage.get(BENCH_BINARY).is_some() {
            // rewrite the name to the canonical ref before flooding
            state
                .store
                .storage
                .resolve_file(&mut binary)
                .expect("binary was just found in storage");
            info!("BENCHMODE: required binary uploaded, let's go ...");
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    // tickets bound the number of tasks in flight; completions return them
    let tickets = Arc::new(Semaphore::new(parallel));
    let (done_tx, mut done_rx) = mpsc::channel::<Box<AsyncTask>>(parallel.max(1));
    {
        let tickets = tickets.clone();
        tokio::spawn(async move {
            while done_rx.recv().await.is_some() {
                tickets.add_permits(1);
            }
        });
    }

    let mut index: u64 = 0;
    loop {
        tickets
            .acquire()
            .await
            .expect("ticket semaphore closed")
            .forget();
        let request = wasip1::Request {
            info: Some(Metadata {
                id: Some(format!("benchmode/{index}")),
                ..Default::default()
            }),
            qos: None,
            params: Some(wasip1::Params {
                binary: Some(binary.clone()),
                args: vec![BENCH_BINARY.into(), "rand".into(), "10".into()],
                ..Default::default()
            }),
        };
        state.rpc.queue().submit(AsyncTask::new(
            CancellationToken::new(),
            TaskRequest::Wasip1(request),
            done_tx.clone(),
        ));
        index += 1;
    }
}
