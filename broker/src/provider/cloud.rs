//! Optional cloud runner: a rate-limited fallback that executes Wasip1
//! tasks on an external HTTP function instead of a connected provider.
//!
//! The runner mimics a provider's acceptor: it posts readiness on an
//! unbuffered inbox only while its own concurrency semaphore has permits,
//! so dynamic submission treats the cloud as just another sink.

use std::sync::Arc;

use log::{error, info};
use prost::Message;
use tokio::sync::Semaphore;

use super::inbox::{self, Inbox, InboxReceiver};
use super::task::TaskError;
use wasimoff_types::task::wasip1;
use wasimoff_types::{TaskRequest, TaskResponse};

#[derive(Clone, Debug)]
pub struct CloudConfig {
    /// Path to a file holding the bearer token for the function, if any.
    pub credentials: Option<String>,
    /// URL of the HTTP function accepting serialized Wasip1 requests.
    pub function: String,
    /// Maximum simultaneous invocations.
    pub concurrency: usize,
}

/// Start the runner loop and return its submit inbox.
pub fn spawn(config: CloudConfig) -> Arc<Inbox> {
    let (inbox, inbox_rx) = inbox::channel();
    tokio::spawn(run(config, inbox.clone(), inbox_rx));
    inbox
}

async fn run(config: CloudConfig, inbox: Arc<Inbox>, mut inbox_rx: InboxReceiver) {
    let client = reqwest::Client::new();
    let token: Option<String> = config
        .credentials
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .map(|t| t.trim().to_string());
    let limiter = Arc::new(Semaphore::new(config.concurrency));
    info!("cloud runner ready: {} ({} concurrent)", config.function, config.concurrency);

    loop {
        let permit = limiter
            .clone()
            .acquire_owned()
            .await
            .expect("cloud limiter closed");
        inbox.post_ready();

        let Some(mut task) = inbox_rx.recv().await else {
            error!("cloud submit channel closed");
            return;
        };
        if let Err(err) = task.check() {
            task.error = Some(err);
            task.finish();
            continue; // permit drops, capacity is free again
        }

        let client = client.clone();
        let function = config.function.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let TaskRequest::Wasip1(request) = task.request.clone() else {
                task.error = Some(TaskError::Cloud("only wasip1 tasks can be offloaded".into()));
                task.finish();
                drop(permit);
                return;
            };
            let ctx = task.ctx.clone();
            tokio::select! {
                result = invoke(&client, &function, token.as_deref(), &request) => match result {
                    Ok(response) => task.response = TaskResponse::Wasip1(response),
                    Err(err) => task.error = Some(err),
                },
                _ = ctx.cancelled() => task.error = Some(TaskError::Cancelled),
            }
            task.finish();
            drop(permit);
        });
    }
}

/// POST the serialized request to the function and parse the body into a
/// response message.
async fn invoke(
    client: &reqwest::Client,
    function: &str,
    token: Option<&str>,
    request: &wasip1::Request,
) -> Result<wasip1::Response, TaskError> {
    let mut post = client
        .post(function)
        .header(http::header::CONTENT_TYPE, "application/proto")
        .body(request.encode_to_vec());
    if let Some(token) = token {
        post = post.bearer_auth(token);
    }

    let response = post
        .send()
        .await
        .map_err(|e| TaskError::Cloud(format!("request failed: {e}")))?;
    if !response.status().is_success() {
        return Err(TaskError::Cloud(format!("function status {}", response.status())));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| TaskError::Cloud(format!("reading body failed: {e}")))?;
    wasip1::Response::decode(&body[..])
        .map_err(|e| TaskError::Cloud(format!("unmarshalling response failed: {e}")))
}
