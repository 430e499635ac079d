//! End-to-end tests driving a real broker over real sockets, with fake
//! provider runtimes speaking the provider protocol through the client
//! crate's messenger.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use prost::Message;
use tokio::sync::mpsc;
use tokio::time::timeout;

use wasimoff_broker::api::{self, AppState, RpcServer};
use wasimoff_broker::config::Configuration;
use wasimoff_broker::provider::cloud::CloudConfig;
use wasimoff_broker::provider::store::ProviderStore;
use wasimoff_broker::scheduler::{self, SimpleMatchSelector, TaskQueue};
use wasimoff_broker::storage::FileStorage;

use wasimoff_client::{Client, WsMessenger};
use wasimoff_types::codec::Encoding;
use wasimoff_types::envelope::{event_body, request, response};
use wasimoff_types::task::wasip1;
use wasimoff_types::{event, filesystem, File, Ping};

const WASM_BLOB: &[u8] = b"\0asm\x01\x00\x00\x00 hello binary";
const HELLO: &[u8] = b"Hello, World!\n";

async fn start_broker(cloud: Option<CloudConfig>) -> SocketAddr {
    let store = ProviderStore::new(FileStorage::in_memory(), cloud);
    let (queue, queue_rx) = TaskQueue::new();
    let selector = Arc::new(SimpleMatchSelector::new(store.clone()));
    tokio::spawn(scheduler::dispatcher(
        store.clone(),
        selector,
        scheduler::DISPATCHER_CONCURRENCY,
        queue_rx,
    ));

    let state = Arc::new(AppState {
        rpc: RpcServer::new(store.clone(), queue),
        store,
        config: Configuration::parse_from(["wasimoff-broker"]),
    });
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

struct FakeProvider {
    messenger: Arc<WsMessenger>,
    /// Broker events observed by this provider.
    events: mpsc::Receiver<event_body::Body>,
    /// Task ids of RunWasip1 calls as they start executing.
    started: mpsc::Receiver<String>,
}

/// Connect a scripted provider runtime: announces itself, lists `files`,
/// optionally accepts file uploads, and answers Wasip1 runs with a hello
/// output after `run_delay`.
async fn connect_provider(
    addr: SocketAddr,
    name: &str,
    workers: u32,
    files: Vec<String>,
    accept_uploads: bool,
    run_delay: Duration,
) -> FakeProvider {
    let url = format!("ws://{addr}/api/provider/ws");
    let messenger = WsMessenger::connect(&url, Encoding::Protobuf).await.unwrap();
    messenger
        .send_event(event_body::Body::ProviderHello(event::ProviderHello {
            name: Some(name.to_string()),
            useragent: Some("fake-provider/1".to_string()),
        }))
        .await
        .unwrap();
    messenger
        .send_event(event_body::Body::ProviderResources(event::ProviderResources {
            concurrency: Some(workers),
            memory: None,
        }))
        .await
        .unwrap();

    let mut requests = messenger.take_requests().unwrap();
    let events = messenger.take_events().unwrap();
    let (started_tx, started) = mpsc::channel(16);
    let held: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(files.into_iter().collect()));

    tokio::spawn(async move {
        while let Some(incoming) = requests.recv().await {
            let (body, responder) = incoming.split();
            let held = held.clone();
            let started_tx = started_tx.clone();
            tokio::spawn(async move {
                match body {
                    request::Body::Ping(_) => {
                        responder.respond(Ok(response::Body::Pong(Ping {}))).await;
                    }
                    request::Body::ListFiles(_) => {
                        let files = held.lock().unwrap().iter().cloned().collect();
                        responder
                            .respond(Ok(response::Body::ListFiles(
                                filesystem::listing::Response { files },
                            )))
                            .await;
                    }
                    request::Body::ProbeFile(probe) => {
                        let ok = probe
                            .file
                            .map(|f| held.lock().unwrap().contains(&f))
                            .unwrap_or(false);
                        responder
                            .respond(Ok(response::Body::ProbeFile(
                                filesystem::probe::Response { ok },
                            )))
                            .await;
                    }
                    request::Body::UploadFile(upload) => {
                        if !accept_uploads {
                            responder.respond(Err("upload rejected".into())).await;
                            return;
                        }
                        let r#ref = upload
                            .upload
                            .and_then(|f| f.r#ref)
                            .unwrap_or_default();
                        held.lock().unwrap().insert(r#ref.clone());
                        responder
                            .respond(Ok(response::Body::UploadFile(
                                filesystem::upload::Response { r#ref: Some(r#ref) },
                            )))
                            .await;
                    }
                    request::Body::RunWasip1(run) => {
                        let id = run
                            .info
                            .as_ref()
                            .and_then(|i| i.id.clone())
                            .unwrap_or_default();
                        let _ = started_tx.send(id).await;
                        tokio::time::sleep(run_delay).await;
                        responder
                            .respond(Ok(response::Body::RunWasip1(wasip1::Response {
                                info: run.info.clone(),
                                result: Some(wasip1::response::Result::Ok(wasip1::Output {
                                    status: Some(0),
                                    stdout: HELLO.to_vec(),
                                    ..Default::default()
                                })),
                            })))
                            .await;
                    }
                    _ => responder.respond(Err("unsupported request".into())).await,
                }
            });
        }
    });

    // let the broker process the hello and resources events before any
    // task placement depends on the advertised worker count
    tokio::time::sleep(Duration::from_millis(100)).await;

    FakeProvider { messenger, events, started }
}

fn run_request(binary: &str) -> wasip1::Request {
    wasip1::Request {
        params: Some(wasip1::Params {
            binary: Some(File::by_ref(binary)),
            args: vec![binary.to_string()],
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn upload_and_exec_roundtrip() {
    let addr = start_broker(None).await;
    let provider = connect_provider(addr, "P1", 2, vec![], true, Duration::ZERO).await;

    let client = Client::connect(&format!("ws://{addr}/api/client/ws"), Encoding::Protobuf)
        .await
        .unwrap();

    let r#ref = client
        .upload("hello.wasm", "application/wasm", WASM_BLOB.to_vec())
        .await
        .unwrap();
    assert!(r#ref.starts_with("sha256:") && r#ref.len() == 71, "ref: {}", r#ref);

    // run by friendly name; resolution rewrites it to the canonical ref
    let response = timeout(Duration::from_secs(10), client.run_wasip1(run_request("hello.wasm")))
        .await
        .expect("task completes in time")
        .unwrap();
    match response.result {
        Some(wasip1::response::Result::Ok(output)) => {
            assert_eq!(output.status, Some(0));
            assert_eq!(output.stdout, HELLO);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(
        response.info.as_ref().and_then(|i| i.provider.as_deref()),
        Some("P1")
    );

    client.close();
    provider.messenger.close();
}

#[tokio::test]
async fn placement_respects_provider_file_sets() {
    let addr = start_broker(None).await;
    // P1 refuses uploads and thus never holds the binary
    let p1 = connect_provider(addr, "P1", 4, vec![], false, Duration::ZERO).await;
    let p2 = connect_provider(addr, "P2", 4, vec![], true, Duration::ZERO).await;

    let client = Client::connect(&format!("ws://{addr}/api/client/ws"), Encoding::Protobuf)
        .await
        .unwrap();
    let r#ref = client
        .upload("needle.wasm", "application/wasm", WASM_BLOB.to_vec())
        .await
        .unwrap();

    for _ in 0..25 {
        let response = timeout(Duration::from_secs(10), client.run_wasip1(run_request(&r#ref)))
            .await
            .expect("task completes in time")
            .unwrap();
        assert_eq!(
            response.info.as_ref().and_then(|i| i.provider.as_deref()),
            Some("P2"),
            "every task must land on the provider holding the file"
        );
    }

    client.close();
    p1.messenger.close();
    p2.messenger.close();
}

#[tokio::test]
async fn client_cancellation_reaches_the_provider() {
    let addr = start_broker(None).await;
    // tasks on this provider never finish on their own
    let mut provider =
        connect_provider(addr, "P1", 1, vec![], true, Duration::from_secs(600)).await;

    let client = Arc::new(
        Client::connect(&format!("ws://{addr}/api/client/ws"), Encoding::Protobuf)
            .await
            .unwrap(),
    );
    client
        .upload("slow.wasm", "application/wasm", WASM_BLOB.to_vec())
        .await
        .unwrap();

    // fire the task and wait until the provider actually starts it
    let run = {
        let client = client.clone();
        tokio::spawn(async move {
            let _ = client.run_wasip1(run_request("slow.wasm")).await;
        })
    };
    let task_id = timeout(Duration::from_secs(10), provider.started.recv())
        .await
        .expect("task starts in time")
        .expect("started channel");

    // severing the client connection cancels the in-flight task
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close();
    let _ = run.await;

    let cancel = loop {
        let event = timeout(Duration::from_secs(5), provider.events.recv())
            .await
            .expect("cancel event in time")
            .expect("events channel");
        if let event_body::Body::TaskCancel(cancel) = event {
            break cancel;
        }
    };
    assert_eq!(cancel.id.as_deref(), Some(task_id.as_str()));
    assert_eq!(cancel.reason.as_deref(), Some("context canceled"));

    provider.messenger.close();
}

#[tokio::test]
async fn cloud_fallback_for_wasip1_only() {
    // a stand-in for the external function, answering serialized requests
    let function = axum::Router::new().route(
        "/",
        axum::routing::post(|body: bytes::Bytes| async move {
            let request = wasip1::Request::decode(&body[..]).expect("valid request");
            let response = wasip1::Response {
                info: request.info.clone(),
                result: Some(wasip1::response::Result::Ok(wasip1::Output {
                    status: Some(0),
                    stdout: b"from the cloud".to_vec(),
                    ..Default::default()
                })),
            };
            (
                [(http::header::CONTENT_TYPE, "application/proto")],
                response.encode_to_vec(),
            )
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let function_addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, function).await.unwrap() });

    // zero providers, cloud concurrency 1
    let addr = start_broker(Some(CloudConfig {
        credentials: None,
        function: format!("http://{function_addr}/"),
        concurrency: 1,
    }))
    .await;

    let client = Client::connect(&format!("ws://{addr}/api/client/ws"), Encoding::Protobuf)
        .await
        .unwrap();
    let r#ref = client
        .upload("cloudy.wasm", "application/wasm", WASM_BLOB.to_vec())
        .await
        .unwrap();

    let response = timeout(Duration::from_secs(10), client.run_wasip1(run_request(&r#ref)))
        .await
        .expect("cloud task completes in time")
        .unwrap();
    match response.result {
        Some(wasip1::response::Result::Ok(output)) => {
            assert_eq!(output.stdout, b"from the cloud");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // pyodide tasks are not offloadable and keep waiting for a provider
    let pyodide = wasimoff_types::task::pyodide::Request {
        params: Some(wasimoff_types::task::pyodide::Params {
            run: Some(wasimoff_types::task::pyodide::params::Run::Script("1 + 1".into())),
            ..Default::default()
        }),
        ..Default::default()
    };
    let waiting = timeout(Duration::from_millis(500), client.run_pyodide(pyodide)).await;
    assert!(waiting.is_err(), "pyodide must not be offloaded to the cloud");

    client.close();
}

#[tokio::test]
async fn json_websocket_encoding() {
    let addr = start_broker(None).await;
    let provider = connect_provider(addr, "P1", 2, vec![], true, Duration::ZERO).await;

    // same flow as the protobuf roundtrip, negotiated as JSON frames
    let client = Client::connect(&format!("ws://{addr}/api/client/ws"), Encoding::Json)
        .await
        .unwrap();
    let r#ref = client
        .upload("hello.wasm", "application/wasm", WASM_BLOB.to_vec())
        .await
        .unwrap();
    let response = timeout(Duration::from_secs(10), client.run_wasip1(run_request(&r#ref)))
        .await
        .expect("task completes in time")
        .unwrap();
    assert!(matches!(
        response.result,
        Some(wasip1::response::Result::Ok(output)) if output.stdout == HELLO
    ));

    client.close();
    provider.messenger.close();
}

#[tokio::test]
async fn http_surface() {
    let addr = start_broker(None).await;
    let provider = connect_provider(addr, "P1", 2, vec![], true, Duration::ZERO).await;
    let base = format!("http://{addr}");
    let http = reqwest::Client::new();

    // health and version
    let health = http.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "OK\n");
    let version = http.get(format!("{base}/api/version")).send().await.unwrap();
    assert!(version.text().await.unwrap().contains("wasimoff-broker"));

    // storage upload and download
    let uploaded = http
        .post(format!("{base}/api/storage/upload?name=hello.wasm"))
        .header("content-type", "application/wasm")
        .body(WASM_BLOB.to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(uploaded.status(), 200);
    let r#ref = uploaded
        .headers()
        .get("x-wasimoff-ref")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(r#ref.starts_with("sha256:"));

    let download = http
        .get(format!("{base}/api/storage/{}", r#ref))
        .send()
        .await
        .unwrap();
    assert_eq!(download.status(), 200);
    assert_eq!(download.bytes().await.unwrap(), WASM_BLOB);

    let missing = http
        .get(format!("{base}/api/storage/sha256:{}", "0".repeat(64)))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    // the client crate's upload helper speaks the same route
    let helper_ref = wasimoff_client::upload_via_http(&base, "other.wasm", "application/wasm", b"\0asm other".to_vec())
        .await
        .unwrap();
    assert!(helper_ref.starts_with("sha256:"));

    // unsupported media type is rejected
    let rejected = http
        .post(format!("{base}/api/storage/upload"))
        .header("content-type", "text/html")
        .body("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 415);

    // plain http exec with header-mapped arguments
    let exec = http
        .post(format!("{base}/api/client/run/hello.wasm"))
        .header("x-args", "rand 10")
        .header("x-env-trace", "on")
        .body("stdin data")
        .send()
        .await
        .unwrap();
    assert_eq!(exec.status(), 200);
    assert_eq!(exec.headers().get("x-wasimoff-result").unwrap(), "Ok");
    assert_eq!(exec.headers().get("x-wasimoff-status").unwrap(), "0");
    assert_eq!(exec.headers().get("x-wasimoff-provider").unwrap(), "P1");
    assert_eq!(exec.bytes().await.unwrap(), HELLO);

    provider.messenger.close();
}

#[tokio::test]
async fn connect_rpc_accepts_json_and_protobuf() {
    let addr = start_broker(None).await;
    let provider = connect_provider(addr, "P1", 2, vec![], true, Duration::ZERO).await;
    let base = format!("http://{addr}");
    let http = reqwest::Client::new();

    // upload via JSON with a base64 blob
    let upload = serde_json::json!({
        "upload": {
            "ref": "hello.wasm",
            "media": "application/wasm",
            "blob": base64_encode(WASM_BLOB),
        }
    });
    let uploaded = http
        .post(format!("{base}/api/client/wasimoff.v1.Tasks/Upload"))
        .header("content-type", "application/json")
        .body(upload.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(uploaded.status(), 200);
    let uploaded: serde_json::Value = uploaded.json().await.unwrap();
    let r#ref = uploaded["ref"].as_str().unwrap().to_string();

    // run via JSON
    let run = serde_json::json!({ "params": { "binary": { "ref": r#ref } } });
    let response = http
        .post(format!("{base}/api/client/wasimoff.v1.Tasks/RunWasip1"))
        .header("content-type", "application/json")
        .body(run.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let response: serde_json::Value = response.json().await.unwrap();
    assert_eq!(response["result"]["ok"]["status"], 0);

    // run via binary protobuf
    let request = run_request("hello.wasm");
    let response = http
        .post(format!("{base}/api/client/wasimoff.v1.Tasks/RunWasip1"))
        .header("content-type", "application/proto")
        .body(request.encode_to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let decoded = wasip1::Response::decode(&response.bytes().await.unwrap()[..]).unwrap();
    assert!(matches!(
        decoded.result,
        Some(wasip1::response::Result::Ok(output)) if output.stdout == HELLO
    ));

    // an unknown ref is rejected immediately
    let bad = http
        .post(format!("{base}/api/client/wasimoff.v1.Tasks/RunWasip1"))
        .header("content-type", "application/json")
        .body(serde_json::json!({ "params": { "binary": { "ref": "no-such-file" } } }).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    provider.messenger.close();
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
