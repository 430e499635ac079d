//! Plain HTTP exec: `POST /api/client/run/{wasm}` runs a stored binary
//! with stdin from the request body and arguments from `X-*` headers, for
//! curl-friendly one-off invocations.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;
use wasimoff_types::task::{wasip1, Metadata};
use wasimoff_types::File;

use crate::transport::proxied_addr;

use super::AppState;

pub async fn handler(
    State(state): State<Arc<AppState>>,
    Path(wasm): Path<String>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let addr = proxied_addr(&headers, peer);
    if wasm.is_empty() {
        return (StatusCode::BAD_REQUEST, "executable name required").into_response();
    }

    let mut params = wasip1::Params {
        binary: Some(File::by_ref(&wasm)),
        args: vec![wasm.clone()],
        ..Default::default()
    };

    // arguments with shell quoting rules, binary name prepended as argv[0]
    if let Some(args) = headers.get("x-args").and_then(|v| v.to_str().ok()) {
        match shlex::split(args) {
            Some(mut parsed) => {
                let mut argv = vec![wasm.clone()];
                argv.append(&mut parsed);
                params.args = argv;
            }
            None => {
                return (StatusCode::BAD_REQUEST, "malformatted X-Args").into_response();
            }
        }
    }

    for (key, value) in headers.iter() {
        let Ok(value) = value.to_str() else { continue };

        // X-Env-* headers become environment variables
        if let Some(name) = key.as_str().strip_prefix("x-env-") {
            params.envs.push(format!("{}={}", name.to_uppercase(), value));
        }
        // rootfs blob by ref
        if key.as_str() == "x-rootfs-ref" && !value.is_empty() {
            params.rootfs = Some(File::by_ref(value));
        }
        // artifact paths to collect after the run
        if key.as_str() == "x-artifact" {
            params.artifacts.push(value.to_string());
        }
    }

    // pass content headers through like a CGI gateway would
    if let Some(length) = headers.get(http::header::CONTENT_LENGTH).and_then(|v| v.to_str().ok()) {
        params.envs.push(format!("CONTENT_LENGTH={length}"));
    }
    if let Some(ctype) = headers.get(http::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        params.envs.push(format!("CONTENT_TYPE={ctype}"));
    }

    if !body.is_empty() {
        params.stdin = Some(body.to_vec());
    }

    let request = wasip1::Request {
        info: Some(Metadata { requester: Some(addr.clone()), ..Default::default() }),
        qos: None,
        params: Some(params),
    };

    let ctx = CancellationToken::new();
    let _guard = ctx.clone().drop_guard();
    let response = match state.rpc.run_wasip1(ctx, request, &addr).await {
        Ok(response) => response,
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    let mut headers = HeaderMap::new();
    if let Some(provider) = response.info.as_ref().and_then(|i| i.provider.as_deref()) {
        if let Ok(value) = HeaderValue::from_str(provider) {
            headers.insert("x-wasimoff-provider", value);
        }
    }

    match response.result {
        // application-level failure
        Some(wasip1::response::Result::Error(error)) => {
            headers.insert("x-wasimoff-result", HeaderValue::from_static("Error"));
            (StatusCode::OK, headers, error).into_response()
        }

        Some(wasip1::response::Result::Ok(output)) => {
            headers.insert("x-wasimoff-result", HeaderValue::from_static("Ok"));
            if let Some(status) = output.status {
                if let Ok(value) = HeaderValue::from_str(&status.to_string()) {
                    headers.insert("x-wasimoff-status", value);
                }
            }
            if let Some(blob) = output.artifacts.as_ref().and_then(|a| a.blob.as_ref()) {
                if let Ok(value) = HeaderValue::from_str(&BASE64.encode(blob)) {
                    headers.insert("x-wasimoff-artifacts", value);
                }
            }
            // no way to interleave the streams afterwards, stderr goes first
            let mut body = output.stderr;
            body.extend_from_slice(&output.stdout);
            // 200 even for non-zero exit codes, the RPC itself succeeded
            (StatusCode::OK, headers, body).into_response()
        }

        None => (StatusCode::INTERNAL_SERVER_ERROR, "empty result").into_response(),
    }
}
