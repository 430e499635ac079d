//! HTTP surface of the broker: WebSocket endpoints for providers and
//! clients, unary RPC routes, the plain exec gateway, storage access and
//! operational endpoints.

pub mod benchmode;
pub mod exec;
pub mod job;
pub mod rpc;
pub mod socket;
pub mod storage;

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::services::ServeDir;

use crate::config::Configuration;
use crate::provider;
use crate::provider::store::ProviderStore;

pub use self::rpc::{ApiError, RpcServer};

/// Shared state of all route handlers.
pub struct AppState {
    pub store: Arc<ProviderStore>,
    pub rpc: RpcServer,
    pub config: Configuration,
}

/// Assemble the full broker router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        // provider endpoint
        .route("/api/provider/ws", get(provider::socket::handler))
        // client endpoints
        .route("/api/client/ws", get(socket::handler))
        .route("/api/client/wasimoff.v1.Tasks/{method}", post(rpc::connect_handler))
        .route("/api/client/run/{wasm}", post(exec::handler))
        // file storage
        .route("/api/storage/upload", post(storage::upload))
        .route("/api/storage/{filename}", get(storage::download))
        // operational
        .route("/healthz", get(healthz))
        .route("/api/version", get(version));

    if state.config.metrics {
        router = router.route("/metrics", get(metrics));
    }

    router
        // static files for the frontend
        .fallback_service(ServeDir::new(&state.config.static_files))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "OK\n"
}

#[derive(Serialize)]
struct VersionInfo {
    package: &'static str,
    version: &'static str,
}

async fn version() -> impl IntoResponse {
    Json(VersionInfo {
        package: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.store.metrics.encode(),
    )
}
