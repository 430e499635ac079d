use std::net::SocketAddr;
use std::process::exit;
use std::sync::Arc;

use log::{error, info};
use tokio::net::TcpListener;

use wasimoff_broker::api::{self, AppState, RpcServer};
use wasimoff_broker::config::Configuration;
use wasimoff_broker::provider::store::ProviderStore;
use wasimoff_broker::scheduler::{self, SimpleMatchSelector, TaskQueue};
use wasimoff_broker::storage::FileStorage;

#[tokio::main]
async fn main() {
    banner();

    let conf = Configuration::load();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if conf.debug { "debug" } else { "info" },
    ))
    .init();
    info!("{conf:?}");

    // file storage and the provider store with its background loops
    let storage = match FileStorage::open(&conf.file_storage) {
        Ok(storage) => storage,
        Err(err) => {
            error!("failed to open file storage {:?}: {err}", conf.file_storage);
            exit(1);
        }
    };
    let store = ProviderStore::new(storage, conf.cloud());

    // task queue and dispatcher with the default selection policy
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
        config: conf.clone(),
    });

    // maybe start the internal load generator
    tokio::spawn(api::benchmode::tsp_flood(state.clone(), conf.benchmode));

    let app = api::router(state);
    let listener = match TcpListener::bind(&conf.http_listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to listen on {:?}: {err}", conf.http_listen);
            exit(1);
        }
    };
    info!("broker listening on http://{}", conf.http_listen);
    info!("provider socket: /api/provider/ws");
    info!("client socket:   /api/client/ws");
    info!("client rpc:      /api/client/wasimoff.v1.Tasks/");
    if conf.metrics {
        info!("prometheus metrics: /metrics");
    }

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    tokio::select! {
        result = serve => {
            error!("http server failed: {result:?}");
            exit(1);
        }
        _ = tokio::signal::ctrl_c() => {
            error!("SIGINT received, shutting down");
            exit(1);
        }
    }
}

// figlet -f small wasimoff
fn banner() {
    println!("                  _            __  __ ");
    println!("  __ __ ____ _ __(_)_ __  ___ / _|/ _|");
    println!("  \\ V  V / _` (_-< | '  \\/ _ \\  _|  _|");
    println!("   \\_/\\_/\\__,_/__/_|_|_|_\\___/_| |_|  ");
    println!();
}
