use std::sync::Arc;

use emberstore::auth::{OpenRules, StaticTokenAuth};
use emberstore::storage::MemoryStore;
use emberstore::{build_router, AppState, Config};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    emberstore::logger::init();

    let config = Config::from_env();
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(StaticTokenAuth),
        Arc::new(OpenRules),
        config.clone(),
    );
    state.start_background_tasks();

    let router = build_router(state.clone());
    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("failed to bind {}: {err}", config.bind_addr);
            std::process::exit(1);
        }
    };
    log::info!("emberstore listening on {}", config.bind_addr);

    let shutdown_state = state.clone();
    let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
        shutdown_signal().await;
        log::info!("shutdown signal received; closing connections");
        shutdown_state.shutdown().await;
    });

    if let Err(err) = serve.await {
        log::error!("server error: {err}");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
