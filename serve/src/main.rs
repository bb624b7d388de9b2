//! Steward server binary: load config, build the engine, serve HTTP.

use std::sync::Arc;

use serve::{router, AppState};
use steward::{Engine, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Layered resolution: process env, then ./.env, then the XDG
    // config.toml. Any malformed source or value is fatal here.
    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    let listen_addr = settings.listen_addr;

    let engine = match Engine::bootstrap(settings).await {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("startup failed: {e}");
            std::process::exit(1);
        }
    };

    let app = router(AppState { engine: Arc::clone(&engine) });

    let listener = match tokio::net::TcpListener::bind(listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind {listen_addr}: {e}");
            std::process::exit(1);
        }
    };
    info!(%listen_addr, "steward listening");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("server error: {e}");
        engine.shutdown().await;
        std::process::exit(1);
    }
}
