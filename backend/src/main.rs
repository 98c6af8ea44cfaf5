use anyhow::Result;
use backend::{build_router, monitor, AppState};
use std::{env, time::Duration};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_RUN_SECS: u64 = 3;

/// - En Docker: EMULATOR_ADDR=0.0.0.0:8080
/// - Local: default 0.0.0.0:8080
fn listen_addr() -> String {
    env::var("EMULATOR_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}

fn run_for() -> Duration {
    let secs = env::var("EMULATOR_RUN_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RUN_SECS);
    Duration::from_secs(secs)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("backend=debug,tower_http=info")),
        )
        .init();

    let state = AppState::new(run_for());

    // router HTTP
    let app = build_router(state.clone());

    // monitor que va terminando operaciones en segundo plano
    let monitor_state = state.clone();
    tokio::spawn(async move {
        monitor::monitor_operations(monitor_state).await;
    });

    let listener = TcpListener::bind(listen_addr()).await?;
    info!(
        "emulador de pipelines escuchando en {} (run_for={:?})",
        listener.local_addr()?,
        state.run_for
    );

    axum::serve(listener, app).await?;
    Ok(())
}
