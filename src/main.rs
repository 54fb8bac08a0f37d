use std::env;
use std::net::SocketAddr;

use logrelay::{app, build_state_from_env};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let state = build_state_from_env()?;
    let relay = &state.relay;
    tracing::info!(
        analyzer_mode = relay.mode().as_str(),
        buffer_capacity = relay.buffer().capacity(),
        body_limit = state.body_limit(),
        max_decoded_bytes = relay.max_decoded_bytes(),
        "log relay ready"
    );

    let port = env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "accepting log batches on /ingest");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::warn!(error = %err, "could not listen for shutdown signal");
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}
