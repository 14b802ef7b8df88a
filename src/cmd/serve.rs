use std::sync::Arc;

use anyhow::{Context, Result};
use tower_http::cors::CorsLayer;

use planstream::config::Config;
use planstream::server::{AppState, router};

/// Start the bridge server and run until ctrl-c.
pub async fn run(host: &str, port: u16, config: Config, cors: bool) -> Result<()> {
    tracing::info!(
        worker = %config.worker_cmd,
        args = ?config.worker_args,
        "starting planstream"
    );

    let state = Arc::new(AppState { config });
    let mut app = router(state);
    if cors {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    let local_addr = listener.local_addr()?;
    println!("planstream running at http://{local_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
        return;
    }
    println!("\nShutting down...");
}
