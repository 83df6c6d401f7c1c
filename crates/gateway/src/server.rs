//! The web variant: an axum server exposing the WebSocket endpoint.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use za_engine::cancel::LEVEL_FORCE;

use crate::state::AppState;
use crate::ws::ws_handler;

/// Default listen port. A busy preferred port falls back here.
pub const DEFAULT_PORT: u16 = 28713;

pub async fn run_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = bind_with_fallback(host, port).await?;
    tracing::info!(addr = %listener.local_addr()?, "zagent web listening");

    // Signal handling: first Ctrl-C cancels the running turn, the
    // second requests exit, the third forces termination.
    let cancel = state.cancel.clone();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let mut shutdown_tx = Some(shutdown_tx);
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let level = cancel.activate();
            match level {
                1 => tracing::info!("cancellation requested; interrupting current turn"),
                2 => {
                    tracing::info!("exit requested; shutting down");
                    if let Some(tx) = shutdown_tx.take() {
                        let _ = tx.send(());
                    }
                }
                _ if level >= LEVEL_FORCE => {
                    tracing::warn!("forced exit");
                    std::process::exit(130);
                }
                _ => {}
            }
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await?;
    Ok(())
}

/// Bind the preferred address, falling back to the fixed default port
/// when the preferred one is busy.
async fn bind_with_fallback(host: &str, port: u16) -> anyhow::Result<tokio::net::TcpListener> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(e) if port != DEFAULT_PORT => {
            tracing::warn!(
                port,
                error = %e,
                "preferred port unavailable; falling back to {DEFAULT_PORT}"
            );
            let fallback: SocketAddr = format!("{host}:{DEFAULT_PORT}").parse()?;
            Ok(tokio::net::TcpListener::bind(fallback).await?)
        }
        Err(e) => Err(e.into()),
    }
}
