//! Log stream and inspection endpoints.
//!
//! Served on their own listener (`global.logging.streamAddress`), separate
//! from proxied traffic.
//!
//! # Endpoints
//! - `GET /logs` (WebSocket): live entries; query `level`, `domain`,
//!   `format` (`pretty`|`json`), `follow` (default true), `history` (default false)
//! - `GET /logs/history`: buffered entries as JSON; query `level`, `domain`
//! - `GET /traces/{id}`: a recent request trace

pub mod handlers;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_log_router(state: AppState) -> Router {
    Router::new()
        .route("/logs", get(stream_logs))
        .route("/logs/history", get(get_history))
        .route("/traces/{id}", get(get_trace))
        .with_state(state)
}

/// Serve the log endpoints until shutdown.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Log stream endpoint listening");

    axum::serve(listener, setup_log_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
