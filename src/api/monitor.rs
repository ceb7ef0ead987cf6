//! Failover monitor status endpoint

use std::net::SocketAddr;

use axum::{Json, Router, extract::State, routing::get};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::failover::{FailoverState, SharedFailoverState};
use crate::{Error, Result};

async fn status(State(state): State<SharedFailoverState>) -> Json<FailoverState> {
    Json(state.read().await.clone())
}

/// Build the monitor router
pub fn router(state: SharedFailoverState) -> Router {
    Router::new()
        .route("/status", get(status))
        .with_state(state)
        .merge(super::health::router())
        .layer(TraceLayer::new_for_http())
}

/// Serve the monitor status endpoint until `shutdown` flips
///
/// # Errors
///
/// Returns error if the listener cannot bind or the server fails
pub async fn serve(
    state: SharedFailoverState,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind monitor server on {addr}: {e}")))?;

    tracing::info!(%addr, "monitor status endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}
