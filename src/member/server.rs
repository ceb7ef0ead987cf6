//! HTTP endpoints served by a fleet member

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::actuator::ActuatorRegistry;
use super::emitter::{HeartbeatOutcome, SharedHeartbeatOutcome};
use crate::nodes::transport::COMMAND_PATH;
use crate::nodes::{Capability, CommandEnvelope, NodeReply};
use crate::{Error, Result};

/// State shared by member handlers
pub struct MemberState {
    pub node_id: String,
    pub capabilities: Vec<Capability>,
    pub actuators: ActuatorRegistry,
    pub last_heartbeat: SharedHeartbeatOutcome,
}

/// Node status response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatusResponse {
    pub id: String,
    pub capabilities: Vec<Capability>,
    pub actuators: std::collections::BTreeMap<String, serde_json::Value>,
    pub last_heartbeat: Option<HeartbeatOutcome>,
}

async fn execute_command(
    State(state): State<Arc<MemberState>>,
    Json(envelope): Json<CommandEnvelope>,
) -> Json<NodeReply> {
    tracing::debug!(node_id = %state.node_id, seq = envelope.seq, kind = %envelope.kind, "command received");
    Json(state.actuators.handle(&envelope).await)
}

async fn status(State(state): State<Arc<MemberState>>) -> Json<MemberStatusResponse> {
    Json(MemberStatusResponse {
        id: state.node_id.clone(),
        capabilities: state.capabilities.clone(),
        actuators: state.actuators.states(),
        last_heartbeat: state.last_heartbeat.read().await.clone(),
    })
}

/// Build the member router
pub fn router(state: Arc<MemberState>) -> Router {
    Router::new()
        .route(COMMAND_PATH, post(execute_command))
        .route("/api/v1/status", get(status))
        .with_state(state)
        .merge(crate::api::health::router())
        .layer(TraceLayer::new_for_http())
}

/// Serve the member API on `addr` until `shutdown` flips
///
/// # Errors
///
/// Returns error if the listener cannot bind or the server fails
pub async fn serve(
    state: Arc<MemberState>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind member server on {addr}: {e}")))?;

    tracing::info!(node_id = %state.node_id, %addr, "member server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    Ok(())
}
