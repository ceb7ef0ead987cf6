//! Heartbeat ingestion endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, State, rejection::JsonRejection},
    http::{Extensions, StatusCode},
    routing::post,
};
use serde::Serialize;

use super::ApiState;
use crate::Error;
use crate::nodes::Heartbeat;

/// Heartbeat acknowledgement
#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HeartbeatResponse {
    fn rejected(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                accepted: false,
                error: Some(error.into()),
            }),
        )
    }
}

async fn receive_heartbeat(
    State(state): State<Arc<ApiState>>,
    extensions: Extensions,
    payload: Result<Json<Heartbeat>, JsonRejection>,
) -> (StatusCode, Json<HeartbeatResponse>) {
    let Json(heartbeat) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "malformed heartbeat body");
            return HeartbeatResponse::rejected(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match state.receiver.accept(heartbeat, peer).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HeartbeatResponse {
                accepted: true,
                error: None,
            }),
        ),
        Err(Error::Validation(reason)) => {
            tracing::debug!(%reason, ?peer, "heartbeat rejected");
            HeartbeatResponse::rejected(StatusCode::BAD_REQUEST, reason)
        }
        Err(e) => {
            tracing::error!(error = %e, "heartbeat processing failed");
            HeartbeatResponse::rejected(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Build heartbeat routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/heartbeat", post(receive_heartbeat))
        .with_state(state)
}
