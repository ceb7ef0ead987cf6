//! Node registry API endpoints
//!
//! REST endpoints for listing nodes and sending them commands

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::Error;
use crate::nodes::{Capability, Command, DispatchOutcome, InFlightCommand, NodeRecord, NodeStatus};

/// REST response for one node
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResponse {
    pub id: String,
    pub status: NodeStatus,
    pub last_seen_at: DateTime<Utc>,
    pub capabilities: BTreeSet<Capability>,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<InFlightCommand>,
}

impl From<NodeRecord> for NodeResponse {
    fn from(record: NodeRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            last_seen_at: record.last_seen_at,
            capabilities: record.capabilities,
            address: record.address,
            in_flight: record.in_flight,
        }
    }
}

/// Body of `POST /api/commands`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    pub node_id: String,
    pub command: Command,
}

/// Outcome of a command request
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CommandResponse {
    fn validation_error(reason: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::BAD_REQUEST,
            Json(Self {
                outcome: "validation_error",
                payload: None,
                reason: Some(reason.into()),
            }),
        )
    }
}

/// HTTP status for each dispatch outcome
#[must_use]
pub const fn outcome_status(outcome: &DispatchOutcome) -> StatusCode {
    match outcome {
        DispatchOutcome::Ack { .. } => StatusCode::OK,
        DispatchOutcome::Nack { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        DispatchOutcome::NodeUnknown => StatusCode::NOT_FOUND,
        DispatchOutcome::NodeBusy => StatusCode::CONFLICT,
        DispatchOutcome::Timeout => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn command_response(
    result: crate::Result<DispatchOutcome>,
) -> (StatusCode, Json<CommandResponse>) {
    match result {
        Ok(outcome) => {
            let status = outcome_status(&outcome);
            let label = outcome.label();
            let (payload, reason) = match outcome {
                DispatchOutcome::Ack { payload } => (payload, None),
                DispatchOutcome::Nack { reason } => (None, Some(reason)),
                DispatchOutcome::Timeout => (None, Some("no reply before the deadline".to_string())),
                DispatchOutcome::NodeUnknown => (None, Some("node unknown or offline".to_string())),
                DispatchOutcome::NodeBusy => {
                    (None, Some("another command is in flight".to_string()))
                }
            };
            (
                status,
                Json(CommandResponse {
                    outcome: label,
                    payload,
                    reason,
                }),
            )
        }
        Err(Error::Validation(reason)) => CommandResponse::validation_error(reason),
        Err(e) => {
            tracing::error!(error = %e, "command dispatch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CommandResponse {
                    outcome: "error",
                    payload: None,
                    reason: Some(e.to_string()),
                }),
            )
        }
    }
}

/// Build node routes
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", get(list_nodes))
        .route("/{node_id}", get(get_node))
        .route("/{node_id}/command", post(command_node))
        .with_state(state)
}

/// Build the fleet-wide command route
pub fn commands_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/commands", post(send_command))
        .with_state(state)
}

/// List all known nodes
async fn list_nodes(State(state): State<Arc<ApiState>>) -> Json<Vec<NodeResponse>> {
    let nodes = state.registry.lock().await.list();
    Json(nodes.into_iter().map(NodeResponse::from).collect())
}

/// Get one node
async fn get_node(
    State(state): State<Arc<ApiState>>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeResponse>, StatusCode> {
    let record = state.registry.lock().await.get(&node_id);
    record
        .map(|r| Json(NodeResponse::from(r)))
        .ok_or(StatusCode::NOT_FOUND)
}

/// Send a command to the node named in the path
async fn command_node(
    State(state): State<Arc<ApiState>>,
    Path(node_id): Path<String>,
    payload: Result<Json<Command>, JsonRejection>,
) -> (StatusCode, Json<CommandResponse>) {
    match payload {
        Ok(Json(command)) => command_response(state.dispatcher.dispatch(&node_id, command).await),
        Err(rejection) => CommandResponse::validation_error(rejection.body_text()),
    }
}

/// Send a command to the node named in the body
async fn send_command(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> (StatusCode, Json<CommandResponse>) {
    match payload {
        Ok(Json(request)) => command_response(
            state
                .dispatcher
                .dispatch(&request.node_id, request.command)
                .await,
        ),
        Err(rejection) => CommandResponse::validation_error(rejection.body_text()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(outcome_status(&DispatchOutcome::Ack { payload: None }), StatusCode::OK);
        assert_eq!(
            outcome_status(&DispatchOutcome::Nack {
                reason: "jammed".to_string()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(outcome_status(&DispatchOutcome::NodeUnknown), StatusCode::NOT_FOUND);
        assert_eq!(outcome_status(&DispatchOutcome::NodeBusy), StatusCode::CONFLICT);
        assert_eq!(outcome_status(&DispatchOutcome::Timeout), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn validation_errors_are_bad_requests() {
        let (status, Json(body)) =
            command_response(Err(Error::validation("command kind must not be empty")));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.outcome, "validation_error");
    }

    #[test]
    fn nack_reason_is_forwarded() {
        let (status, Json(body)) = command_response(Ok(DispatchOutcome::Nack {
            reason: "gpio busy".to_string(),
        }));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.outcome, "nack");
        assert_eq!(body.reason.as_deref(), Some("gpio busy"));
    }
}
