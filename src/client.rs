//! HTTP client for a coordinator's API, used by the CLI

use std::time::Duration;

use serde::Deserialize;

use crate::api::nodes::NodeResponse;
use crate::nodes::Command;
use crate::{Error, Result};

/// Command outcome as returned by the coordinator
#[derive(Debug, Clone, Deserialize)]
pub struct CommandReply {
    pub outcome: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl CommandReply {
    /// Whether the node executed the command
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.outcome == "ack"
    }
}

/// Client for one coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoordinatorClient {
    /// Create a client for the coordinator at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Snapshot of every node the coordinator knows
    ///
    /// # Errors
    ///
    /// Returns error if the coordinator is unreachable or answers with a failure
    pub async fn nodes(&self) -> Result<Vec<NodeResponse>> {
        let response = self
            .http
            .get(format!("{}/api/nodes", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "coordinator returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Coordinator's advertised identity
    ///
    /// # Errors
    ///
    /// Returns error if the coordinator is unreachable or answers with a failure
    pub async fn identity(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct Identity {
            identity: String,
        }

        let response = self
            .http
            .get(format!("{}/api/identity", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "coordinator returned {}",
                response.status()
            )));
        }
        Ok(response.json::<Identity>().await?.identity)
    }

    /// Send one command to `node_id` and return the coordinator's verdict
    ///
    /// # Errors
    ///
    /// Returns error if the coordinator is unreachable or its reply is not an outcome
    pub async fn send(&self, node_id: &str, command: &Command) -> Result<CommandReply> {
        let response = self
            .http
            .post(format!("{}/api/nodes/{node_id}/command", self.base_url))
            .json(command)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            Error::Transport(format!("unexpected reply from coordinator ({status}): {e}"))
        })
    }
}
