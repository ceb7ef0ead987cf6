//! Request/response transport used to reach a node's command endpoint

use std::time::Duration;

use async_trait::async_trait;

use super::types::{CommandEnvelope, NodeReply};
use crate::{Error, Result};

/// Path of the command endpoint every node serves
pub const COMMAND_PATH: &str = "/api/v1/commands";

/// Delivers one command envelope to a node and returns its reply
///
/// Implementations must give up after `timeout` rather than hang.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `envelope` to the node at `address` (`host:port`)
    async fn deliver(
        &self,
        address: &str,
        envelope: &CommandEnvelope,
        timeout: Duration,
    ) -> Result<NodeReply>;
}

/// HTTP transport posting JSON envelopes to `http://{address}/api/v1/commands`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with its own connection pool
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// Command URL for a node address
    #[must_use]
    pub fn command_url(address: &str) -> String {
        format!("http://{address}{COMMAND_PATH}")
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(
        &self,
        address: &str,
        envelope: &CommandEnvelope,
        timeout: Duration,
    ) -> Result<NodeReply> {
        let response = self
            .client
            .post(Self::command_url(address))
            .timeout(timeout)
            .json(envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "node at {address} returned HTTP {status}"
            )));
        }

        Ok(response.json::<NodeReply>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_url_format() {
        assert_eq!(
            HttpTransport::command_url("192.168.4.11:5000"),
            "http://192.168.4.11:5000/api/v1/commands"
        );
    }
}
