//! Probes used by the failover monitor
//!
//! Both probes see the fleet only from the outside: the identity the
//! coordinator advertises and whether an endpoint answers at all.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{Error, Result};

/// Reads the coordinator's advertised identity
#[async_trait]
pub trait IdentityProbe: Send + Sync {
    /// Current identity; an error means no identity was observable this tick
    async fn identity(&self) -> Result<String>;
}

/// Checks whether one endpoint answers
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self, endpoint: &str) -> bool;
}

#[derive(Deserialize)]
struct IdentityResponse {
    identity: String,
}

/// Identity probe reading `{coordinator}/api/identity`
#[derive(Debug, Clone)]
pub struct HttpIdentityProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpIdentityProbe {
    /// Create a probe for the coordinator at `coordinator_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(coordinator_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/api/identity", coordinator_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl IdentityProbe for HttpIdentityProbe {
    async fn identity(&self) -> Result<String> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "identity endpoint returned {}",
                response.status()
            )));
        }
        let body: IdentityResponse = response.json().await?;
        let identity = body.identity.trim().to_string();
        if identity.is_empty() {
            return Err(Error::Transport("empty identity".to_string()));
        }
        Ok(identity)
    }
}

/// Reachability probe issuing `GET {endpoint}/health`
#[derive(Debug, Clone)]
pub struct HttpReachabilityProbe {
    client: reqwest::Client,
}

impl HttpReachabilityProbe {
    /// Create a probe giving up on each endpoint after `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn is_reachable(&self, endpoint: &str) -> bool {
        let url = format!("{}/health", endpoint.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::trace!(endpoint, error = %e, "reachability probe failed");
                false
            }
        }
    }
}
