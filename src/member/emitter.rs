//! Node-side heartbeat loop
//!
//! Each tick sends one heartbeat with a bounded number of attempts. A tick
//! that exhausts its attempts is logged and forgotten; the next tick starts
//! fresh. The loop never stops on its own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

use super::retry::{RetryPolicy, delay_for_attempt, jittered_interval};
use super::sensors::SensorSource;
use crate::nodes::Heartbeat;
use crate::{Error, Result};

/// Sends one heartbeat to the coordinator
#[async_trait]
pub trait HeartbeatClient: Send + Sync {
    async fn send(&self, heartbeat: &Heartbeat) -> Result<()>;
}

/// Heartbeat client posting JSON to `{coordinator}/api/heartbeat`
#[derive(Debug, Clone)]
pub struct HttpHeartbeatClient {
    client: reqwest::Client,
    url: String,
}

impl HttpHeartbeatClient {
    /// Create a client for the coordinator at `coordinator_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(coordinator_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/api/heartbeat", coordinator_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl HeartbeatClient for HttpHeartbeatClient {
    async fn send(&self, heartbeat: &Heartbeat) -> Result<()> {
        let response = self.client.post(&self.url).json(heartbeat).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(Error::validation(format!("coordinator rejected heartbeat ({status}): {body}")))
        } else {
            Err(Error::Transport(format!("coordinator returned {status}: {body}")))
        }
    }
}

/// Result of the most recent heartbeat tick
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatOutcome {
    pub at: DateTime<Utc>,
    pub delivered: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Latest tick result, readable by the node's status endpoint
pub type SharedHeartbeatOutcome = Arc<RwLock<Option<HeartbeatOutcome>>>;

/// Periodic heartbeat sender for one node
pub struct HeartbeatEmitter {
    client: Arc<dyn HeartbeatClient>,
    sensors: Arc<dyn SensorSource>,
    template: Heartbeat,
    min_interval: Duration,
    max_interval: Duration,
    retry: RetryPolicy,
    last: SharedHeartbeatOutcome,
}

impl HeartbeatEmitter {
    /// Create an emitter sending `template` plus fresh sensor readings
    #[must_use]
    pub fn new(
        client: Arc<dyn HeartbeatClient>,
        sensors: Arc<dyn SensorSource>,
        template: Heartbeat,
    ) -> Self {
        Self {
            client,
            sensors,
            template,
            min_interval: Duration::from_secs(15),
            max_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            last: Arc::new(RwLock::new(None)),
        }
    }

    /// Draw tick intervals uniformly from `[min, max]`
    #[must_use]
    pub fn with_interval(mut self, min: Duration, max: Duration) -> Self {
        self.min_interval = min;
        self.max_interval = max;
        self
    }

    /// Per-tick retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Handle to the latest tick result
    #[must_use]
    pub fn last_outcome(&self) -> SharedHeartbeatOutcome {
        self.last.clone()
    }

    /// Send one heartbeat, retrying up to the policy's attempt budget
    pub async fn beat_once(&self) -> HeartbeatOutcome {
        let mut heartbeat = self.template.clone();
        let readings = self.sensors.read().await;
        heartbeat.sensors = (!readings.is_empty()).then_some(readings);

        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;
        let mut attempts = 0;

        for attempt in 0..max_attempts {
            attempts = attempt + 1;
            match self.client.send(&heartbeat).await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                // The coordinator will not accept this report however often it is resent
                Err(e @ Error::Validation(_)) => {
                    last_error = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    tracing::debug!(node_id = %heartbeat.id, attempt = attempts, error = %e, "heartbeat attempt failed");
                    last_error = Some(e.to_string());
                    if attempts < max_attempts {
                        tokio::time::sleep(delay_for_attempt(&self.retry, attempt)).await;
                    }
                }
            }
        }

        let outcome = HeartbeatOutcome {
            at: Utc::now(),
            delivered: last_error.is_none(),
            attempts,
            error: last_error,
        };

        match &outcome.error {
            None => tracing::debug!(node_id = %heartbeat.id, attempts, "heartbeat delivered"),
            Some(error) => tracing::warn!(node_id = %heartbeat.id, attempts, %error, "heartbeat failed"),
        }

        *self.last.write().await = Some(outcome.clone());
        outcome
    }

    /// Beat immediately, then at jittered intervals until `shutdown` flips
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            node_id = %self.template.id,
            min_secs = self.min_interval.as_secs(),
            max_secs = self.max_interval.as_secs(),
            "heartbeat emitter started"
        );

        loop {
            tokio::select! {
                _ = self.beat_once() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let wait = jittered_interval(self.min_interval, self.max_interval);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
        }

        tracing::info!(node_id = %self.template.id, "heartbeat emitter stopped");
    }

    /// Run the emitter in a background task
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
