//! Passive failover detection
//!
//! The monitor records what it observes and nothing else. It never elects,
//! repairs or talks to the registry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::probe::{IdentityProbe, ReachabilityProbe};
use crate::config::MonitorConfig;

/// Events kept per log before the oldest are dropped
pub const EVENT_LOG_CAPACITY: usize = 256;

/// Coarse classification of fleet reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    AllReachable,
    PartiallyReachable,
    Unreachable,
}

impl Reachability {
    /// Classify a set of probe results; no endpoints at all is `Unreachable`
    #[must_use]
    pub fn classify(results: &[bool]) -> Self {
        let up = results.iter().filter(|r| **r).count();
        match up {
            0 => Self::Unreachable,
            n if n == results.len() => Self::AllReachable,
            _ => Self::PartiallyReachable,
        }
    }
}

/// Whether an endpoint is the primary coordinator or a standby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    Primary,
    Backup,
}

/// Coordinator identity changed between two observations
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailoverEvent {
    pub previous: String,
    pub new: String,
    pub at: DateTime<Utc>,
}

/// Endpoint went up or down between two probes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReachabilityChange {
    pub endpoint: String,
    pub role: EndpointRole,
    pub reachable: bool,
    pub at: DateTime<Utc>,
}

/// Last probe result for one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub endpoint: String,
    pub role: EndpointRole,
    pub reachable: Option<bool>,
    pub checked_at: Option<DateTime<Utc>>,
}

/// Everything the monitor has observed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverState {
    pub last_identity: Option<String>,
    pub identity_checked_at: Option<DateTime<Utc>>,
    pub transition_count: u64,
    pub failover_events: VecDeque<FailoverEvent>,
    pub reachability: Option<Reachability>,
    pub endpoints: Vec<EndpointStatus>,
    pub reachability_changes: VecDeque<ReachabilityChange>,
}

impl FailoverState {
    /// Empty state watching `primary` and `backups`
    #[must_use]
    pub fn new(primary: &str, backups: &[String]) -> Self {
        let endpoints = std::iter::once((primary.to_string(), EndpointRole::Primary))
            .chain(backups.iter().map(|b| (b.clone(), EndpointRole::Backup)))
            .map(|(endpoint, role)| EndpointStatus {
                endpoint,
                role,
                reachable: None,
                checked_at: None,
            })
            .collect();

        Self {
            last_identity: None,
            identity_checked_at: None,
            transition_count: 0,
            failover_events: VecDeque::new(),
            reachability: None,
            endpoints,
            reachability_changes: VecDeque::new(),
        }
    }

    /// Record one identity observation
    ///
    /// `None` is a gap: nothing was observable. Gaps never reset the last
    /// known identity, so `A, gap, B` still counts as one failover.
    pub fn observe_identity(
        &mut self,
        observed: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<FailoverEvent> {
        let identity = observed?;
        self.identity_checked_at = Some(now);

        let event = match self.last_identity.as_deref() {
            Some(previous) if previous != identity => Some(FailoverEvent {
                previous: previous.to_string(),
                new: identity.clone(),
                at: now,
            }),
            _ => None,
        };

        if let Some(event) = &event {
            self.transition_count += 1;
            push_bounded(&mut self.failover_events, event.clone());
        }
        self.last_identity = Some(identity);
        event
    }

    /// Record one reachability sweep, results in endpoint order
    ///
    /// Returns the endpoints whose reachability flipped since the last sweep.
    pub fn record_reachability(
        &mut self,
        results: &[bool],
        now: DateTime<Utc>,
    ) -> Vec<ReachabilityChange> {
        let mut changes = Vec::new();
        for (status, reachable) in self.endpoints.iter_mut().zip(results) {
            if status.reachable.is_some_and(|prev| prev != *reachable) {
                changes.push(ReachabilityChange {
                    endpoint: status.endpoint.clone(),
                    role: status.role,
                    reachable: *reachable,
                    at: now,
                });
            }
            status.reachable = Some(*reachable);
            status.checked_at = Some(now);
        }

        for change in &changes {
            push_bounded(&mut self.reachability_changes, change.clone());
        }
        self.reachability = Some(Reachability::classify(results));
        changes
    }
}

fn push_bounded<T>(log: &mut VecDeque<T>, item: T) {
    if log.len() == EVENT_LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(item);
}

/// Monitor state shared with the status endpoint
pub type SharedFailoverState = Arc<RwLock<FailoverState>>;

/// Runs the identity and reachability loops
#[derive(Clone)]
pub struct FailoverMonitor {
    state: SharedFailoverState,
    identity_probe: Arc<dyn IdentityProbe>,
    reachability_probe: Arc<dyn ReachabilityProbe>,
    identity_interval: Duration,
    reachability_interval: Duration,
}

impl FailoverMonitor {
    /// Create a monitor for the endpoints in `config`
    #[must_use]
    pub fn new(
        config: &MonitorConfig,
        identity_probe: Arc<dyn IdentityProbe>,
        reachability_probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(FailoverState::new(
                &config.coordinator_url,
                &config.backup_urls,
            ))),
            identity_probe,
            reachability_probe,
            identity_interval: config.identity_interval,
            reachability_interval: config.reachability_interval,
        }
    }

    /// Handle to the observed state
    #[must_use]
    pub fn state(&self) -> SharedFailoverState {
        self.state.clone()
    }

    /// Owned copy of the observed state
    pub async fn snapshot(&self) -> FailoverState {
        self.state.read().await.clone()
    }

    /// Probe the identity once and record it
    pub async fn check_identity(&self, now: DateTime<Utc>) -> Option<FailoverEvent> {
        let observed = match self.identity_probe.identity().await {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::debug!(error = %e, "coordinator identity not observable");
                None
            }
        };

        let event = self.state.write().await.observe_identity(observed, now);
        if let Some(event) = &event {
            tracing::warn!(previous = %event.previous, new = %event.new, "coordinator failover detected");
        }
        event
    }

    /// Probe every endpoint once and record the results
    pub async fn check_reachability(&self, now: DateTime<Utc>) -> Reachability {
        let endpoints: Vec<String> = self
            .state
            .read()
            .await
            .endpoints
            .iter()
            .map(|e| e.endpoint.clone())
            .collect();

        let results = futures::future::join_all(
            endpoints
                .iter()
                .map(|endpoint| self.reachability_probe.is_reachable(endpoint)),
        )
        .await;

        let (previous, changes) = {
            let mut state = self.state.write().await;
            let previous = state.reachability;
            (previous, state.record_reachability(&results, now))
        };
        let classification = Reachability::classify(&results);

        for change in &changes {
            tracing::info!(
                endpoint = %change.endpoint,
                role = ?change.role,
                reachable = change.reachable,
                "endpoint reachability changed"
            );
        }
        if previous != Some(classification) {
            tracing::info!(?classification, "fleet reachability");
        }
        classification
    }

    /// Run both loops until `shutdown` flips
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            identity_interval_secs = self.identity_interval.as_secs(),
            reachability_interval_secs = self.reachability_interval.as_secs(),
            "failover monitor started"
        );

        let identity = {
            let monitor = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_every(monitor.identity_interval, shutdown, || {
                    let monitor = monitor.clone();
                    async move {
                        monitor.check_identity(Utc::now()).await;
                    }
                })
                .await;
            })
        };

        let reachability = {
            let monitor = self.clone();
            tokio::spawn(async move {
                run_every(monitor.reachability_interval, shutdown, || {
                    let monitor = monitor.clone();
                    async move {
                        monitor.check_reachability(Utc::now()).await;
                    }
                })
                .await;
            })
        };

        let _ = tokio::join!(identity, reachability);
        tracing::info!("failover monitor stopped");
    }

    /// Run the monitor in a background task
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

async fn run_every<F, Fut>(period: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => tick().await,
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
    }
}
