//! Background liveness sweeper
//!
//! Ages out silent nodes on a fixed interval, independent of request
//! traffic. The transition rule only depends on `now` and `last_seen_at`,
//! so a duplicate sweeper is wasteful but harmless.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SharedNodeRegistry;
use crate::config::LivenessConfig;
use crate::events::{EventBus, FleetEvent};

/// Periodically demotes nodes whose heartbeats stopped
pub struct LivenessSweeper {
    registry: SharedNodeRegistry,
    events: EventBus,
    interval: Duration,
    timeout: Duration,
    running: Arc<AtomicBool>,
}

impl LivenessSweeper {
    /// Create a sweeper from liveness settings
    #[must_use]
    pub fn new(registry: SharedNodeRegistry, events: EventBus, config: &LivenessConfig) -> Self {
        Self {
            registry,
            events,
            interval: config.sweep_interval,
            timeout: config.timeout,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that is true while the loop is running
    #[must_use]
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Run one sweep at `now`, publishing an event per demoted node
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Vec<String> {
        let demoted = {
            let mut registry = self.registry.lock().await;
            registry.sweep_timeouts(now, self.timeout)
        };
        for id in &demoted {
            self.events.publish(FleetEvent::NodeOffline {
                id: id.clone(),
                at: now,
            });
        }
        demoted
    }

    /// Sweep until `shutdown` flips to true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.running.store(true, Ordering::SeqCst);

        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            timeout_secs = self.timeout.as_secs_f64(),
            "liveness sweeper started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let demoted = self.sweep_once(Utc::now()).await;
                    if !demoted.is_empty() {
                        tracing::debug!(count = demoted.len(), "sweep demoted nodes");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::info!("liveness sweeper stopped");
    }

    /// Run the sweeper in a background task
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
