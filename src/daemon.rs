//! Daemon - long-running fleet roles
//!
//! Wires configuration into the coordinator, member and monitor runtimes and
//! runs each until interrupted.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;

use crate::api::ApiServerBuilder;
use crate::events::{self, EventBus};
use crate::failover::{FailoverMonitor, HttpIdentityProbe, HttpReachabilityProbe};
use crate::member::MemberNode;
use crate::nodes::{HttpTransport, LivenessSweeper, NodeRegistry};
use crate::{Config, Result};

/// The fleet daemon - runs one role until Ctrl-C
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the coordinator: API server, liveness sweeper and event log
    ///
    /// On interrupt the server stops accepting requests and drains, then the
    /// sweeper stops.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the server cannot
    /// bind or fails
    pub async fn run_coordinator(self) -> Result<()> {
        self.config.validate()?;
        let registry = NodeRegistry::shared();
        let events = EventBus::default();
        let logger = tokio::spawn(events::log_events(events.subscribe()));

        let (sweeper_tx, sweeper_rx) = watch::channel(false);
        let sweeper = LivenessSweeper::new(registry.clone(), events.clone(), &self.config.liveness);
        let sweeper_running = sweeper.running_flag();
        let sweeper = sweeper.spawn(sweeper_rx);

        let server = &self.config.server;
        let identity = self.config.coordinator_identity();
        let api = ApiServerBuilder::new(
            registry,
            events,
            Arc::new(HttpTransport::new()?),
            identity.clone(),
        )
        .addr(SocketAddr::new(server.bind, server.port))
        .command_timeout(self.config.dispatch.command_timeout)
        .max_concurrent_requests(server.max_concurrent_requests)
        .rate_limit(server.rate_limit_per_minute)
        .sweeper_running(sweeper_running)
        .build();

        tracing::info!(%identity, port = server.port, "coordinator running");

        let (server_tx, server_rx) = watch::channel(false);
        spawn_interrupt_listener(server_tx);
        let served = api.run(server_rx).await;

        let _ = sweeper_tx.send(true);
        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "liveness sweeper task ended abnormally");
        }
        logger.abort();

        tracing::info!("coordinator stopped");
        served
    }

    /// Run a fleet member: command server and heartbeat emitter
    ///
    /// # Errors
    ///
    /// Returns error if the member configuration is invalid or its server fails
    pub async fn run_member(self) -> Result<()> {
        self.config.validate()?;
        let node = MemberNode::from_config(&self.config)?;
        let (tx, rx) = watch::channel(false);
        spawn_interrupt_listener(tx);

        node.run(rx).await?;
        tracing::info!("member stopped");
        Ok(())
    }

    /// Run the failover monitor and its status endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid, the probes cannot be
    /// built or the status server fails
    pub async fn run_monitor(self) -> Result<()> {
        self.config.validate()?;
        let config = &self.config.monitor;
        let monitor = FailoverMonitor::new(
            config,
            Arc::new(HttpIdentityProbe::new(&config.coordinator_url, config.probe_timeout)?),
            Arc::new(HttpReachabilityProbe::new(config.probe_timeout)?),
        );
        let state = monitor.state();

        let (tx, rx) = watch::channel(false);
        spawn_interrupt_listener(tx);

        tracing::info!(
            primary = %config.coordinator_url,
            backups = ?config.backup_urls,
            "failover monitor running"
        );

        let loops = monitor.spawn(rx.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let served = crate::api::monitor::serve(state, addr, rx).await;

        if served.is_err() {
            loops.abort();
        } else if let Err(e) = loops.await {
            tracing::warn!(error = %e, "monitor task ended abnormally");
        }
        served
    }
}

/// Flip `shutdown` to true on Ctrl-C
fn spawn_interrupt_listener(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                let _ = shutdown.send(true);
            }
            Err(e) => {
                // Dropping the sender would stop everything, so keep it alive
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
                drop(shutdown);
            }
        }
    });
}
