//! Fleet member (node) runtime
//!
//! A member runs two independent tasks: the command server and the
//! heartbeat emitter. A failing coordinator link never affects command
//! handling, and a failed command never affects heartbeats.

pub mod actuator;
pub mod emitter;
pub mod retry;
pub mod sensors;
pub mod server;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;

pub use actuator::{
    ActuatorBackend, ActuatorRegistry, PwmActuator, ServoActuator, SwitchActuator,
};
pub use emitter::{
    HeartbeatClient, HeartbeatEmitter, HeartbeatOutcome, HttpHeartbeatClient,
    SharedHeartbeatOutcome,
};
pub use retry::RetryPolicy;
pub use sensors::{NoSensors, SensorSource, SystemSensors};
pub use server::MemberState;

use crate::config::Config;
use crate::nodes::{Heartbeat, parse_capabilities, validate_node_id};
use crate::Result;

/// Assembled member: server state plus its heartbeat emitter
pub struct MemberNode {
    state: Arc<MemberState>,
    emitter: HeartbeatEmitter,
    addr: SocketAddr,
}

impl MemberNode {
    /// Build a member from configuration using the HTTP heartbeat client
    ///
    /// # Errors
    ///
    /// Returns error if the node id or capabilities are invalid or the HTTP
    /// client cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = HttpHeartbeatClient::new(
            &config.member.coordinator_url,
            config.member.request_timeout,
        )?;
        Self::with_client(config, Arc::new(client), Arc::new(SystemSensors::default()))
    }

    /// Build a member that reports through `client`
    ///
    /// # Errors
    ///
    /// Returns error if the node id or capabilities are invalid
    pub fn with_client(
        config: &Config,
        client: Arc<dyn HeartbeatClient>,
        sensors: Arc<dyn SensorSource>,
    ) -> Result<Self> {
        let node_id = config.member_node_id();
        validate_node_id(&node_id)?;
        let capabilities = parse_capabilities(&config.member.capabilities)?;

        let template = Heartbeat {
            id: node_id.clone(),
            capabilities: capabilities.iter().map(ToString::to_string).collect(),
            sensors: None,
            address: config.member.advertise_address.clone(),
            port: Some(config.member.port),
        };

        let emitter = HeartbeatEmitter::new(client, sensors, template)
            .with_interval(config.member.heartbeat_min, config.member.heartbeat_max)
            .with_retry(config.member.retry.clone());

        let state = Arc::new(MemberState {
            node_id,
            capabilities: capabilities.iter().copied().collect(),
            actuators: ActuatorRegistry::simulated_with_auto_off(
                &capabilities,
                config.member.led_auto_off,
            ),
            last_heartbeat: emitter.last_outcome(),
        });

        Ok(Self {
            state,
            emitter,
            addr: SocketAddr::from(([0, 0, 0, 0], config.member.port)),
        })
    }

    /// Shared server state
    #[must_use]
    pub fn state(&self) -> Arc<MemberState> {
        self.state.clone()
    }

    /// Run server and emitter until `shutdown` flips
    ///
    /// # Errors
    ///
    /// Returns error if the command server cannot bind or fails
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            node_id = %self.state.node_id,
            capabilities = ?self.state.capabilities,
            "starting fleet member"
        );

        let emitter = self.emitter.spawn(shutdown.clone());
        let served = server::serve(self.state, self.addr, shutdown).await;

        if served.is_err() {
            emitter.abort();
        } else if let Err(e) = emitter.await {
            tracing::warn!(error = %e, "heartbeat emitter task ended abnormally");
        }
        served
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_capability() {
        let mut config = Config::default();
        config.member.node_id = Some("n1".to_string());
        config.member.capabilities = vec!["led".to_string(), "laser".to_string()];

        assert!(MemberNode::from_config(&config).is_err());
    }

    #[test]
    fn builds_actuators_for_declared_capabilities() {
        let mut config = Config::default();
        config.member.node_id = Some("porch".to_string());
        config.member.capabilities = vec![
            "relay".to_string(),
            "pwm".to_string(),
            "temperature".to_string(),
        ];

        let node = MemberNode::from_config(&config).unwrap();
        let state = node.state();
        assert_eq!(state.node_id, "porch");
        assert_eq!(
            state.actuators.kinds(),
            [crate::nodes::Capability::Relay, crate::nodes::Capability::Pwm]
        );
    }
}
