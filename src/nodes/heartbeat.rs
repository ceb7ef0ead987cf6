//! Coordinator-side heartbeat handling
//!
//! Validates a node's report, refreshes the registry and announces
//! liveness transitions. Sensor readings are forwarded to a sink but play
//! no part in liveness.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::policy::{parse_capabilities, validate_node_id};
use super::types::{Capability, Heartbeat};
use super::{DEFAULT_NODE_PORT, SharedNodeRegistry};
use crate::events::{EventBus, FleetEvent};
use crate::{Error, Result};

/// Destination for sensor readings carried on heartbeats
pub trait SensorSink: Send + Sync {
    /// Accept one batch of readings from `node_id`
    fn record(&self, node_id: &str, readings: &BTreeMap<String, f64>, at: DateTime<Utc>);
}

/// Sink that only logs readings at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSensorSink;

impl SensorSink for TracingSensorSink {
    fn record(&self, node_id: &str, readings: &BTreeMap<String, f64>, at: DateTime<Utc>) {
        tracing::debug!(node_id, ?readings, %at, "sensor readings");
    }
}

/// Validated heartbeat ready for the registry
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedHeartbeat {
    pub id: String,
    pub address: String,
    pub capabilities: BTreeSet<Capability>,
    pub became_online: bool,
}

/// Receives heartbeats on behalf of the coordinator
#[derive(Clone)]
pub struct HeartbeatReceiver {
    registry: SharedNodeRegistry,
    events: EventBus,
    sink: Arc<dyn SensorSink>,
}

impl HeartbeatReceiver {
    /// Create a receiver writing to `registry` and announcing on `events`
    #[must_use]
    pub fn new(registry: SharedNodeRegistry, events: EventBus) -> Self {
        Self {
            registry,
            events,
            sink: Arc::new(TracingSensorSink),
        }
    }

    /// Replace the sensor sink
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn SensorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Accept a heartbeat using the coordinator's current time
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed reports; the registry is untouched
    pub async fn accept(
        &self,
        heartbeat: Heartbeat,
        peer: Option<SocketAddr>,
    ) -> Result<AcceptedHeartbeat> {
        self.accept_at(heartbeat, peer, Utc::now()).await
    }

    /// Accept a heartbeat as if processed at `now`
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed reports; the registry is untouched
    pub async fn accept_at(
        &self,
        heartbeat: Heartbeat,
        peer: Option<SocketAddr>,
        now: DateTime<Utc>,
    ) -> Result<AcceptedHeartbeat> {
        validate_node_id(&heartbeat.id)?;
        let capabilities = parse_capabilities(&heartbeat.capabilities)?;
        let address = resolve_address(&heartbeat, peer)?;

        let became_online = {
            let mut registry = self.registry.lock().await;
            registry.upsert_heartbeat(&heartbeat.id, &address, capabilities.clone(), now)
        };

        if became_online {
            self.events.publish(FleetEvent::NodeOnline {
                id: heartbeat.id.clone(),
                address: address.clone(),
                at: now,
            });
        } else {
            tracing::debug!(node_id = %heartbeat.id, %address, "heartbeat refreshed");
        }

        if let Some(readings) = heartbeat.sensors.as_ref().filter(|r| !r.is_empty()) {
            self.sink.record(&heartbeat.id, readings, now);
        }

        Ok(AcceptedHeartbeat {
            id: heartbeat.id,
            address,
            capabilities,
            became_online,
        })
    }
}

/// Pick the node's reachable endpoint
///
/// An explicit `address` wins; otherwise the connection's peer IP is paired
/// with the reported command port.
fn resolve_address(heartbeat: &Heartbeat, peer: Option<SocketAddr>) -> Result<String> {
    if let Some(address) = heartbeat.address.as_deref() {
        validate_address(address)?;
        return Ok(address.to_string());
    }

    let peer = peer.ok_or_else(|| {
        Error::validation("heartbeat has no address and the connection address is unknown")
    })?;
    let port = heartbeat.port.unwrap_or(DEFAULT_NODE_PORT);
    Ok(SocketAddr::new(peer.ip(), port).to_string())
}

/// Check that an address looks like `host:port`
fn validate_address(address: &str) -> Result<()> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::validation(format!("address '{address}' is not host:port")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(Error::validation(format!("address '{address}' has no host")));
    }
    match port.parse::<u16>() {
        Ok(p) if p != 0 => Ok(()),
        _ => Err(Error::validation(format!("address '{address}' has an invalid port"))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::nodes::{NodeRegistry, NodeStatus};

    #[derive(Default)]
    struct RecordingSink {
        batches: StdMutex<Vec<(String, usize)>>,
    }

    impl SensorSink for RecordingSink {
        fn record(&self, node_id: &str, readings: &BTreeMap<String, f64>, _at: DateTime<Utc>) {
            self.batches
                .lock()
                .unwrap()
                .push((node_id.to_string(), readings.len()));
        }
    }

    fn receiver() -> (HeartbeatReceiver, SharedNodeRegistry, EventBus) {
        let registry = NodeRegistry::shared();
        let events = EventBus::new(8);
        (
            HeartbeatReceiver::new(registry.clone(), events.clone()),
            registry,
            events,
        )
    }

    fn peer() -> Option<SocketAddr> {
        Some("192.168.4.11:40312".parse().unwrap())
    }

    fn heartbeat(id: &str, caps: &[&str]) -> Heartbeat {
        Heartbeat {
            id: id.to_string(),
            capabilities: caps.iter().map(ToString::to_string).collect(),
            ..Heartbeat::default()
        }
    }

    #[tokio::test]
    async fn accepted_heartbeat_marks_online_at_processing_time() {
        let (receiver, registry, _events) = receiver();
        let now = Utc::now();

        let accepted = receiver
            .accept_at(heartbeat("n1", &["led"]), peer(), now)
            .await
            .unwrap();
        assert!(accepted.became_online);
        assert_eq!(accepted.address, "192.168.4.11:5000");

        let node = registry.lock().await.get("n1").unwrap();
        assert_eq!(node.status, NodeStatus::Online);
        assert_eq!(node.last_seen_at, now);
    }

    #[tokio::test]
    async fn explicit_address_and_port_rules() {
        let (receiver, _registry, _events) = receiver();

        let mut hb = heartbeat("n1", &[]);
        hb.port = Some(8080);
        let accepted = receiver.accept(hb, peer()).await.unwrap();
        assert_eq!(accepted.address, "192.168.4.11:8080");

        let mut hb = heartbeat("n1", &[]);
        hb.address = Some("10.1.1.1:5001".to_string());
        let accepted = receiver.accept(hb, peer()).await.unwrap();
        assert_eq!(accepted.address, "10.1.1.1:5001");
    }

    #[tokio::test]
    async fn malformed_heartbeat_leaves_registry_untouched() {
        let (receiver, registry, _events) = receiver();

        assert!(matches!(
            receiver.accept(heartbeat("", &["led"]), peer()).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            receiver.accept(heartbeat("n1", &["laser"]), peer()).await,
            Err(Error::Validation(_))
        ));
        let mut hb = heartbeat("n1", &["led"]);
        hb.address = Some("no-port".to_string());
        assert!(receiver.accept(hb, peer()).await.is_err());
        assert!(receiver.accept(heartbeat("n1", &["led"]), None).await.is_err());

        assert!(registry.lock().await.is_empty());
    }

    #[tokio::test]
    async fn transition_publishes_event_once() {
        let (receiver, _registry, events) = receiver();
        let mut rx = events.subscribe();

        receiver.accept(heartbeat("n1", &["led"]), peer()).await.unwrap();
        let second = receiver.accept(heartbeat("n1", &["led"]), peer()).await.unwrap();
        assert!(!second.became_online);

        assert!(matches!(rx.recv().await.unwrap(), FleetEvent::NodeOnline { id, .. } if id == "n1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sensors_go_to_sink_and_are_optional() {
        let (receiver, _registry, _events) = receiver();
        let sink = Arc::new(RecordingSink::default());
        let receiver = receiver.with_sink(sink.clone());

        let mut hb = heartbeat("n1", &["temperature"]);
        hb.sensors = Some(BTreeMap::from([("temperature".to_string(), 23.5)]));
        receiver.accept(hb, peer()).await.unwrap();
        receiver.accept(heartbeat("n2", &[]), peer()).await.unwrap();

        assert_eq!(*sink.batches.lock().unwrap(), vec![("n1".to_string(), 1)]);
    }

    #[test]
    fn address_validation() {
        assert!(validate_address("10.0.0.1:5000").is_ok());
        assert!(validate_address("pumpkin.local:80").is_ok());
        assert!(validate_address("[::1]:5000").is_ok());
        assert!(validate_address(":5000").is_err());
        assert!(validate_address("host:0").is_err());
        assert!(validate_address("host:http").is_err());
    }
}
