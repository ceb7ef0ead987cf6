//! Liveness event publishing
//!
//! Heartbeat transitions and sweeper demotions are broadcast to any
//! interested observer. Publishing is best-effort: having no subscribers
//! is normal and never an error for the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default broadcast buffer; slow subscribers lag rather than block publishers
const DEFAULT_CAPACITY: usize = 256;

/// A change in a node's liveness
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// Node came online (first contact or returning from offline)
    NodeOnline {
        id: String,
        address: String,
        at: DateTime<Utc>,
    },
    /// Node aged out by the sweeper
    NodeOffline { id: String, at: DateTime<Utc> },
}

impl FleetEvent {
    /// Event type name, e.g. `"node.online"`
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::NodeOnline { .. } => "node.online",
            Self::NodeOffline { .. } => "node.offline",
        }
    }

    /// Node the event is about
    #[must_use]
    pub fn node_id(&self) -> &str {
        match self {
            Self::NodeOnline { id, .. } | Self::NodeOffline { id, .. } => id,
        }
    }
}

/// Cloneable handle for publishing and subscribing to fleet events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FleetEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event, returning how many subscribers received it
    pub fn publish(&self, event: FleetEvent) -> usize {
        match self.tx.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!(event_type = event.event_type(), "no event subscribers");
                0
            }
        }
    }

    /// Subscribe to events published after this call
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }
}

/// Log every event on the bus until it closes
pub async fn log_events(mut rx: broadcast::Receiver<FleetEvent>) {
    loop {
        match rx.recv().await {
            Ok(FleetEvent::NodeOnline { id, address, at }) => {
                tracing::info!(node_id = %id, %address, %at, "node online");
            }
            Ok(FleetEvent::NodeOffline { id, at }) => {
                tracing::info!(node_id = %id, %at, "node offline");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event logger lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        let delivered = bus.publish(FleetEvent::NodeOffline {
            id: "n1".to_string(),
            at: Utc::now(),
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        let event = FleetEvent::NodeOnline {
            id: "n1".to_string(),
            address: "10.0.0.5:5000".to_string(),
            at: Utc::now(),
        };
        assert_eq!(bus.publish(event.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = FleetEvent::NodeOffline {
            id: "n1".to_string(),
            at: DateTime::from_timestamp(0, 0).unwrap(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "node_offline");
        assert_eq!(json["id"], "n1");
        assert_eq!(event.event_type(), "node.offline");
        assert_eq!(event.node_id(), "n1");
    }
}
